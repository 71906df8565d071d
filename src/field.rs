//! Field value types, the field-source capability and the time envelope.

use nalgebra::Vector3;

/// Magnetic field sample: components, spatial derivatives, magnitude.
///
/// Rows 0..2 hold a Cartesian component in column 0 and its x/y/z
/// derivatives in columns 1..3. Row 3 holds |B| and its gradient; it is
/// only valid after [`BFieldValue::update_magnitude`] has been called
/// (the field manager does this once all sources have been summed).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BFieldValue {
    pub comp: [[f64; 4]; 4],
}

impl BFieldValue {
    /// Field vector (Bx, By, Bz).
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.comp[0][0], self.comp[1][0], self.comp[2][0])
    }

    /// |B|; valid after `update_magnitude`.
    pub fn magnitude(&self) -> f64 {
        self.comp[3][0]
    }

    /// Gradient of |B|; valid after `update_magnitude`.
    pub fn magnitude_gradient(&self) -> Vector3<f64> {
        Vector3::new(self.comp[3][1], self.comp[3][2], self.comp[3][3])
    }

    /// Fill row 3 with |B| and d|B|/dx_j from the summed component rows.
    pub fn update_magnitude(&mut self) {
        let b = self.vector();
        let babs = b.norm();
        self.comp[3][0] = babs;
        if babs > 0.0 {
            for j in 1..4 {
                self.comp[3][j] = (self.comp[0][0] * self.comp[0][j]
                    + self.comp[1][0] * self.comp[1][j]
                    + self.comp[2][0] * self.comp[2][j])
                    / babs;
            }
        } else {
            self.comp[3][1] = 0.0;
            self.comp[3][2] = 0.0;
            self.comp[3][3] = 0.0;
        }
    }
}

/// Electric field sample: potential, field vector (= -grad V) and the
/// spatial derivative tensor de[i][j] = dE_i/dx_j.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EFieldValue {
    pub v: f64,
    pub e: [f64; 3],
    pub de: [[f64; 3]; 3],
}

impl EFieldValue {
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.e[0], self.e[1], self.e[2])
    }
}

/// A single electromagnetic field source.
///
/// Contributions are additive so the manager can fan out over many sources
/// into one accumulator. Sources must be immutable after construction and
/// shareable across particle tasks.
pub trait FieldSource: Send + Sync {
    /// Add this source's B components and derivatives (rows 0..2 only;
    /// the magnitude row is the manager's job).
    fn add_b_field(&self, x: f64, y: f64, z: f64, t: f64, b: &mut BFieldValue);

    /// Add this source's potential, E field and E derivatives.
    fn add_e_field(&self, x: f64, y: f64, z: f64, t: f64, e: &mut EFieldValue);
}

/// Unit-conversion factors applied when loading a field table.
///
/// Defaults convert the cgs-flavoured table units to SI: cm -> m,
/// Gauss -> Tesla, V/cm -> V/m.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub length: f64,
    pub b: f64,
    pub e: f64,
}

impl Default for UnitConversion {
    fn default() -> Self {
        UnitConversion {
            length: 0.01,
            b: 1e-4,
            e: 100.0,
        }
    }
}

impl UnitConversion {
    /// Identity conversion, for tables already in SI units.
    pub fn si() -> Self {
        UnitConversion {
            length: 1.0,
            b: 1.0,
            e: 1.0,
        }
    }
}

/// Per-table options: constant scale factors, time envelope, units.
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    /// Constant factor applied to the magnetic columns on load.
    pub b_scale: f64,
    /// Constant factor applied to the electric columns on load;
    /// the sign carries the polarity.
    pub e_scale: f64,
    pub ramp: Ramp,
    pub units: UnitConversion,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            b_scale: 1.0,
            e_scale: 1.0,
            ramp: Ramp::default(),
            units: UnitConversion::default(),
        }
    }
}

/// Shape of the ramp edges of a [`Ramp`] envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampCurve {
    /// Straight interpolation; sigma is continuous but has corners.
    Linear,
    /// Cubic Hermite step 3u^2 - 2u^3; sigma' is continuous at the edges.
    SmoothStep,
}

/// Time envelope scaling a magnetic source between 0 and 1:
/// null field, ramp up, full field, ramp down, null again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub null_time: f64,
    pub ramp_up_time: f64,
    pub full_time: f64,
    pub ramp_down_time: f64,
    pub curve: RampCurve,
}

impl Default for Ramp {
    /// Always-on envelope.
    fn default() -> Self {
        Ramp {
            null_time: 0.0,
            ramp_up_time: 0.0,
            full_time: f64::INFINITY,
            ramp_down_time: 0.0,
            curve: RampCurve::Linear,
        }
    }
}

impl Ramp {
    /// Scale factor sigma(t) in [0, 1].
    pub fn scale(&self, t: f64) -> f64 {
        let mut edge = self.null_time;
        if t < edge {
            return 0.0;
        }
        edge += self.ramp_up_time;
        if t < edge {
            return self.shape((t - self.null_time) / self.ramp_up_time);
        }
        edge += self.full_time;
        if t < edge {
            return 1.0;
        }
        edge += self.ramp_down_time;
        if t < edge {
            let into = t - (self.null_time + self.ramp_up_time + self.full_time);
            return self.shape(1.0 - into / self.ramp_down_time);
        }
        0.0
    }

    fn shape(&self, u: f64) -> f64 {
        match self.curve {
            RampCurve::Linear => u,
            RampCurve::SmoothStep => u * u * (3.0 - 2.0 * u),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_row() {
        let mut b = BFieldValue::default();
        b.comp[0][0] = 3.0;
        b.comp[1][0] = 4.0;
        b.comp[0][1] = 1.0; // dBx/dx
        b.update_magnitude();
        assert!((b.magnitude() - 5.0).abs() < 1e-15);
        // d|B|/dx = Bx*dBx/dx / |B| = 3/5
        assert!((b.comp[3][1] - 0.6).abs() < 1e-15);
    }

    #[test]
    fn test_zero_field_magnitude_gradient_is_zero() {
        let mut b = BFieldValue::default();
        b.update_magnitude();
        assert_eq!(b.magnitude(), 0.0);
        assert_eq!(b.magnitude_gradient(), Vector3::zeros());
    }

    #[test]
    fn test_default_ramp_is_always_on() {
        let r = Ramp::default();
        assert_eq!(r.scale(0.0), 1.0);
        assert_eq!(r.scale(1e9), 1.0);
    }

    #[test]
    fn test_ramp_phases() {
        let r = Ramp {
            null_time: 1.0,
            ramp_up_time: 2.0,
            full_time: 3.0,
            ramp_down_time: 2.0,
            curve: RampCurve::Linear,
        };
        assert_eq!(r.scale(0.5), 0.0);
        assert!((r.scale(2.0) - 0.5).abs() < 1e-12);
        assert_eq!(r.scale(4.0), 1.0);
        assert!((r.scale(7.0) - 0.5).abs() < 1e-12);
        assert_eq!(r.scale(9.0), 0.0);
    }

    #[test]
    fn test_ramp_continuity_at_edges() {
        for curve in [RampCurve::Linear, RampCurve::SmoothStep] {
            let r = Ramp {
                null_time: 1.0,
                ramp_up_time: 0.5,
                full_time: 1.0,
                ramp_down_time: 0.5,
                curve,
            };
            let eps = 1e-9;
            for edge in [1.0, 1.5, 2.5, 3.0] {
                let lo = r.scale(edge - eps);
                let hi = r.scale(edge + eps);
                assert!(
                    (lo - hi).abs() < 1e-6,
                    "sigma discontinuous at t={} ({} vs {})",
                    edge,
                    lo,
                    hi
                );
            }
        }
    }

    #[test]
    fn test_smooth_step_has_flat_edges() {
        let r = Ramp {
            null_time: 0.0,
            ramp_up_time: 1.0,
            full_time: 1.0,
            ramp_down_time: 1.0,
            curve: RampCurve::SmoothStep,
        };
        // finite-difference slope near the ramp ends should vanish
        let h = 1e-4;
        let slope_start = (r.scale(h) - r.scale(0.0)) / h;
        let slope_end = (r.scale(1.0) - r.scale(1.0 - h)) / h;
        assert!(slope_start.abs() < 1e-3, "slope at ramp start: {}", slope_start);
        assert!(slope_end.abs() < 1e-3, "slope at ramp end: {}", slope_end);
    }
}
