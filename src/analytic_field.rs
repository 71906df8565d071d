//! Closed-form field sources with symbolic derivatives.

use crate::field::{BFieldValue, EFieldValue, FieldSource, Ramp};

/// Homogeneous magnetic and electric field.
///
/// The magnetic part follows the source's time envelope; the electric part
/// is scaled by the constant `e_scale` (its sign carries the polarity).
#[derive(Debug, Clone, Copy)]
pub struct UniformField {
    pub b: [f64; 3],
    pub e: [f64; 3],
    pub e_scale: f64,
    pub ramp: Ramp,
}

impl UniformField {
    pub fn magnetic(b: [f64; 3]) -> Self {
        UniformField {
            b,
            e: [0.0; 3],
            e_scale: 1.0,
            ramp: Ramp::default(),
        }
    }
}

impl FieldSource for UniformField {
    fn add_b_field(&self, _x: f64, _y: f64, _z: f64, t: f64, b: &mut BFieldValue) {
        let sigma = self.ramp.scale(t);
        if sigma == 0.0 {
            return;
        }
        for i in 0..3 {
            b.comp[i][0] += sigma * self.b[i];
        }
    }

    fn add_e_field(&self, _x: f64, _y: f64, _z: f64, _t: f64, e: &mut EFieldValue) {
        for i in 0..3 {
            e.e[i] += self.e_scale * self.e[i];
        }
    }
}

/// Magnetic field decaying exponentially along x.
///
/// Bx = B0 exp(-k x); the transverse components B0 k y/2 exp(-k x) and
/// B0 k z/2 exp(-k x) keep the field divergence-free.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialFieldX {
    pub b0: f64,
    pub decay: f64,
    pub ramp: Ramp,
}

impl FieldSource for ExponentialFieldX {
    fn add_b_field(&self, x: f64, y: f64, z: f64, t: f64, b: &mut BFieldValue) {
        let sigma = self.ramp.scale(t);
        if sigma == 0.0 {
            return;
        }
        let k = self.decay;
        let ex = sigma * self.b0 * (-k * x).exp();
        let bx = ex;
        let by = 0.5 * k * y * ex;
        let bz = 0.5 * k * z * ex;
        b.comp[0][0] += bx;
        b.comp[0][1] += -k * bx;
        b.comp[1][0] += by;
        b.comp[1][1] += -k * by;
        b.comp[1][2] += 0.5 * k * ex;
        b.comp[2][0] += bz;
        b.comp[2][1] += -k * bz;
        b.comp[2][3] += 0.5 * k * ex;
    }

    fn add_e_field(&self, _x: f64, _y: f64, _z: f64, _t: f64, _e: &mut EFieldValue) {}
}

/// Axial field with a linear gradient: Bz = B0 + g z.
#[derive(Debug, Clone, Copy)]
pub struct LinearFieldZ {
    pub b0: f64,
    pub gradient: f64,
    pub ramp: Ramp,
}

impl FieldSource for LinearFieldZ {
    fn add_b_field(&self, _x: f64, _y: f64, z: f64, t: f64, b: &mut BFieldValue) {
        let sigma = self.ramp.scale(t);
        if sigma == 0.0 {
            return;
        }
        b.comp[2][0] += sigma * (self.b0 + self.gradient * z);
        b.comp[2][3] += sigma * self.gradient;
    }

    fn add_e_field(&self, _x: f64, _y: f64, _z: f64, _t: f64, _e: &mut EFieldValue) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RampCurve;

    #[test]
    fn test_exponential_field_is_divergence_free() {
        let f = ExponentialFieldX {
            b0: 2.0,
            decay: 3.0,
            ramp: Ramp::default(),
        };
        let mut b = BFieldValue::default();
        f.add_b_field(0.2, 0.4, -0.3, 0.0, &mut b);
        let div = b.comp[0][1] + b.comp[1][2] + b.comp[2][3];
        assert!(div.abs() < 1e-12, "div B = {}", div);
    }

    #[test]
    fn test_exponential_field_derivatives_match_finite_differences() {
        let f = ExponentialFieldX {
            b0: 1.5,
            decay: 2.0,
            ramp: Ramp::default(),
        };
        let (x, y, z) = (0.1, -0.2, 0.3);
        let h = 1e-6;
        let sample = |x: f64, y: f64, z: f64| {
            let mut b = BFieldValue::default();
            f.add_b_field(x, y, z, 0.0, &mut b);
            b
        };
        let b0 = sample(x, y, z);
        let bdx = sample(x + h, y, z);
        let bdy = sample(x, y + h, z);
        let bdz = sample(x, y, z + h);
        for i in 0..3 {
            let fd = [
                (bdx.comp[i][0] - b0.comp[i][0]) / h,
                (bdy.comp[i][0] - b0.comp[i][0]) / h,
                (bdz.comp[i][0] - b0.comp[i][0]) / h,
            ];
            for j in 0..3 {
                assert!(
                    (fd[j] - b0.comp[i][j + 1]).abs() < 1e-4,
                    "dB{}/dx{}: fd {} vs analytic {}",
                    i,
                    j,
                    fd[j],
                    b0.comp[i][j + 1]
                );
            }
        }
    }

    #[test]
    fn test_linear_field_gradient() {
        let f = LinearFieldZ {
            b0: 1.0,
            gradient: 0.5,
            ramp: Ramp::default(),
        };
        let mut b = BFieldValue::default();
        f.add_b_field(0.0, 0.0, 2.0, 0.0, &mut b);
        assert!((b.comp[2][0] - 2.0).abs() < 1e-15);
        assert!((b.comp[2][3] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_ramp_suppresses_field_before_null_time() {
        let f = LinearFieldZ {
            b0: 1.0,
            gradient: 0.0,
            ramp: Ramp {
                null_time: 10.0,
                ramp_up_time: 1.0,
                full_time: 100.0,
                ramp_down_time: 1.0,
                curve: RampCurve::SmoothStep,
            },
        };
        let mut b = BFieldValue::default();
        f.add_b_field(0.0, 0.0, 0.0, 5.0, &mut b);
        assert_eq!(b.comp[2][0], 0.0);
    }

    #[test]
    fn test_uniform_e_scale_sign() {
        let f = UniformField {
            b: [0.0; 3],
            e: [100.0, 0.0, 0.0],
            e_scale: -2.0,
            ramp: Ramp::default(),
        };
        let mut e = EFieldValue::default();
        f.add_e_field(0.0, 0.0, 0.0, 0.0, &mut e);
        assert_eq!(e.e[0], -200.0);
    }
}
