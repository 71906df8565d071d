// Field-table and field-manager properties through the public API.

use std::io::Cursor;
use std::sync::Arc;

use ucntrack::{
    AxisymmetricField, FieldManager, GriddedField3D, LinearFieldZ, Ramp, RampCurve,
    TableOptions, UniformField, UnitConversion,
};

fn si_options() -> TableOptions {
    TableOptions {
        units: UnitConversion::si(),
        ..TableOptions::default()
    }
}

/// Regular (r, z) grid over [0, 1] x [0, 1] with a constant 1 T axial field.
fn axial_unit_field_table() -> String {
    let mut out = String::from("R Z BZ\n");
    for i in 0..6 {
        for j in 0..6 {
            out.push_str(&format!("{} {} 1.0\n", i as f64 * 0.2, j as f64 * 0.2));
        }
    }
    out
}

#[test]
fn test_axisymmetric_table_gives_uniform_axial_field() {
    // scenario: a purely axial 1 T table must evaluate to (0, 0, 1)
    // at any azimuth, within interpolation error
    let field = AxisymmetricField::from_reader(
        "axial",
        Cursor::new(axial_unit_field_table()),
        si_options(),
    )
    .unwrap();
    let manager = FieldManager::new(vec![Arc::new(field)]);
    for k in 0..12 {
        let phi = k as f64 * std::f64::consts::TAU / 12.0;
        let (x, y) = (0.4 * phi.cos(), 0.4 * phi.sin());
        let b = manager.b_field(x, y, 0.5, 0.0);
        assert!(
            (b.magnitude() - 1.0).abs() < 1e-9,
            "|B| = {} at phi = {}",
            b.magnitude(),
            phi
        );
        assert!(b.comp[0][0].abs() < 1e-9);
        assert!(b.comp[1][0].abs() < 1e-9);
        assert!((b.comp[2][0] - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_axisymmetric_magnitude_invariant_under_rotation() {
    let mut table = String::from("R Z BX BZ\n");
    for i in 0..6 {
        for j in 0..6 {
            let (r, z) = (i as f64 * 0.2, j as f64 * 0.2);
            table.push_str(&format!("{} {} {} {}\n", r, z, 0.3 * r, 1.0 + 0.5 * z));
        }
    }
    let field =
        AxisymmetricField::from_reader("rot", Cursor::new(table), si_options()).unwrap();
    let manager = FieldManager::new(vec![Arc::new(field)]);
    let reference = manager.b_field(0.5, 0.0, 0.3, 0.0).magnitude();
    for k in 1..8 {
        let phi = k as f64 * 0.7;
        let b = manager.b_field(0.5 * phi.cos(), 0.5 * phi.sin(), 0.3, 0.0);
        assert!(
            (b.magnitude() - reference).abs() < 1e-9,
            "|B| changed under rotation: {} vs {}",
            b.magnitude(),
            reference
        );
    }
}

/// Cuboid grid over [0, 1]^3 with a constant field.
fn cuboid_table(value: f64) -> String {
    let mut out = String::from("X Y Z BX\n");
    for i in 0..6 {
        for j in 0..6 {
            for k in 0..6 {
                out.push_str(&format!(
                    "{} {} {} {}\n",
                    i as f64 * 0.2,
                    j as f64 * 0.2,
                    k as f64 * 0.2,
                    value
                ));
            }
        }
    }
    out
}

#[test]
fn test_gridded_3d_exactly_zero_outside_boundary() {
    let field = GriddedField3D::from_reader(
        "cube",
        Cursor::new(cuboid_table(2.0)),
        0.2,
        si_options(),
    )
    .unwrap();
    let manager = FieldManager::new(vec![Arc::new(field)]);
    // anywhere beyond the boundary width outside the cuboid: strict zero
    for p in [
        [1.5, 0.5, 0.5],
        [-0.3, 0.5, 0.5],
        [0.5, 2.0, 0.5],
        [0.5, 0.5, -1.0],
    ] {
        let b = manager.b_field(p[0], p[1], p[2], 0.0);
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(
                    b.comp[i][j], 0.0,
                    "component [{}][{}] at {:?}",
                    i, j, p
                );
            }
        }
    }
    // plateau keeps the full value
    let b = manager.b_field(0.5, 0.5, 0.5, 0.0);
    assert!((b.comp[0][0] - 2.0).abs() < 1e-9);
}

#[test]
fn test_manager_sums_table_and_analytic_sources() {
    let table = GriddedField3D::from_reader(
        "cube",
        Cursor::new(cuboid_table(0.5)),
        0.0,
        si_options(),
    )
    .unwrap();
    let analytic = LinearFieldZ {
        b0: 1.0,
        gradient: 0.0,
        ramp: Ramp::default(),
    };
    let both = FieldManager::new(vec![Arc::new(table), Arc::new(analytic)]);
    let b = both.b_field(0.5, 0.5, 0.5, 0.0);
    assert!((b.comp[0][0] - 0.5).abs() < 1e-9);
    assert!((b.comp[2][0] - 1.0).abs() < 1e-9);
    let expected = (0.25f64 + 1.0).sqrt();
    assert!((b.magnitude() - expected).abs() < 1e-9);
}

#[test]
fn test_time_envelope_scales_magnetic_field() {
    let ramp = Ramp {
        null_time: 1.0,
        ramp_up_time: 2.0,
        full_time: 4.0,
        ramp_down_time: 2.0,
        curve: RampCurve::Linear,
    };
    let source = UniformField {
        b: [0.0, 0.0, 2.0],
        e: [0.0; 3],
        e_scale: 1.0,
        ramp,
    };
    let manager = FieldManager::new(vec![Arc::new(source)]);
    assert_eq!(manager.b_field(0.0, 0.0, 0.0, 0.5).comp[2][0], 0.0);
    let half = manager.b_field(0.0, 0.0, 0.0, 2.0).comp[2][0];
    assert!((half - 1.0).abs() < 1e-9, "mid-ramp value {}", half);
    assert_eq!(manager.b_field(0.0, 0.0, 0.0, 5.0).comp[2][0], 2.0);
    assert_eq!(manager.b_field(0.0, 0.0, 0.0, 20.0).comp[2][0], 0.0);
}

#[test]
fn test_envelope_continuity_in_both_curves() {
    for curve in [RampCurve::Linear, RampCurve::SmoothStep] {
        let ramp = Ramp {
            null_time: 0.5,
            ramp_up_time: 1.0,
            full_time: 2.0,
            ramp_down_time: 1.0,
            curve,
        };
        let mut prev = ramp.scale(0.0);
        let mut t = 0.0;
        while t < 6.0 {
            t += 1e-3;
            let s = ramp.scale(t);
            assert!(
                (s - prev).abs() < 5e-3,
                "sigma jumps from {} to {} at t = {} ({:?})",
                prev,
                s,
                t,
                curve
            );
            assert!((0.0..=1.0).contains(&s));
            prev = s;
        }
    }
}

#[test]
fn test_default_units_convert_cgs_tables() {
    // coordinates in cm, field in Gauss: defaults map to m and Tesla
    let mut table = String::from("X Y Z BZ\n");
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                table.push_str(&format!("{} {} {} 5000\n", i * 10, j * 10, k * 10));
            }
        }
    }
    let field = GriddedField3D::from_reader(
        "cgs",
        Cursor::new(table),
        0.0,
        TableOptions::default(),
    )
    .unwrap();
    let manager = FieldManager::new(vec![Arc::new(field)]);
    // the 30 cm cube becomes 0.3 m; 5000 G becomes 0.5 T
    let b = manager.b_field(0.15, 0.15, 0.15, 0.0);
    assert!((b.comp[2][0] - 0.5).abs() < 1e-9, "Bz = {}", b.comp[2][0]);
    assert_eq!(manager.b_field(0.5, 0.15, 0.15, 0.0).comp[2][0], 0.0);
}
