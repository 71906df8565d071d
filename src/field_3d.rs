//! Tricubic interpolation of 3-D field tables.

use std::io::BufRead;
use std::path::Path;

use crate::error::{Error, Result};
use crate::field::{BFieldValue, EFieldValue, FieldSource, TableOptions};

/// Hermite basis matrix, one axis of the tensor-product construction.
const HERMITE: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [-3.0, 3.0, -2.0, -1.0],
    [2.0, -2.0, 1.0, 1.0],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    X,
    Y,
    Z,
    Bx,
    By,
    Bz,
    V,
}

impl Column {
    fn parse(token: &str) -> Option<Column> {
        match token.to_ascii_uppercase().as_str() {
            "X" => Some(Column::X),
            "Y" => Some(Column::Y),
            "Z" => Some(Column::Z),
            "BX" => Some(Column::Bx),
            "BY" => Some(Column::By),
            "BZ" => Some(Column::Bz),
            "V" => Some(Column::V),
            _ => None,
        }
    }
}

/// Regular cuboid grid extents shared by all columns of one table.
#[derive(Debug, Clone, Copy)]
struct Grid3 {
    n: [usize; 3],
    origin: [f64; 3],
    spacing: [f64; 3],
}

impl Grid3 {
    fn len(&self) -> usize {
        self.n[0] * self.n[1] * self.n[2]
    }

    fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.n[1] + j) * self.n[2] + k
    }

    fn max_corner(&self, axis: usize) -> f64 {
        self.origin[axis] + (self.n[axis] - 1) as f64 * self.spacing[axis]
    }

    fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|a| p[a] >= self.origin[a] && p[a] <= self.max_corner(a))
    }
}

/// d/d(index) along one axis of a row-major cuboid grid.
fn diff3(f: &[f64], g: &Grid3, axis: usize) -> Vec<f64> {
    let mut d = vec![0.0; g.len()];
    let n = g.n[axis];
    for i in 0..g.n[0] {
        for j in 0..g.n[1] {
            for k in 0..g.n[2] {
                let pos = [i, j, k];
                let at = |m: usize| {
                    let mut q = pos;
                    q[axis] = m;
                    f[g.idx(q[0], q[1], q[2])]
                };
                let c = pos[axis];
                d[g.idx(i, j, k)] = if c == 0 {
                    at(1) - at(0)
                } else if c == n - 1 {
                    at(c) - at(c - 1)
                } else {
                    0.5 * (at(c + 1) - at(c - 1))
                };
            }
        }
    }
    d
}

/// Tricubic patch table: 64 coefficients per grid cell, built from the
/// grid values and their finite-difference first, mixed and triple
/// mixed derivatives. C1-continuous across cell faces.
struct Tricubic {
    grid: Grid3,
    coeff: Vec<[f64; 64]>,
}

impl Tricubic {
    fn new(grid: Grid3, values: &[f64]) -> Tricubic {
        let fx = diff3(values, &grid, 0);
        let fy = diff3(values, &grid, 1);
        let fz = diff3(values, &grid, 2);
        let fxy = diff3(&fx, &grid, 1);
        let fxz = diff3(&fx, &grid, 2);
        let fyz = diff3(&fy, &grid, 2);
        let fxyz = diff3(&fxy, &grid, 2);
        // indexed by bit0 = d/dx, bit1 = d/dy, bit2 = d/dz
        let tables: [&[f64]; 8] = [values, &fx, &fy, &fxy, &fz, &fxz, &fyz, &fxyz];

        let cells = (grid.n[0] - 1) * (grid.n[1] - 1) * (grid.n[2] - 1);
        let mut coeff = Vec::with_capacity(cells);
        for ci in 0..grid.n[0] - 1 {
            for cj in 0..grid.n[1] - 1 {
                for ck in 0..grid.n[2] - 1 {
                    let mut f = [[[0.0; 4]; 4]; 4];
                    for p in 0..4 {
                        for q in 0..4 {
                            for r in 0..4 {
                                let table =
                                    tables[(p / 2) | ((q / 2) << 1) | ((r / 2) << 2)];
                                f[p][q][r] =
                                    table[grid.idx(ci + p % 2, cj + q % 2, ck + r % 2)];
                            }
                        }
                    }
                    let mut a = [0.0; 64];
                    for i in 0..4 {
                        for j in 0..4 {
                            for k in 0..4 {
                                let mut sum = 0.0;
                                for p in 0..4 {
                                    for q in 0..4 {
                                        for r in 0..4 {
                                            sum += HERMITE[i][p]
                                                * HERMITE[j][q]
                                                * HERMITE[k][r]
                                                * f[p][q][r];
                                        }
                                    }
                                }
                                a[(i * 4 + j) * 4 + k] = sum;
                            }
                        }
                    }
                    coeff.push(a);
                }
            }
        }
        Tricubic { grid, coeff }
    }

    /// Value, gradient and Hessian at p; None outside the grid.
    fn eval(&self, p: [f64; 3]) -> Option<(f64, [f64; 3], [[f64; 3]; 3])> {
        if !self.grid.contains(p) {
            return None;
        }
        let g = &self.grid;
        let mut cell = [0usize; 3];
        let mut u = [0.0; 3];
        for a in 0..3 {
            let f = (p[a] - g.origin[a]) / g.spacing[a];
            cell[a] = (f.floor() as usize).min(g.n[a] - 2);
            u[a] = f - cell[a] as f64;
        }
        let a = &self.coeff
            [(cell[0] * (g.n[1] - 1) + cell[1]) * (g.n[2] - 1) + cell[2]];

        // powers and their first/second derivatives per axis
        let pw = |t: f64| {
            (
                [1.0, t, t * t, t * t * t],
                [0.0, 1.0, 2.0 * t, 3.0 * t * t],
                [0.0, 0.0, 2.0, 6.0 * t],
            )
        };
        let (ux, dux, ddux) = pw(u[0]);
        let (uy, duy, dduy) = pw(u[1]);
        let (uz, duz, dduz) = pw(u[2]);

        let mut val = 0.0;
        let mut grad = [0.0; 3];
        let mut hess = [[0.0; 3]; 3];
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    let c = a[(i * 4 + j) * 4 + k];
                    val += c * ux[i] * uy[j] * uz[k];
                    grad[0] += c * dux[i] * uy[j] * uz[k];
                    grad[1] += c * ux[i] * duy[j] * uz[k];
                    grad[2] += c * ux[i] * uy[j] * duz[k];
                    hess[0][0] += c * ddux[i] * uy[j] * uz[k];
                    hess[1][1] += c * ux[i] * dduy[j] * uz[k];
                    hess[2][2] += c * ux[i] * uy[j] * dduz[k];
                    hess[0][1] += c * dux[i] * duy[j] * uz[k];
                    hess[0][2] += c * dux[i] * uy[j] * duz[k];
                    hess[1][2] += c * ux[i] * duy[j] * duz[k];
                }
            }
        }
        for axis in 0..3 {
            grad[axis] /= g.spacing[axis];
        }
        hess[0][0] /= g.spacing[0] * g.spacing[0];
        hess[1][1] /= g.spacing[1] * g.spacing[1];
        hess[2][2] /= g.spacing[2] * g.spacing[2];
        hess[0][1] /= g.spacing[0] * g.spacing[1];
        hess[0][2] /= g.spacing[0] * g.spacing[2];
        hess[1][2] /= g.spacing[1] * g.spacing[2];
        hess[1][0] = hess[0][1];
        hess[2][0] = hess[0][2];
        hess[2][1] = hess[1][2];
        Some((val, grad, hess))
    }
}

/// C2 smooth step: 0 at 0, 1 at 1, flat at both ends.
fn smoother_step(u: f64) -> f64 {
    u * u * u * (10.0 - 15.0 * u + 6.0 * u * u)
}

fn smoother_step_deriv(u: f64) -> f64 {
    30.0 * u * u * (1.0 - u) * (1.0 - u)
}

/// Field source interpolated from a regular cuboid (x, y, z) table.
///
/// If `boundary_width` is positive, the field and its derivatives decay
/// smoothly to zero within that distance of the cuboid faces, so the
/// source is C1 everywhere including the outside (where it is zero).
pub struct GriddedField3D {
    bx: Option<Tricubic>,
    by: Option<Tricubic>,
    bz: Option<Tricubic>,
    v: Option<Tricubic>,
    grid: Grid3,
    boundary_width: f64,
    options: TableOptions,
}

impl GriddedField3D {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        boundary_width: f64,
        options: TableOptions,
    ) -> Result<GriddedField3D> {
        let name = path.as_ref().display().to_string();
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(&name, std::io::BufReader::new(file), boundary_width, options)
    }

    pub fn from_reader<R: BufRead>(
        name: &str,
        reader: R,
        boundary_width: f64,
        options: TableOptions,
    ) -> Result<GriddedField3D> {
        let fail = |reason: String| Error::FieldTable {
            file: name.to_string(),
            reason,
        };
        if boundary_width < 0.0 {
            return Err(fail("boundary width must not be negative".into()));
        }

        let mut lines = reader.lines();
        let header = loop {
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(fail("file is empty".into())),
            }
        };
        let mut columns = Vec::new();
        for token in header.split_whitespace() {
            let col = Column::parse(token)
                .ok_or_else(|| fail(format!("unrecognised column '{}'", token)))?;
            columns.push(col);
        }
        let column_index = |c: Column| columns.iter().position(|&k| k == c);
        let (xi, yi, zi) = match (
            column_index(Column::X),
            column_index(Column::Y),
            column_index(Column::Z),
        ) {
            (Some(x), Some(y), Some(z)) => (x, y, z),
            _ => return Err(fail("table must contain X, Y and Z columns".into())),
        };

        let mut rows: Vec<Vec<f64>> = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: Vec<f64> = line
                .split_whitespace()
                .map(|tok| tok.parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| fail(format!("bad number in row '{}': {}", line.trim(), e)))?;
            if row.len() != columns.len() {
                return Err(fail(format!(
                    "row has {} values, header names {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(fail(format!("non-finite value in row '{}'", line.trim())));
            }
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(fail("table contains no data rows".into()));
        }

        let conv = options.units;
        let coord_indices = [xi, yi, zi];
        let mut axes = Vec::with_capacity(3);
        for (axis, &ci) in ["X", "Y", "Z"].iter().zip(&coord_indices) {
            let vals = rows.iter().map(|row| row[ci] * conv.length).collect();
            axes.push(crate::field_2d::recover_axis(vals, axis).map_err(&fail)?);
        }
        let grid = Grid3 {
            n: [axes[0].len(), axes[1].len(), axes[2].len()],
            origin: [axes[0][0], axes[1][0], axes[2][0]],
            spacing: [
                (axes[0][axes[0].len() - 1] - axes[0][0]) / (axes[0].len() - 1) as f64,
                (axes[1][axes[1].len() - 1] - axes[1][0]) / (axes[1].len() - 1) as f64,
                (axes[2][axes[2].len() - 1] - axes[2][0]) / (axes[2].len() - 1) as f64,
            ],
        };
        if rows.len() != grid.len() {
            return Err(fail(format!(
                "grid is not rectangular: {} rows for a {}x{}x{} grid",
                rows.len(),
                grid.n[0],
                grid.n[1],
                grid.n[2]
            )));
        }

        let place = |ci: Option<usize>, scale: f64| -> std::result::Result<Option<Vec<f64>>, Error> {
            let ci = match ci {
                Some(ci) => ci,
                None => return Ok(None),
            };
            let mut out = vec![f64::NAN; grid.len()];
            for row in &rows {
                let mut node = [0usize; 3];
                for a in 0..3 {
                    node[a] = crate::field_2d::grid_index(
                        row[coord_indices[a]] * conv.length,
                        grid.origin[a],
                        grid.spacing[a],
                        grid.n[a],
                    )
                    .ok_or_else(|| {
                        fail(format!("coordinate {} is off-grid", row[coord_indices[a]]))
                    })?;
                }
                let slot = &mut out[grid.idx(node[0], node[1], node[2])];
                if !slot.is_nan() {
                    return Err(fail(format!(
                        "duplicate grid node at x={} y={} z={}",
                        row[xi], row[yi], row[zi]
                    )));
                }
                *slot = row[ci] * scale;
            }
            if out.iter().any(|v| v.is_nan()) {
                return Err(fail("grid is not rectangular: missing nodes".into()));
            }
            Ok(Some(out))
        };

        let bscale = conv.b * options.b_scale;
        let vscale = conv.e * conv.length * options.e_scale;
        let bx = place(column_index(Column::Bx), bscale)?;
        let by = place(column_index(Column::By), bscale)?;
        let bz = place(column_index(Column::Bz), bscale)?;
        let v = place(column_index(Column::V), vscale)?;

        let spline = |g: Option<Vec<f64>>| g.map(|g| Tricubic::new(grid, &g));
        Ok(GriddedField3D {
            bx: spline(bx),
            by: spline(by),
            bz: spline(bz),
            v: spline(v),
            grid,
            boundary_width,
            options,
        })
    }

    /// Scale a value/gradient pair so the field fades to zero at the
    /// cuboid faces over the boundary width.
    fn smooth(&self, p: [f64; 3], f: &mut f64, grad: &mut [f64; 3]) {
        let w = self.boundary_width;
        if w <= 0.0 || *f == 0.0 {
            return;
        }
        let mut factor = [1.0; 3];
        let mut dfactor = [0.0; 3]; // d(factor)/d(coordinate)
        for a in 0..3 {
            let lo = (p[a] - self.grid.origin[a]) / w;
            let hi = (self.grid.max_corner(a) - p[a]) / w;
            let (u, sign) = if lo < hi { (lo, 1.0) } else { (hi, -1.0) };
            if u < 1.0 {
                factor[a] = smoother_step(u);
                dfactor[a] = sign * smoother_step_deriv(u) / w;
            }
        }
        let total = factor[0] * factor[1] * factor[2];
        for j in 0..3 {
            let others = factor[(j + 1) % 3] * factor[(j + 2) % 3];
            grad[j] = grad[j] * total + *f * dfactor[j] * others;
        }
        *f *= total;
    }
}

impl FieldSource for GriddedField3D {
    fn add_b_field(&self, x: f64, y: f64, z: f64, t: f64, b: &mut BFieldValue) {
        let sigma = self.options.ramp.scale(t);
        if sigma == 0.0 {
            return;
        }
        let p = [x, y, z];
        for (row, spline) in [&self.bx, &self.by, &self.bz].into_iter().enumerate() {
            if let Some(spline) = spline {
                if let Some((mut val, mut grad, _)) = spline.eval(p) {
                    self.smooth(p, &mut val, &mut grad);
                    b.comp[row][0] += sigma * val;
                    for j in 0..3 {
                        b.comp[row][j + 1] += sigma * grad[j];
                    }
                }
            }
        }
    }

    fn add_e_field(&self, x: f64, y: f64, z: f64, _t: f64, e: &mut EFieldValue) {
        let p = [x, y, z];
        if let Some(vspline) = &self.v {
            if let Some((val, grad, hess)) = vspline.eval(p) {
                let mut v = val;
                let mut dv = grad;
                self.smooth(p, &mut v, &mut dv);
                e.v += v;
                for i in 0..3 {
                    e.e[i] += -dv[i];
                    // each E component is faded with its own gradient row
                    let mut ei = -grad[i];
                    let mut dei = [-hess[i][0], -hess[i][1], -hess[i][2]];
                    self.smooth(p, &mut ei, &mut dei);
                    for j in 0..3 {
                        e.de[i][j] += dei[j];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::UnitConversion;
    use std::io::Cursor;

    fn si_options() -> TableOptions {
        TableOptions {
            units: UnitConversion::si(),
            ..TableOptions::default()
        }
    }

    /// 6x6x6 unit-spaced grid over [0, 5]^3 scaled by 0.2 -> [0, 1]^3.
    fn make_table(header: &str, f: impl Fn(f64, f64, f64) -> Vec<f64>) -> String {
        let mut out = String::from(header);
        out.push('\n');
        for i in 0..6 {
            for j in 0..6 {
                for k in 0..6 {
                    let (x, y, z) = (i as f64 * 0.2, j as f64 * 0.2, k as f64 * 0.2);
                    out.push_str(&format!("{} {} {}", x, y, z));
                    for v in f(x, y, z) {
                        out.push_str(&format!(" {}", v));
                    }
                    out.push('\n');
                }
            }
        }
        out
    }

    #[test]
    fn test_uniform_field_inside_zero_outside() {
        let table = make_table("x y z Bz", |_, _, _| vec![1.0]);
        let field =
            GriddedField3D::from_reader("t", Cursor::new(table), 0.0, si_options()).unwrap();
        let mut b = BFieldValue::default();
        field.add_b_field(0.5, 0.5, 0.5, 0.0, &mut b);
        assert!((b.comp[2][0] - 1.0).abs() < 1e-9);

        let mut outside = BFieldValue::default();
        field.add_b_field(2.0, 0.5, 0.5, 0.0, &mut outside);
        assert_eq!(outside, BFieldValue::default());
    }

    #[test]
    fn test_linear_field_gradient_recovered() {
        let table = make_table("x y z Bx", |x, _, _| vec![3.0 * x]);
        let field =
            GriddedField3D::from_reader("t", Cursor::new(table), 0.0, si_options()).unwrap();
        let mut b = BFieldValue::default();
        field.add_b_field(0.37, 0.5, 0.5, 0.0, &mut b);
        assert!((b.comp[0][0] - 1.11).abs() < 1e-9);
        assert!((b.comp[0][1] - 3.0).abs() < 1e-9, "dBx/dx = {}", b.comp[0][1]);
        assert!(b.comp[0][2].abs() < 1e-9);
    }

    #[test]
    fn test_potential_gives_electric_field() {
        let table = make_table("x y z V", |x, _, _| vec![-2.0 * x]);
        let field =
            GriddedField3D::from_reader("t", Cursor::new(table), 0.0, si_options()).unwrap();
        let mut e = EFieldValue::default();
        field.add_e_field(0.5, 0.5, 0.5, 0.0, &mut e);
        assert!((e.e[0] - 2.0).abs() < 1e-9, "Ex = {}", e.e[0]);
        assert!(e.e[1].abs() < 1e-9);
        assert!((e.v - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_smoothing_vanishes_at_faces() {
        let table = make_table("x y z Bz", |_, _, _| vec![1.0]);
        let field =
            GriddedField3D::from_reader("t", Cursor::new(table), 0.25, si_options()).unwrap();

        let sample = |x: f64| {
            let mut b = BFieldValue::default();
            field.add_b_field(x, 0.5, 0.5, 0.0, &mut b);
            b
        };
        // full strength in the interior plateau
        assert!((sample(0.5).comp[2][0] - 1.0).abs() < 1e-9);
        // exactly zero at the face and beyond
        assert!(sample(0.0).comp[2][0].abs() < 1e-12);
        assert!(sample(-0.5).comp[2][0].abs() < 1e-12);
        // strictly between 0 and 1 inside the boundary layer
        let mid = sample(0.1).comp[2][0];
        assert!(mid > 0.0 && mid < 1.0, "boundary layer value {}", mid);
        // derivative matches a finite difference of the faded value
        let h = 1e-6;
        let fd = (sample(0.1 + h).comp[2][0] - sample(0.1 - h).comp[2][0]) / (2.0 * h);
        let got = sample(0.1).comp[2][1];
        assert!((fd - got).abs() < 1e-4, "dBz/dx fd {} vs {}", fd, got);
    }

    #[test]
    fn test_smoother_step_endpoints() {
        assert_eq!(smoother_step(0.0), 0.0);
        assert!((smoother_step(1.0) - 1.0).abs() < 1e-15);
        assert_eq!(smoother_step_deriv(0.0), 0.0);
        assert!(smoother_step_deriv(1.0).abs() < 1e-15);
    }

    #[test]
    fn test_rejects_missing_coordinate_column() {
        let table = "x y Bz\n0 0 1\n";
        assert!(
            GriddedField3D::from_reader("t", Cursor::new(table), 0.0, si_options()).is_err()
        );
    }

    #[test]
    fn test_rejects_incomplete_grid() {
        let mut table = make_table("x y z Bz", |_, _, _| vec![1.0]);
        // drop the last row
        table.truncate(table.trim_end().rfind('\n').unwrap() + 1);
        assert!(
            GriddedField3D::from_reader("t", Cursor::new(table), 0.0, si_options()).is_err()
        );
    }
}
