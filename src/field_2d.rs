//! Bicubic interpolation of axisymmetric field tables.

use std::io::BufRead;
use std::path::Path;

use crate::error::{Error, Result};
use crate::field::{BFieldValue, EFieldValue, FieldSource, TableOptions};

/// Hermite basis matrix: maps [f(0), f(1), f'(0), f'(1)] to the
/// coefficients of a cubic in the cell-local coordinate.
const HERMITE: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [-3.0, 3.0, -2.0, -1.0],
    [2.0, -2.0, 1.0, 1.0],
];

/// Recognised table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    R,
    Z,
    Br,
    Bphi,
    Bz,
    Er,
    Ephi,
    Ez,
    V,
}

impl Column {
    fn parse(token: &str) -> Option<Column> {
        match token.to_ascii_uppercase().as_str() {
            "R" | "X" => Some(Column::R),
            "Z" => Some(Column::Z),
            "BX" | "BR" => Some(Column::Br),
            "BY" | "BPHI" => Some(Column::Bphi),
            "BZ" => Some(Column::Bz),
            "EX" | "ER" => Some(Column::Er),
            "EY" | "EPHI" => Some(Column::Ephi),
            "EZ" => Some(Column::Ez),
            "V" => Some(Column::V),
            _ => None,
        }
    }
}

/// Bicubic patch table over a regular 2-D grid.
///
/// Coefficients are built once from the grid values and their
/// finite-difference derivatives; evaluation clamps to the grid.
struct Bicubic {
    m: usize,
    n: usize,
    x0: f64,
    y0: f64,
    dx: f64,
    dy: f64,
    coeff: Vec<[[f64; 4]; 4]>,
}

/// d/d(index) along axis 0 of a row-major m x n grid.
fn diff_axis0(f: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut d = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            d[i * n + j] = if i == 0 {
                f[n + j] - f[j]
            } else if i == m - 1 {
                f[i * n + j] - f[(i - 1) * n + j]
            } else {
                0.5 * (f[(i + 1) * n + j] - f[(i - 1) * n + j])
            };
        }
    }
    d
}

/// d/d(index) along axis 1 of a row-major m x n grid.
fn diff_axis1(f: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut d = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            d[i * n + j] = if j == 0 {
                f[i * n + 1] - f[i * n]
            } else if j == n - 1 {
                f[i * n + j] - f[i * n + j - 1]
            } else {
                0.5 * (f[i * n + j + 1] - f[i * n + j - 1])
            };
        }
    }
    d
}

impl Bicubic {
    fn new(m: usize, n: usize, x0: f64, y0: f64, dx: f64, dy: f64, values: &[f64]) -> Bicubic {
        let fx = diff_axis0(values, m, n);
        let fy = diff_axis1(values, m, n);
        let fxy = diff_axis1(&fx, m, n);

        let mut coeff = Vec::with_capacity((m - 1) * (n - 1));
        for i in 0..m - 1 {
            for j in 0..n - 1 {
                // rows: value/derivative in x, columns: in y
                let pick = |gx: bool, gy: bool, ci: usize, cj: usize| -> f64 {
                    let grid = match (gx, gy) {
                        (false, false) => values,
                        (true, false) => &fx,
                        (false, true) => &fy,
                        (true, true) => &fxy,
                    };
                    grid[(i + ci) * n + (j + cj)]
                };
                let mut f = [[0.0; 4]; 4];
                for p in 0..4 {
                    for q in 0..4 {
                        f[p][q] = pick(p >= 2, q >= 2, p % 2, q % 2);
                    }
                }
                // a = H f H^T
                let mut a = [[0.0; 4]; 4];
                for r in 0..4 {
                    for c in 0..4 {
                        let mut sum = 0.0;
                        for p in 0..4 {
                            for q in 0..4 {
                                sum += HERMITE[r][p] * f[p][q] * HERMITE[c][q];
                            }
                        }
                        a[r][c] = sum;
                    }
                }
                coeff.push(a);
            }
        }
        Bicubic {
            m,
            n,
            x0,
            y0,
            dx,
            dy,
            coeff,
        }
    }

    /// Value and first derivatives at (x, y), clamped to the grid.
    fn eval(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let xmax = self.x0 + (self.m - 1) as f64 * self.dx;
        let ymax = self.y0 + (self.n - 1) as f64 * self.dy;
        let x = x.clamp(self.x0, xmax);
        let y = y.clamp(self.y0, ymax);

        let fx = (x - self.x0) / self.dx;
        let fy = (y - self.y0) / self.dy;
        let ix = (fx.floor() as usize).min(self.m - 2);
        let iy = (fy.floor() as usize).min(self.n - 2);
        let u = fx - ix as f64;
        let w = fy - iy as f64;

        let a = &self.coeff[ix * (self.n - 1) + iy];
        let up = [1.0, u, u * u, u * u * u];
        let wp = [1.0, w, w * w, w * w * w];

        let mut val = 0.0;
        let mut du = 0.0;
        let mut dw = 0.0;
        for i in 0..4 {
            for j in 0..4 {
                val += a[i][j] * up[i] * wp[j];
                if i > 0 {
                    du += i as f64 * a[i][j] * up[i - 1] * wp[j];
                }
                if j > 0 {
                    dw += j as f64 * a[i][j] * up[i] * wp[j - 1];
                }
            }
        }
        (val, du / self.dx, dw / self.dy)
    }
}

/// Axisymmetric field source interpolated from a regular (r, z) table.
///
/// The table columns may hold the radial, azimuthal and axial magnetic
/// components, electric components and the electric potential. If a
/// potential column is present the electric field is derived from it and
/// any electric columns are ignored.
pub struct AxisymmetricField {
    br: Option<Bicubic>,
    bphi: Option<Bicubic>,
    bz: Option<Bicubic>,
    er: Option<Bicubic>,
    ephi: Option<Bicubic>,
    ez: Option<Bicubic>,
    v: Option<Bicubic>,
    options: TableOptions,
}

impl AxisymmetricField {
    pub fn from_file<P: AsRef<Path>>(path: P, options: TableOptions) -> Result<AxisymmetricField> {
        let name = path.as_ref().display().to_string();
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(&name, std::io::BufReader::new(file), options)
    }

    pub fn from_reader<R: BufRead>(
        name: &str,
        reader: R,
        options: TableOptions,
    ) -> Result<AxisymmetricField> {
        let fail = |reason: String| Error::FieldTable {
            file: name.to_string(),
            reason,
        };

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
        if !columns.contains(&Column::R) || !columns.contains(&Column::Z) {
            return Err(fail("table must contain R (or X) and Z columns".into()));
        }

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

        let column_index = |c: Column| columns.iter().position(|&k| k == c);
        let ri = column_index(Column::R).expect("checked above");
        let zi = column_index(Column::Z).expect("checked above");

        let conv = options.units;
        let r_axis = recover_axis(
            rows.iter().map(|row| row[ri] * conv.length).collect(),
            "R",
        )
        .map_err(&fail)?;
        let z_axis = recover_axis(
            rows.iter().map(|row| row[zi] * conv.length).collect(),
            "Z",
        )
        .map_err(&fail)?;
        let (m, n) = (r_axis.len(), z_axis.len());
        if rows.len() != m * n {
            return Err(fail(format!(
                "grid is not rectangular: {} rows for a {} x {} grid",
                rows.len(),
                m,
                n
            )));
        }

        let r0 = r_axis[0];
        let z0 = z_axis[0];
        let dr = (r_axis[m - 1] - r0) / (m - 1) as f64;
        let dz = (z_axis[n - 1] - z0) / (n - 1) as f64;

        // place every row into the grid, catching duplicates and holes
        let place = |ci: Option<usize>, scale: f64| -> std::result::Result<Option<Vec<f64>>, Error> {
            let ci = match ci {
                Some(ci) => ci,
                None => return Ok(None),
            };
            let mut grid = vec![f64::NAN; m * n];
            for row in &rows {
                let ir = grid_index(row[ri] * conv.length, r0, dr, m)
                    .ok_or_else(|| fail(format!("R value {} is off-grid", row[ri])))?;
                let iz = grid_index(row[zi] * conv.length, z0, dz, n)
                    .ok_or_else(|| fail(format!("Z value {} is off-grid", row[zi])))?;
                let slot = &mut grid[ir * n + iz];
                if !slot.is_nan() {
                    return Err(fail(format!(
                        "duplicate grid node at r={} z={}",
                        row[ri], row[zi]
                    )));
                }
                *slot = row[ci] * scale;
            }
            if grid.iter().any(|v| v.is_nan()) {
                return Err(fail("grid is not rectangular: missing nodes".into()));
            }
            Ok(Some(grid))
        };

        let bscale = conv.b * options.b_scale;
        let escale = conv.e * options.e_scale;
        let vscale = conv.e * conv.length * options.e_scale;

        let br = place(column_index(Column::Br), bscale)?;
        let bphi = place(column_index(Column::Bphi), bscale)?;
        let bz = place(column_index(Column::Bz), bscale)?;
        let v = place(column_index(Column::V), vscale)?;
        // a potential column supersedes any electric columns
        let (er, ephi, ez) = if v.is_some() {
            (None, None, None)
        } else {
            (
                place(column_index(Column::Er), escale)?,
                place(column_index(Column::Ephi), escale)?,
                place(column_index(Column::Ez), escale)?,
            )
        };

        let spline = |grid: Option<Vec<f64>>| {
            grid.map(|g| Bicubic::new(m, n, r0, z0, dr, dz, &g))
        };

        Ok(AxisymmetricField {
            br: spline(br),
            bphi: spline(bphi),
            bz: spline(bz),
            er: spline(er),
            ephi: spline(ephi),
            ez: spline(ez),
            v: spline(v),
            options,
        })
    }

    /// Evaluate a cylindrical component triple at (r, z): value, d/dr, d/dz.
    fn eval3(
        spline: &Option<Bicubic>,
        r: f64,
        z: f64,
    ) -> (f64, f64, f64) {
        match spline {
            Some(s) => s.eval(r, z),
            None => (0.0, 0.0, 0.0),
        }
    }
}

impl FieldSource for AxisymmetricField {
    fn add_b_field(&self, x: f64, y: f64, z: f64, t: f64, b: &mut BFieldValue) {
        let sigma = self.options.ramp.scale(t);
        if sigma == 0.0 {
            return;
        }
        if self.br.is_none() && self.bphi.is_none() && self.bz.is_none() {
            return;
        }

        let r = x.hypot(y);
        let (c, s, inv_r) = if r > 1e-12 {
            (x / r, y / r, 1.0 / r)
        } else {
            (1.0, 0.0, 0.0)
        };

        let (brv, br_r, br_z) = Self::eval3(&self.br, r, z);
        let (bpv, bp_r, bp_z) = Self::eval3(&self.bphi, r, z);
        let (bzv, bz_r, bz_z) = Self::eval3(&self.bz, r, z);

        // rotate the cylindrical components and their gradients into
        // Cartesian; the 1/r terms vanish on the axis by symmetry
        let add = [
            [
                brv * c - bpv * s,
                c * c * br_r + (brv * s * s + bpv * c * s) * inv_r - c * s * bp_r,
                c * s * br_r - (brv * c * s + bpv * c * c) * inv_r - s * s * bp_r,
                br_z * c - bp_z * s,
            ],
            [
                brv * s + bpv * c,
                c * s * br_r - (brv * c * s - bpv * s * s) * inv_r + c * c * bp_r,
                s * s * br_r + (brv * c * c - bpv * c * s) * inv_r + c * s * bp_r,
                br_z * s + bp_z * c,
            ],
            [bzv, bz_r * c, bz_r * s, bz_z],
        ];
        for i in 0..3 {
            for j in 0..4 {
                b.comp[i][j] += sigma * add[i][j];
            }
        }
    }

    fn add_e_field(&self, x: f64, y: f64, z: f64, _t: f64, e: &mut EFieldValue) {
        let r = x.hypot(y);
        let (c, s) = if r > 1e-12 { (x / r, y / r) } else { (1.0, 0.0) };

        if let Some(vspline) = &self.v {
            // E = -grad V; the second-derivative tensor is left untouched
            let (v, dv_r, dv_z) = vspline.eval(r, z);
            e.v += v;
            e.e[0] += -dv_r * c;
            e.e[1] += -dv_r * s;
            e.e[2] += -dv_z;
        } else {
            let (erv, _, _) = Self::eval3(&self.er, r, z);
            let (epv, _, _) = Self::eval3(&self.ephi, r, z);
            let (ezv, _, _) = Self::eval3(&self.ez, r, z);
            e.e[0] += erv * c - epv * s;
            e.e[1] += erv * s + epv * c;
            e.e[2] += ezv;
        }
    }
}

/// Sorted unique coordinate values of one axis; errors unless they form a
/// uniform monotone grid with at least two nodes.
pub(crate) fn recover_axis(mut vals: Vec<f64>, axis: &str) -> std::result::Result<Vec<f64>, String> {
    vals.sort_by(f64::total_cmp);
    vals.dedup_by(|a, b| (*a - *b).abs() <= 1e-9 * (1.0 + b.abs()));
    if vals.len() < 2 {
        return Err(format!("axis {} needs at least two distinct values", axis));
    }
    let d = (vals[vals.len() - 1] - vals[0]) / (vals.len() - 1) as f64;
    for w in vals.windows(2) {
        if ((w[1] - w[0]) - d).abs() > 1e-6 * d {
            return Err(format!(
                "axis {} is not uniform: spacing {} differs from {}",
                axis,
                w[1] - w[0],
                d
            ));
        }
    }
    Ok(vals)
}

/// Nearest grid index of a coordinate, or None if it is not on the grid.
pub(crate) fn grid_index(v: f64, v0: f64, dv: f64, len: usize) -> Option<usize> {
    let f = (v - v0) / dv;
    let i = f.round();
    if (f - i).abs() > 1e-4 || i < 0.0 || i as usize >= len {
        return None;
    }
    Some(i as usize)
}
