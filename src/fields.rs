use super::*;

/// A single field source. Sources return the unscaled field; time-dependent
/// ramp scaling is applied by the manager.
pub trait FieldSource {
    fn b_field(&self, p: &Vector) -> BFieldValue;
    fn e_field(&self, p: &Vector) -> EFieldValue;
}

/// Piecewise current ramp: fill/clean/rampup/full/rampdown/empty phases with
/// linear ramps, continuous at every phase join, plus an optional sinusoidal
/// oscillation.
#[derive(Deserialize, Clone, Debug)]
pub struct Ramp {
    #[serde(default)]
    pub fill_time: f64,
    #[serde(default)]
    pub clean_time: f64,
    #[serde(default)]
    pub rampup_time: f64,
    #[serde(default = "default_full_time")]
    pub full_time: f64,
    #[serde(default)]
    pub rampdown_time: f64,
    #[serde(default)]
    pub empty_time: f64,
    #[serde(default)]
    pub oscillation_fraction: f64,
    #[serde(default)]
    pub oscillation_frequency: f64,
}

fn default_full_time() -> f64 {
    f64::INFINITY
}

impl Ramp {
    /// A ramp that is always at full scale.
    pub fn constant() -> Ramp {
        Ramp {
            fill_time: 0.,
            clean_time: 0.,
            rampup_time: 0.,
            full_time: f64::INFINITY,
            rampdown_time: 0.,
            empty_time: 0.,
            oscillation_fraction: 0.,
            oscillation_frequency: 0.,
        }
    }

    pub fn scale(&self, t: f64) -> f64 {
        let mut phase_start = 0.;
        let base;
        if t < phase_start + self.fill_time + self.clean_time {
            base = 0.;
        } else {
            phase_start += self.fill_time + self.clean_time;
            if t < phase_start + self.rampup_time {
                base = (t - phase_start) / self.rampup_time;
            } else {
                phase_start += self.rampup_time;
                if t < phase_start + self.full_time {
                    base = 1.;
                } else {
                    phase_start += self.full_time;
                    if t < phase_start + self.rampdown_time {
                        base = 1. - (t - phase_start) / self.rampdown_time;
                    } else {
                        base = 0.;
                    }
                }
            }
        }
        if self.oscillation_fraction != 0. {
            base * (1. + self.oscillation_fraction * (TWO_PI * self.oscillation_frequency * t).sin())
        } else {
            base
        }
    }
}

/// Homogeneous field, mostly used for storage-volume holding fields.
pub struct UniformField {
    pub b: Vector,
    pub e: Vector,
}

impl FieldSource for UniformField {
    fn b_field(&self, _p: &Vector) -> BFieldValue {
        BFieldValue { b: self.b, dbidxj: SquareMatrix3::zero() }
    }

    fn e_field(&self, p: &Vector) -> EFieldValue {
        //potential of a uniform field relative to the origin
        EFieldValue { e: self.e, v: -self.e.dot(p) }
    }
}

/// Finite straight current filament from p1 to p2 carrying `current` Amperes,
/// evaluated in closed form including the field gradient.
pub struct WireSegment {
    p1: Vector,
    p2: Vector,
    current: f64,
}

impl WireSegment {
    pub fn new(p1: Vector, p2: Vector, current: f64) -> WireSegment {
        WireSegment { p1, p2, current }
    }
}

impl FieldSource for WireSegment {
    fn b_field(&self, p: &Vector) -> BFieldValue {
        let axis = self.p2.sub(&self.p1);
        let u = axis.normalized();
        let r1 = p.sub(&self.p1);
        let r2 = p.sub(&self.p2);
        let c = u.cross(&r1);
        let c2 = c.magnitude_squared();
        let d1 = r1.magnitude();
        let d2 = r2.magnitude();
        //on the filament axis the field diverges; stay zero inside a guard tube
        if c2 < 1E-12 || d1 < 1E-6 || d2 < 1E-6 {
            return BFieldValue::zero();
        }
        let k = MU_0 * self.current / (4. * std::f64::consts::PI);
        let f = u.dot(&r1) / d1 - u.dot(&r2) / d2;
        let g = c.scale(1. / c2);
        let b = g.scale(k * f);

        let mut dbidxj = SquareMatrix3::zero();
        let basis = [Vector::new(1., 0., 0.), Vector::new(0., 1., 0.), Vector::new(0., 0., 1.)];
        for (j, ej) in basis.iter().enumerate() {
            let w = u.cross(ej);
            let df = u.dot(ej) / d1 - u.dot(&r1) * r1.dot(ej) / (d1 * d1 * d1)
                - u.dot(ej) / d2 + u.dot(&r2) * r2.dot(ej) / (d2 * d2 * d2);
            let dg = w.scale(1. / c2).sub(&c.scale(2. * c.dot(&w) / (c2 * c2)));
            let column = dg.scale(k * f).add(&g.scale(k * df));
            dbidxj.m[0][j] = column.x;
            dbidxj.m[1][j] = column.y;
            dbidxj.m[2][j] = column.z;
        }
        BFieldValue { b, dbidxj }
    }

    fn e_field(&self, _p: &Vector) -> EFieldValue {
        EFieldValue::zero()
    }
}

//Numerical-Recipes bicubic coefficient weights.
#[rustfmt::skip]
const BCUCOF_WT: [[i32; 16]; 16] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [-3, 0, 0, 3, 0, 0, 0, 0, -2, 0, 0, -1, 0, 0, 0, 0],
    [2, 0, 0, -2, 0, 0, 0, 0, 1, 0, 0, 1, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0],
    [0, 0, 0, 0, -3, 0, 0, 3, 0, 0, 0, 0, -2, 0, 0, -1],
    [0, 0, 0, 0, 2, 0, 0, -2, 0, 0, 0, 0, 1, 0, 0, 1],
    [-3, 3, 0, 0, -2, -1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, -3, 3, 0, 0, -2, -1, 0, 0],
    [9, -9, 9, -9, 6, 3, -3, -6, 6, -6, -3, 3, 4, 2, 1, 2],
    [-6, 6, -6, 6, -4, -2, 2, 4, -3, 3, 3, -3, -2, -1, -1, -2],
    [2, -2, 0, 0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 2, -2, 0, 0, 1, 1, 0, 0],
    [-6, 6, -6, 6, -3, -3, 3, 3, -4, 4, 2, -2, -2, -2, -1, -1],
    [4, -4, 4, -4, 2, 2, -2, -2, 2, -2, -2, 2, 1, 1, 1, 1],
];

/// One scalar quantity tabulated on the (r, z) grid, with the 16 bicubic
/// coefficients of every cell precomputed at load time.
struct BicubicTable {
    coefficients: Vec<[f64; 16]>,
}

impl BicubicTable {
    /// `values[ir * nz + iz]`; node derivatives by central differences.
    fn new(values: &[f64], nr: usize, nz: usize) -> BicubicTable {
        let value = |ir: usize, iz: usize| values[ir * nz + iz];
        //one-sided differences at the grid border, in grid units
        let ddr = |ir: usize, iz: usize| -> f64 {
            if ir == 0 {
                value(1, iz) - value(0, iz)
            } else if ir == nr - 1 {
                value(nr - 1, iz) - value(nr - 2, iz)
            } else {
                0.5 * (value(ir + 1, iz) - value(ir - 1, iz))
            }
        };
        let ddz = |ir: usize, iz: usize| -> f64 {
            if iz == 0 {
                value(ir, 1) - value(ir, 0)
            } else if iz == nz - 1 {
                value(ir, nz - 1) - value(ir, nz - 2)
            } else {
                0.5 * (value(ir, iz + 1) - value(ir, iz - 1))
            }
        };
        let ddrdz = |ir: usize, iz: usize| -> f64 {
            let irm = ir.saturating_sub(1);
            let irp = (ir + 1).min(nr - 1);
            let izm = iz.saturating_sub(1);
            let izp = (iz + 1).min(nz - 1);
            (value(irp, izp) - value(irp, izm) - value(irm, izp) + value(irm, izm))
                / ((irp - irm) as f64 * (izp - izm) as f64)
        };

        let mut coefficients = Vec::with_capacity((nr - 1) * (nz - 1));
        for ir in 0..nr - 1 {
            for iz in 0..nz - 1 {
                //corner order (t, u) = (0,0), (1,0), (1,1), (0,1); t along r, u along z
                let corners = [(ir, iz), (ir + 1, iz), (ir + 1, iz + 1), (ir, iz + 1)];
                let mut x = [0.; 16];
                for (k, &(cr, cz)) in corners.iter().enumerate() {
                    x[k] = value(cr, cz);
                    x[k + 4] = ddr(cr, cz);
                    x[k + 8] = ddz(cr, cz);
                    x[k + 12] = ddrdz(cr, cz);
                }
                let mut c = [0.; 16];
                for i in 0..16 {
                    let mut xx = 0.;
                    for k in 0..16 {
                        xx += BCUCOF_WT[i][k] as f64 * x[k];
                    }
                    c[i] = xx;
                }
                coefficients.push(c);
            }
        }
        BicubicTable { coefficients }
    }

    /// Value and the two partial derivatives (in grid units) at fractional
    /// cell coordinates t, u in [0, 1].
    fn interpolate(&self, cell: usize, t: f64, u: f64) -> (f64, f64, f64) {
        let c = &self.coefficients[cell];
        let at = |i: usize, j: usize| c[i * 4 + j];
        let mut y = 0.;
        let mut dydt = 0.;
        let mut dydu = 0.;
        for i in (0..4).rev() {
            y = t * y + ((at(i, 3) * u + at(i, 2)) * u + at(i, 1)) * u + at(i, 0);
            dydu = t * dydu + (3. * at(i, 3) * u + 2. * at(i, 2)) * u + at(i, 1);
            dydt = u * dydt + (3. * at(3, i) * t + 2. * at(2, i)) * t + at(1, i);
        }
        (y, dydt, dydu)
    }
}

/// Cylindrically symmetric field tabulated on a regular (r, z) grid, read
/// from the columnar table format (header `nr nz`, rows
/// `r z Br Bphi Bz Er Ez V` in cm / Gauss / V/cm).
pub struct TabulatedField {
    r_min: f64,
    z_min: f64,
    dr: f64,
    dz: f64,
    nr: usize,
    nz: usize,
    b_r: BicubicTable,
    b_phi: BicubicTable,
    b_z: BicubicTable,
    e_r: BicubicTable,
    e_z: BicubicTable,
    v: BicubicTable,
}

impl TabulatedField {
    pub fn from_file(path: &std::path::Path) -> Result<TabulatedField, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Input error: could not open field table {}.", path.display()))?;
        TabulatedField::from_str(&content)
            .with_context(|| format!("Input error: could not parse field table {}.", path.display()))
    }

    pub fn from_str(content: &str) -> Result<TabulatedField, anyhow::Error> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| anyhow!("empty field table"))?;
        let mut header_fields = header.split_whitespace();
        let nr: usize = header_fields
            .next()
            .ok_or_else(|| anyhow!("missing row count"))?
            .parse()
            .context("bad row count")?;
        let nz: usize = header_fields
            .next()
            .ok_or_else(|| anyhow!("missing column count"))?
            .parse()
            .context("bad column count")?;
        if nr < 2 || nz < 2 {
            bail!("field table needs at least a 2x2 grid, got {}x{}", nr, nz);
        }

        let mut rows = Vec::with_capacity(nr * nz);
        for line in lines {
            let fields: Vec<f64> = line
                .split_whitespace()
                .map(|f| f.parse::<f64>())
                .collect::<Result<_, _>>()
                .with_context(|| format!("bad table row: {}", line))?;
            if fields.len() != 8 {
                bail!("table row has {} columns, expected 8: {}", fields.len(), line);
            }
            rows.push(fields);
        }
        if rows.len() != nr * nz {
            bail!("table has {} rows, header promised {}", rows.len(), nr * nz);
        }

        let mut r_values: Vec<f64> = rows.iter().map(|row| row[0] * TABLE_LENGTH_CONV).collect();
        let mut z_values: Vec<f64> = rows.iter().map(|row| row[1] * TABLE_LENGTH_CONV).collect();
        r_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        r_values.dedup_by(|a, b| (*a - *b).abs() < 1E-12);
        z_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        z_values.dedup_by(|a, b| (*a - *b).abs() < 1E-12);
        if r_values.len() != nr || z_values.len() != nz {
            bail!("grid is not regular: found {}x{} distinct coordinates", r_values.len(), z_values.len());
        }
        let r_min = r_values[0];
        let z_min = z_values[0];
        let dr = (r_values[nr - 1] - r_min) / (nr - 1) as f64;
        let dz = (z_values[nz - 1] - z_min) / (nz - 1) as f64;

        let mut tables = vec![vec![0.; nr * nz]; 6];
        for row in &rows {
            let ir = ((row[0] * TABLE_LENGTH_CONV - r_min) / dr).round() as usize;
            let iz = ((row[1] * TABLE_LENGTH_CONV - z_min) / dz).round() as usize;
            if ir >= nr || iz >= nz {
                bail!("table point ({}, {}) off the regular grid", row[0], row[1]);
            }
            let idx = ir * nz + iz;
            tables[0][idx] = row[2] * TABLE_B_CONV;
            tables[1][idx] = row[3] * TABLE_B_CONV;
            tables[2][idx] = row[4] * TABLE_B_CONV;
            tables[3][idx] = row[5] * TABLE_E_CONV;
            tables[4][idx] = row[6] * TABLE_E_CONV;
            tables[5][idx] = row[7];
        }

        Ok(TabulatedField {
            r_min,
            z_min,
            dr,
            dz,
            nr,
            nz,
            b_r: BicubicTable::new(&tables[0], nr, nz),
            b_phi: BicubicTable::new(&tables[1], nr, nz),
            b_z: BicubicTable::new(&tables[2], nr, nz),
            e_r: BicubicTable::new(&tables[3], nr, nz),
            e_z: BicubicTable::new(&tables[4], nr, nz),
            v: BicubicTable::new(&tables[5], nr, nz),
        })
    }

    /// Locates the cell and fractional coordinates for (r, z); None outside
    /// the tabulated region.
    fn locate(&self, r: f64, z: f64) -> Option<(usize, f64, f64)> {
        let r_max = self.r_min + self.dr * (self.nr - 1) as f64;
        let z_max = self.z_min + self.dz * (self.nz - 1) as f64;
        if r < self.r_min || r > r_max || z < self.z_min || z > z_max {
            return None;
        }
        let ir = (((r - self.r_min) / self.dr) as usize).min(self.nr - 2);
        let iz = (((z - self.z_min) / self.dz) as usize).min(self.nz - 2);
        let t = (r - (self.r_min + ir as f64 * self.dr)) / self.dr;
        let u = (z - (self.z_min + iz as f64 * self.dz)) / self.dz;
        Some((ir * (self.nz - 1) + iz, t, u))
    }
}

impl FieldSource for TabulatedField {
    fn b_field(&self, p: &Vector) -> BFieldValue {
        let r = (p.x * p.x + p.y * p.y).sqrt();
        let (cell, t, u) = match self.locate(r, p.z) {
            Some(hit) => hit,
            None => return BFieldValue::zero(),
        };
        let (br, dbrdr, dbrdz) = scaled(self.b_r.interpolate(cell, t, u), self.dr, self.dz);
        let (bphi, dbphidr, dbphidz) = scaled(self.b_phi.interpolate(cell, t, u), self.dr, self.dz);
        let (bz, dbzdr, dbzdz) = scaled(self.b_z.interpolate(cell, t, u), self.dr, self.dz);

        let (cphi, sphi) = phi_trig(p, r);
        //axisymmetric fields vanish linearly on the axis, so Br/r and Bphi/r
        //go to their radial derivatives as r -> 0
        let br_over_r = if r > R_AXIS_EPS { br / r } else { dbrdr };
        let bphi_over_r = if r > R_AXIS_EPS { bphi / r } else { dbphidr };

        let b = Vector::new(br * cphi - bphi * sphi, br * sphi + bphi * cphi, bz);

        let dbx_dr = dbrdr * cphi - dbphidr * sphi;
        let dby_dr = dbrdr * sphi + dbphidr * cphi;
        let dbx_dphi_over_r = -br_over_r * sphi - bphi_over_r * cphi;
        let dby_dphi_over_r = br_over_r * cphi - bphi_over_r * sphi;

        let mut dbidxj = SquareMatrix3::zero();
        dbidxj.m[0][0] = dbx_dr * cphi - dbx_dphi_over_r * sphi;
        dbidxj.m[0][1] = dbx_dr * sphi + dbx_dphi_over_r * cphi;
        dbidxj.m[0][2] = dbrdz * cphi - dbphidz * sphi;
        dbidxj.m[1][0] = dby_dr * cphi - dby_dphi_over_r * sphi;
        dbidxj.m[1][1] = dby_dr * sphi + dby_dphi_over_r * cphi;
        dbidxj.m[1][2] = dbrdz * sphi + dbphidz * cphi;
        dbidxj.m[2][0] = dbzdr * cphi;
        dbidxj.m[2][1] = dbzdr * sphi;
        dbidxj.m[2][2] = dbzdz;

        BFieldValue { b, dbidxj }
    }

    fn e_field(&self, p: &Vector) -> EFieldValue {
        let r = (p.x * p.x + p.y * p.y).sqrt();
        let (cell, t, u) = match self.locate(r, p.z) {
            Some(hit) => hit,
            None => return EFieldValue::zero(),
        };
        let (er, _, _) = self.e_r.interpolate(cell, t, u);
        let (ez, _, _) = self.e_z.interpolate(cell, t, u);
        let (v, _, _) = self.v.interpolate(cell, t, u);
        let (cphi, sphi) = phi_trig(p, r);
        EFieldValue { e: Vector::new(er * cphi, er * sphi, ez), v }
    }
}

fn scaled(interpolated: (f64, f64, f64), dr: f64, dz: f64) -> (f64, f64, f64) {
    (interpolated.0, interpolated.1 / dr, interpolated.2 / dz)
}

fn phi_trig(p: &Vector, r: f64) -> (f64, f64) {
    if r > R_AXIS_EPS {
        (p.x / r, p.y / r)
    } else {
        (1., 0.)
    }
}

struct FieldEntry {
    source: Box<dyn FieldSource + Send + Sync>,
    ramp: Ramp,
}

/// Superposition of all configured field sources, each scaled by its ramp.
/// Thread-safe for concurrent read-only queries and deterministic in (x, t).
pub struct FieldManager {
    entries: Vec<FieldEntry>,
}

impl FieldManager {
    pub fn new() -> FieldManager {
        FieldManager { entries: vec![] }
    }

    pub fn add_source(&mut self, source: Box<dyn FieldSource + Send + Sync>, ramp: Ramp) {
        self.entries.push(FieldEntry { source, ramp });
    }

    pub fn b_at(&self, p: &Vector, t: f64) -> BFieldValue {
        let mut total = BFieldValue::zero();
        for entry in &self.entries {
            let scale = entry.ramp.scale(t);
            if scale == 0. {
                continue;
            }
            let contribution = entry.source.b_field(p);
            total.b = total.b.add(&contribution.b.scale(scale));
            total.dbidxj = total.dbidxj.add(&contribution.dbidxj.scale(scale));
        }
        total
    }

    pub fn e_at(&self, p: &Vector, t: f64) -> EFieldValue {
        let mut total = EFieldValue::zero();
        for entry in &self.entries {
            let scale = entry.ramp.scale(t);
            if scale == 0. {
                continue;
            }
            let contribution = entry.source.e_field(p);
            total.e = total.e.add(&contribution.e.scale(scale));
            total.v += scale * contribution.v;
        }
        total
    }
}

impl Default for FieldManager {
    fn default() -> Self {
        FieldManager::new()
    }
}
