use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, UnitSphere};

/// SplitMix64 finalizer, used to decorrelate per-particle seeds derived from
/// the global seed and the particle index.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// Per-particle random number stream.
///
/// Every particle owns one stream, seeded deterministically from the global
/// seed and the particle index, so a parallel run draws exactly the numbers a
/// sequential run would.
pub struct McGenerator {
    rng: StdRng,
}

impl McGenerator {
    pub fn new(global_seed: u64, particle_index: u64) -> McGenerator {
        let seed = splitmix64(global_seed ^ splitmix64(particle_index));
        McGenerator { rng: StdRng::seed_from_u64(seed) }
    }

    /// Uniform draw in [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    pub fn uniform_range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.uniform()
    }

    /// Isotropic unit vector.
    pub fn isotropic_direction(&mut self) -> Vector {
        let direction: [f64; 3] = UnitSphere.sample(&mut self.rng);
        Vector::from_array(direction)
    }

    /// Cosine-weighted unit vector about `normal` (Lambert emission).
    pub fn cosine_direction(&mut self, normal: &Vector) -> Vector {
        let sintheta = self.uniform().sqrt();
        let costheta = (1. - sintheta * sintheta).sqrt();
        let phi = self.uniform_range(0., TWO_PI);
        let (t1, t2) = tangent_basis(normal);
        t1.scale(sintheta * phi.cos())
            .add(&t2.scale(sintheta * phi.sin()))
            .add(&normal.scale(costheta))
    }

    /// Exponentially distributed decay lifetime with mean `tau`.
    pub fn exponential_lifetime(&mut self, tau: f64) -> f64 {
        Exp::new(1. / tau)
            .expect("Input error: decay lifetime must be positive.")
            .sample(&mut self.rng)
    }

    /// Proton kinetic energy from neutron beta decay, rejection-sampled from
    /// the two-body recoil spectrum w(E) ~ sqrt(E) (Emax - E).
    pub fn decay_proton_energy(&mut self) -> f64 {
        let emax = DECAY_E_MAX_PROTON;
        //spectrum maximum at E = Emax/3
        let wmax = (emax / 3.).sqrt() * (emax - emax / 3.);
        loop {
            let e = self.uniform() * emax;
            let w = e.sqrt() * (emax - e);
            if self.uniform() * wmax <= w {
                return e;
            }
        }
    }

    /// Electron kinetic energy from neutron beta decay, rejection-sampled from
    /// the allowed beta spectrum w(E) ~ p (E + me c^2) (E0 - E)^2.
    pub fn decay_electron_energy(&mut self) -> f64 {
        let e0 = DECAY_E_MAX_ELECTRON;
        let mec2 = M_E * C_0 * C_0;
        let w = |e: f64| -> f64 {
            let etot = e + mec2;
            let p = (etot * etot - mec2 * mec2).sqrt() / C_0;
            p * etot * (e0 - e) * (e0 - e)
        };
        //envelope from a coarse scan of the spectrum
        let wmax = (1..100).map(|i| w(e0 * i as f64 / 100.)).fold(0., f64::max) * 1.05;
        loop {
            let e = self.uniform() * e0;
            if self.uniform() * wmax <= w(e) {
                return e;
            }
        }
    }
}

/// Any two unit vectors orthogonal to `normal` and each other.
pub fn tangent_basis(normal: &Vector) -> (Vector, Vector) {
    let helper = if normal.x.abs() < 0.9 {
        Vector::new(1., 0., 0.)
    } else {
        Vector::new(0., 1., 0.)
    };
    let t1 = normal.cross(&helper).normalized();
    let t2 = normal.cross(&t1);
    (t1, t2)
}
