use super::*;

/// Dynamical state of one particle. Positions and velocities are Cartesian
/// lab-frame SI; this is the single frame used throughout the crate.
/// Everything derived (kinetic energy, total energy, trajectory length) is
/// recomputed from here, never stored as primary.
#[derive(Clone, Debug)]
pub struct ParticleState {
    pub kind: ParticleKind,
    pub index: u64,
    pub t: f64,
    pub pos: Vector,
    pub vel: Vector,
    /// Discrete polarization label: -1 low-field seeker, +1 high-field
    /// seeker, 0 unpolarized. Only meaningful for neutrons.
    pub hfs: i32,
    /// Spin expectation vector, unit length, lab frame. Neutrons only.
    pub spin: Vector,
    /// Indices of all solids currently containing the particle; the active
    /// one is the priority maximum.
    pub inside: Vec<usize>,
    /// Sampled decay time (absolute, seconds); infinity for stable kinds.
    pub decay_time: f64,
    pub trajectory_length: f64,
    pub number_of_reflections: usize,
    pub number_of_spin_flips: usize,
    /// Accumulated probability that the spin did not flip.
    pub spin_survival: f64,
}

impl ParticleState {
    pub fn new(kind: ParticleKind, index: u64, t: f64, pos: Vector, vel: Vector, hfs: i32) -> ParticleState {
        ParticleState {
            kind,
            index,
            t,
            pos,
            vel,
            hfs,
            spin: Vector::new(0., 0., 1.),
            inside: vec![0],
            decay_time: f64::INFINITY,
            trajectory_length: 0.,
            number_of_reflections: 0,
            number_of_spin_flips: 0,
            spin_survival: 1.,
        }
    }

    /// The active solid: priority maximum of the inside set.
    pub fn current_solid(&self, registry: &MaterialRegistry) -> usize {
        self.inside
            .iter()
            .copied()
            .max_by_key(|&i| (registry.priority_of(i), i))
            .unwrap_or(0)
    }

    pub fn speed(&self) -> f64 {
        self.vel.magnitude()
    }

    /// Kinetic energy; relativistic for the electron.
    pub fn kinetic_energy(&self) -> f64 {
        let m = self.kind.mass();
        let v2 = self.vel.magnitude_squared();
        if self.kind.relativistic() {
            let gamma = 1. / (1. - v2 / (C_0 * C_0)).max(f64::MIN_POSITIVE).sqrt();
            (gamma - 1.) * m * C_0 * C_0
        } else {
            0.5 * m * v2
        }
    }

    /// Total energy H = Ekin + m g z + q V - hfs mu |B|, in Joules. The
    /// gravity term only enters where the equations of motion carry it.
    pub fn total_energy(&self, field: &FieldManager) -> f64 {
        let mut h = self.kinetic_energy();
        if self.kind == ParticleKind::NEUTRON {
            h += self.kind.mass() * GRAV * self.pos.z;
        }
        if self.kind.charge() != 0. {
            h += self.kind.charge() * field.e_at(&self.pos, self.t).v;
        }
        if self.kind.magnetic_moment() != 0. && self.hfs != 0 {
            h -= self.hfs as f64 * self.kind.magnetic_moment() * field.b_at(&self.pos, self.t).babs();
        }
        h
    }

    fn as_ode_state(&self) -> [f64; 6] {
        [self.pos.x, self.pos.y, self.pos.z, self.vel.x, self.vel.y, self.vel.z]
    }

    pub fn set_ode_state(&mut self, t: f64, y: &[f64; 6]) {
        self.t = t;
        self.pos = Vector::new(y[0], y[1], y[2]);
        self.vel = Vector::new(y[3], y[4], y[5]);
    }
}

/// Right-hand side of the equations of motion, dispatched on the particle
/// kind:
/// neutron   a = (hfs mu_n / m) grad|B| - g
/// proton    a = q/m (E + v x B)
/// electron  a = q/(gamma m) (E + v x B), gamma from |v|
pub fn equations_of_motion(
    kind: ParticleKind,
    hfs: i32,
    field: &FieldManager,
    t: f64,
    y: &[f64; 6],
) -> [f64; 6] {
    let pos = Vector::new(y[0], y[1], y[2]);
    let vel = Vector::new(y[3], y[4], y[5]);

    let acceleration = match kind {
        ParticleKind::NEUTRON => {
            let b = field.b_at(&pos, t);
            let magnetic = if hfs != 0 {
                b.grad_babs().scale(hfs as f64 * MU_N / M_N)
            } else {
                Vector::zero()
            };
            Vector::new(magnetic.x, magnetic.y, magnetic.z - GRAV)
        }
        ParticleKind::PROTON | ParticleKind::ELECTRON => {
            let b = field.b_at(&pos, t);
            let e = field.e_at(&pos, t);
            let mut q_over_m = kind.charge() / kind.mass();
            if kind.relativistic() {
                q_over_m *= (1. - vel.magnitude_squared() / (C_0 * C_0)).max(0.).sqrt();
            }
            //gravity is negligible against the Lorentz force for p and e
            e.e.add(&vel.cross(&b.b)).scale(q_over_m)
        }
    };
    [vel.x, vel.y, vel.z, acceleration.x, acceleration.y, acceleration.z]
}

/// One attempted trajectory step from the particle's time towards t_target.
/// On success the state is advanced to the actual end of the step and the
/// dense-output table (with fields attached to every sample) is returned.
pub fn integrate_step(
    state: &mut ParticleState,
    field: &FieldManager,
    options: &OdeOptions,
    t_target: f64,
) -> Result<DenseOutput, anyhow::Error> {
    let kind = state.kind;
    let hfs = state.hfs;
    let mut rhs = |t: f64, y: &[f64; 6]| equations_of_motion(kind, hfs, field, t, y);
    let solution = odeint(state.as_ode_state(), state.t, t_target, options, &mut rhs)
        .with_context(|| format!("integration failed for {} {}", state.kind, state.index))?;

    let samples = solution
        .samples
        .iter()
        .map(|&(t, y)| {
            let pos = Vector::new(y[0], y[1], y[2]);
            DenseSample { t, y, b: field.b_at(&pos, t), e: field.e_at(&pos, t) }
        })
        .collect();
    state.set_ode_state(solution.t, &solution.y);
    Ok(DenseOutput { samples })
}

/// Path length along the dense samples up to t_cut.
pub fn path_length(samples: &[DenseSample], t_cut: f64) -> f64 {
    let mut length = 0.;
    for pair in samples.windows(2) {
        if pair[1].t > t_cut {
            break;
        }
        length += pair[1].position().sub(&pair[0].position()).magnitude();
    }
    length
}
