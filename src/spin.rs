use super::*;

/// Number of buffered field samples that forces a Bloch integration even if
/// the field has not recovered yet.
const BUFFER_CAP: usize = 2000;

/// One BF.out row, emitted inside Bloch integration windows only.
pub struct SpinLogRow {
    pub t: f64,
    pub babs: f64,
    pub polarization: f64,
    pub log_polarization: f64,
    pub spin: Vector,
    pub b: Vector,
}

/// Two-level spin transport for neutrons.
///
/// While min|B| across a step stays above `b_target` the polarization is
/// adiabatically conserved and the spin is merely kept parallel to the local
/// field. Below the threshold the step's dense field samples are buffered,
/// and once the field recovers (or the buffer hits its cap) the Bloch
/// equation is integrated over the buffered interval with the same Cash-Karp
/// driver at its own, stricter tolerance.
pub struct SpinTracker {
    pub b_target: f64,
    pub flipspin: bool,
    pub options: OdeOptions,
    buffer: Vec<(f64, Vector)>,
    active: bool,
}

impl SpinTracker {
    pub fn new(b_target: f64, flipspin: bool, options: OdeOptions) -> SpinTracker {
        SpinTracker { b_target, flipspin, options, buffer: vec![], active: false }
    }

    /// Consumes the dense samples of one kept (sub-)step.
    pub fn process(
        &mut self,
        state: &mut ParticleState,
        samples: &[DenseSample],
        rng: &mut McGenerator,
        rows: &mut Vec<SpinLogRow>,
    ) {
        if state.kind != ParticleKind::NEUTRON || state.hfs == 0 || samples.is_empty() {
            return;
        }
        let min_babs = samples.iter().map(|s| s.b.babs()).fold(f64::INFINITY, f64::min);

        if min_babs >= self.b_target && !self.active {
            //adiabatic regime: spin follows the field
            let b_end = samples[samples.len() - 1].b.b;
            if b_end.magnitude() > 0. {
                state.spin = b_end.normalized();
            }
            return;
        }

        if min_babs < self.b_target {
            if !self.active {
                //entering the low-field region: start from a field-aligned spin
                let b_start = samples[0].b.b;
                if b_start.magnitude() > 0. {
                    state.spin = b_start.normalized();
                }
                self.active = true;
            }
            for sample in samples {
                if self.buffer.last().map(|&(t, _)| t) == Some(sample.t) {
                    continue;
                }
                self.buffer.push((sample.t, sample.b.b));
            }
        }

        let field_recovered = min_babs >= self.b_target;
        if self.active && ((field_recovered && self.buffer.len() >= 2) || self.buffer.len() >= BUFFER_CAP) {
            let last = self.buffer[self.buffer.len() - 1];
            self.integrate_buffer(state, rng, rows);
            if field_recovered {
                self.active = false;
                let b_end = samples[samples.len() - 1].b.b;
                if b_end.magnitude() > 0. {
                    state.spin = b_end.normalized();
                }
            } else {
                //keep the last sample so the interpolation stays continuous
                //into the next buffered segment
                self.buffer.push(last);
            }
        }
        if field_recovered && self.buffer.len() < 2 {
            self.active = false;
            self.buffer.clear();
        }
    }

    /// Bloch integration dS/dt = gamma_n (S x B(t)) over the buffered
    /// interval, with B(t) linearly interpolated between the buffered
    /// Cartesian samples.
    fn integrate_buffer(&mut self, state: &mut ParticleState, rng: &mut McGenerator, rows: &mut Vec<SpinLogRow>) {
        let buffer = std::mem::take(&mut self.buffer);
        let t0 = buffer[0].0;
        let t1 = buffer[buffer.len() - 1].0;
        if t1 <= t0 {
            return;
        }

        let b_of_t = |t: f64| -> Vector {
            if t <= buffer[0].0 {
                return buffer[0].1;
            }
            if t >= buffer[buffer.len() - 1].0 {
                return buffer[buffer.len() - 1].1;
            }
            let upper = buffer.partition_point(|&(bt, _)| bt < t).max(1);
            let (ta, ba) = buffer[upper - 1];
            let (tb, bb) = buffer[upper];
            let theta = if tb > ta { (t - ta) / (tb - ta) } else { 0. };
            ba.add(&bb.sub(&ba).scale(theta))
        };

        let y0 = state.spin.as_array();
        let mut rhs = |t: f64, y: &[f64; 3]| {
            let spin = Vector::from_array(*y);
            spin.cross(&b_of_t(t)).scale(GAMMA_N).as_array()
        };
        let solution = match odeint(y0, t0, t1, &self.options, &mut rhs) {
            Ok(solution) => solution,
            //a failed Bloch segment conserves the projection it started with
            Err(_) => return,
        };

        for &(t, y) in &solution.samples {
            let spin = Vector::from_array(y);
            let b = b_of_t(t);
            let babs = b.magnitude();
            let polarization = if babs > 0. { spin.dot(&b) / babs } else { 0. };
            rows.push(SpinLogRow {
                t,
                babs,
                polarization,
                log_polarization: ((polarization + 1.) / 2.).max(f64::MIN_POSITIVE).log10(),
                spin,
                b,
            });
        }

        state.spin = Vector::from_array(solution.y);
        let b_end = b_of_t(t1);
        let projection = if b_end.magnitude() > 0. {
            (state.spin.dot(&b_end) / b_end.magnitude() / state.spin.magnitude().max(f64::MIN_POSITIVE))
                .clamp(-1., 1.)
        } else {
            1.
        };
        let p_no_flip = (projection + 1.) / 2.;
        state.spin_survival *= p_no_flip;

        if self.flipspin && rng.uniform() < 1. - p_no_flip {
            //the discrete label actually flips; subsequent adiabatic
            //shortcuts restart from the flipped state
            state.hfs = -state.hfs;
            state.number_of_spin_flips += 1;
            if b_end.magnitude() > 0. {
                state.spin = b_end.normalized();
            }
        }
    }

    /// Total spin-flip probability accumulated so far.
    pub fn flip_probability(state: &ParticleState) -> f64 {
        1. - state.spin_survival
    }
}
