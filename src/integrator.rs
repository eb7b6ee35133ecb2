use super::*;

const TINY: f64 = 1E-30;
const SAFETY: f64 = 0.9;
const MAX_GROW: f64 = 5.;
/// Modified-midpoint substep counts tried by the Bulirsch-Stoer driver.
const BS_SEQUENCE: [usize; 8] = [2, 4, 6, 8, 10, 12, 14, 16];

/// Tolerances and step bounds of an adaptive integration.
#[derive(Clone, Copy, Debug)]
pub struct OdeOptions {
    /// Relative error target per step.
    pub eps: f64,
    /// Initial trial stepsize.
    pub h1: f64,
    /// Stepsize floor; going below it is an integration error.
    pub hmin: f64,
    /// Stepsize ceiling, also bounds the collision-scan chord length.
    pub hmax: f64,
    /// Minimum time separation of stored dense-output samples.
    pub dxsav: f64,
    /// Bail-out bound on internal steps per call.
    pub max_steps: usize,
    pub stepper: StepperKind,
}

/// Raw solution of one adaptive integration: end state plus the (t, y)
/// samples recorded on the way, first at t1 and last at the end time.
pub struct OdeSolution<const N: usize> {
    pub t: f64,
    pub y: [f64; N],
    pub samples: Vec<(f64, [f64; N])>,
    pub steps: usize,
}

/// Single fifth-order Cash-Karp step with embedded fourth-order error
/// estimate. Returns (y_out, y_err).
pub fn rkck_step<const N: usize, F>(
    y: &[f64; N],
    dydt: &[f64; N],
    t: f64,
    h: f64,
    f: &mut F,
) -> ([f64; N], [f64; N])
where
    F: FnMut(f64, &[f64; N]) -> [f64; N],
{
    const A2: f64 = 0.2;
    const A3: f64 = 0.3;
    const A4: f64 = 0.6;
    const A5: f64 = 1.;
    const A6: f64 = 0.875;
    const B21: f64 = 0.2;
    const B31: f64 = 3. / 40.;
    const B32: f64 = 9. / 40.;
    const B41: f64 = 0.3;
    const B42: f64 = -0.9;
    const B43: f64 = 1.2;
    const B51: f64 = -11. / 54.;
    const B52: f64 = 2.5;
    const B53: f64 = -70. / 27.;
    const B54: f64 = 35. / 27.;
    const B61: f64 = 1631. / 55296.;
    const B62: f64 = 175. / 512.;
    const B63: f64 = 575. / 13824.;
    const B64: f64 = 44275. / 110592.;
    const B65: f64 = 253. / 4096.;
    const C1: f64 = 37. / 378.;
    const C3: f64 = 250. / 621.;
    const C4: f64 = 125. / 594.;
    const C6: f64 = 512. / 1771.;
    const DC1: f64 = C1 - 2825. / 27648.;
    const DC3: f64 = C3 - 18575. / 48384.;
    const DC4: f64 = C4 - 13525. / 55296.;
    const DC5: f64 = -277. / 14336.;
    const DC6: f64 = C6 - 0.25;

    let mut ytemp = [0.; N];
    for i in 0..N {
        ytemp[i] = y[i] + h * B21 * dydt[i];
    }
    let k2 = f(t + A2 * h, &ytemp);
    for i in 0..N {
        ytemp[i] = y[i] + h * (B31 * dydt[i] + B32 * k2[i]);
    }
    let k3 = f(t + A3 * h, &ytemp);
    for i in 0..N {
        ytemp[i] = y[i] + h * (B41 * dydt[i] + B42 * k2[i] + B43 * k3[i]);
    }
    let k4 = f(t + A4 * h, &ytemp);
    for i in 0..N {
        ytemp[i] = y[i] + h * (B51 * dydt[i] + B52 * k2[i] + B53 * k3[i] + B54 * k4[i]);
    }
    let k5 = f(t + A5 * h, &ytemp);
    for i in 0..N {
        ytemp[i] = y[i] + h * (B61 * dydt[i] + B62 * k2[i] + B63 * k3[i] + B64 * k4[i] + B65 * k5[i]);
    }
    let k6 = f(t + A6 * h, &ytemp);

    let mut yout = [0.; N];
    let mut yerr = [0.; N];
    for i in 0..N {
        yout[i] = y[i] + h * (C1 * dydt[i] + C3 * k3[i] + C4 * k4[i] + C6 * k6[i]);
        yerr[i] = h * (DC1 * dydt[i] + DC3 * k3[i] + DC4 * k4[i] + DC5 * k5[i] + DC6 * k6[i]);
    }
    (yout, yerr)
}

/// Error norm relative to the per-component scale |y| + |h dy/dt| + TINY.
fn error_norm<const N: usize>(yerr: &[f64; N], y: &[f64; N], dydt: &[f64; N], h: f64, eps: f64) -> f64 {
    let mut errmax: f64 = 0.;
    for i in 0..N {
        let yscal = y[i].abs() + (h * dydt[i]).abs() + TINY;
        errmax = errmax.max((yerr[i] / yscal).abs());
    }
    errmax / eps
}

/// One adaptive Cash-Karp step: halve on reject, grow up to MAX_GROW on a
/// generous accept. Returns (h_used, y_new, h_next).
fn cash_karp_try_step<const N: usize, F>(
    t: f64,
    y: &[f64; N],
    h_try: f64,
    options: &OdeOptions,
    f: &mut F,
) -> Result<(f64, [f64; N], f64), anyhow::Error>
where
    F: FnMut(f64, &[f64; N]) -> [f64; N],
{
    let dydt = f(t, y);
    let mut h = h_try;
    loop {
        let (yout, yerr) = rkck_step(y, &dydt, t, h, f);
        let errmax = error_norm(&yerr, y, &dydt, h, options.eps);
        if errmax <= 1. {
            let h_next = if errmax > 1.89E-4 {
                (SAFETY * h * errmax.powf(-0.2)).min(MAX_GROW * h)
            } else {
                MAX_GROW * h
            };
            return Ok((h, yout, h_next.min(options.hmax)));
        }
        h *= 0.5;
        if h.abs() <= options.hmin {
            bail!("stepsize {} fell below the floor {} at t = {}", h, options.hmin, t);
        }
    }
}

/// Modified midpoint crossing of one interval with n substeps.
fn modified_midpoint<const N: usize, F>(
    y: &[f64; N],
    dydt: &[f64; N],
    t: f64,
    big_h: f64,
    n: usize,
    f: &mut F,
) -> [f64; N]
where
    F: FnMut(f64, &[f64; N]) -> [f64; N],
{
    let h = big_h / n as f64;
    let mut ym = *y;
    let mut yn = [0.; N];
    for i in 0..N {
        yn[i] = y[i] + h * dydt[i];
    }
    let mut x = t + h;
    let mut derivative = f(x, &yn);
    for _ in 2..=n {
        let mut swap = [0.; N];
        for i in 0..N {
            swap[i] = ym[i] + 2. * h * derivative[i];
        }
        ym = yn;
        yn = swap;
        x += h;
        derivative = f(x, &yn);
    }
    let mut out = [0.; N];
    for i in 0..N {
        out[i] = 0.5 * (ym[i] + yn[i] + h * derivative[i]);
    }
    out
}

/// One adaptive Bulirsch-Stoer step: modified-midpoint results extrapolated
/// to zero stepsize in h^2, halving the interval until the extrapolation
/// converges. Same contract as the Cash-Karp variant.
fn bulirsch_stoer_try_step<const N: usize, F>(
    t: f64,
    y: &[f64; N],
    h_try: f64,
    options: &OdeOptions,
    f: &mut F,
) -> Result<(f64, [f64; N], f64), anyhow::Error>
where
    F: FnMut(f64, &[f64; N]) -> [f64; N],
{
    let dydt = f(t, y);
    let mut big_h = h_try;
    loop {
        //polynomial (Neville) extrapolation table in h^2
        let mut table: Vec<[f64; N]> = Vec::with_capacity(BS_SEQUENCE.len());
        let mut x2: Vec<f64> = Vec::with_capacity(BS_SEQUENCE.len());
        let mut result = [0.; N];
        let mut error = [0.; N];
        let mut converged_at = None;
        for (k, &n) in BS_SEQUENCE.iter().enumerate() {
            let attempt = modified_midpoint(y, &dydt, t, big_h, n, f);
            x2.push((big_h / n as f64) * (big_h / n as f64));
            table.push(attempt);
            //extrapolate the new row to h -> 0
            for j in (0..k).rev() {
                let factor = x2[j] / (x2[j] - x2[k]);
                let mut extrapolated = [0.; N];
                for i in 0..N {
                    extrapolated[i] = table[j + 1][i] + (table[j + 1][i] - table[j][i]) * (factor - 1.);
                }
                table[j] = extrapolated;
            }
            if k > 0 {
                for i in 0..N {
                    error[i] = table[0][i] - result[i];
                }
            }
            result = table[0];
            if k > 0 && error_norm(&error, y, &dydt, big_h, options.eps) <= 1. {
                converged_at = Some(k);
                break;
            }
        }
        if let Some(k) = converged_at {
            //converging early means the interval was conservative
            let h_next = if k <= 2 { 1.5 * big_h } else { big_h };
            return Ok((big_h, result, h_next.min(options.hmax)));
        }
        big_h *= 0.5;
        if big_h.abs() <= options.hmin {
            bail!("stepsize {} fell below the floor {} at t = {}", big_h, options.hmin, t);
        }
    }
}

/// Adaptive integration of dy/dt = f(t, y) from t1 to t2 with dense-output
/// recording. Samples are stored once their separation exceeds `dxsav`;
/// the first and last states are always stored.
pub fn odeint<const N: usize, F>(
    y0: [f64; N],
    t1: f64,
    t2: f64,
    options: &OdeOptions,
    f: &mut F,
) -> Result<OdeSolution<N>, anyhow::Error>
where
    F: FnMut(f64, &[f64; N]) -> [f64; N],
{
    let mut t = t1;
    let mut y = y0;
    let mut h = options.h1.min(options.hmax).min((t2 - t1).abs().max(TINY));
    let mut samples = vec![(t, y)];
    let mut t_saved = t;
    let mut steps = 0;

    while t < t2 {
        if t + h > t2 {
            h = t2 - t;
        }
        let (h_used, y_new, h_next) = match options.stepper {
            StepperKind::CASH_KARP => cash_karp_try_step(t, &y, h, options, f)?,
            StepperKind::BULIRSCH_STOER => {
                //cap the interval so the dense cadence is honored
                bulirsch_stoer_try_step(t, &y, h.min(options.dxsav.max(options.hmin * 2.)), options, f)?
            }
        };
        t += h_used;
        y = y_new;
        h = h_next;
        steps += 1;
        if t - t_saved >= options.dxsav || t >= t2 {
            samples.push((t, y));
            t_saved = t;
        }
        if steps > options.max_steps {
            bail!("exceeded {} internal steps between t = {} and t = {}", options.max_steps, t1, t2);
        }
    }
    if samples.last().map(|s| s.0) != Some(t) {
        samples.push((t, y));
    }
    Ok(OdeSolution { t, y, samples, steps })
}

/// One dense-output sample of a trajectory step, with the fields the spin
/// integrator and the loggers consume.
#[derive(Clone, Copy, Debug)]
pub struct DenseSample {
    pub t: f64,
    pub y: [f64; 6],
    pub b: BFieldValue,
    pub e: EFieldValue,
}

impl DenseSample {
    pub fn position(&self) -> Vector {
        Vector::new(self.y[0], self.y[1], self.y[2])
    }

    pub fn velocity(&self) -> Vector {
        Vector::new(self.y[3], self.y[4], self.y[5])
    }
}

/// Immutable dense output of one accepted trajectory step, owned by the
/// driver and shared read-only with the collision resolver and the spin
/// integrator.
pub struct DenseOutput {
    pub samples: Vec<DenseSample>,
}

impl DenseOutput {
    pub fn t_start(&self) -> f64 {
        self.samples[0].t
    }

    pub fn t_end(&self) -> f64 {
        self.samples[self.samples.len() - 1].t
    }

    /// Smallest |B| over the recorded samples; drives the spin integrator's
    /// adiabatic shortcut.
    pub fn min_babs(&self) -> f64 {
        self.samples.iter().map(|s| s.b.babs()).fold(f64::INFINITY, f64::min)
    }

    /// State at time t inside the step, from the stored samples alone:
    /// position by cubic Hermite through positions and velocities, velocity
    /// linearly. No derivative evaluations.
    pub fn state_at(&self, t: f64) -> [f64; 6] {
        let n = self.samples.len();
        if t <= self.samples[0].t || n == 1 {
            return self.samples[0].y;
        }
        if t >= self.samples[n - 1].t {
            return self.samples[n - 1].y;
        }
        let upper = self.samples.partition_point(|s| s.t < t).max(1);
        let s0 = &self.samples[upper - 1];
        let s1 = &self.samples[upper];
        let dt = s1.t - s0.t;
        if dt <= 0. {
            return s0.y;
        }
        let theta = (t - s0.t) / dt;
        let h00 = (1. + 2. * theta) * (1. - theta) * (1. - theta);
        let h10 = theta * (1. - theta) * (1. - theta);
        let h01 = theta * theta * (3. - 2. * theta);
        let h11 = theta * theta * (theta - 1.);
        let mut y = [0.; 6];
        for i in 0..3 {
            y[i] = h00 * s0.y[i] + h10 * dt * s0.y[i + 3] + h01 * s1.y[i] + h11 * dt * s1.y[i + 3];
            y[i + 3] = s0.y[i + 3] + theta * (s1.y[i + 3] - s0.y[i + 3]);
        }
        y
    }

    /// The prefix of samples with t <= t_cut, closed with the interpolated
    /// state at t_cut. Fields at the cut are taken from the nearest stored
    /// sample; the collision resolver re-queries what it needs.
    pub fn truncated_samples(&self, t_cut: f64) -> Vec<DenseSample> {
        let mut kept: Vec<DenseSample> = self
            .samples
            .iter()
            .copied()
            .take_while(|s| s.t <= t_cut)
            .collect();
        if kept.is_empty() {
            kept.push(self.samples[0]);
        }
        if kept.last().map(|s| s.t) != Some(t_cut) {
            let nearest = kept[kept.len() - 1];
            kept.push(DenseSample { t: t_cut, y: self.state_at(t_cut), b: nearest.b, e: nearest.e });
        }
        kept
    }
}
