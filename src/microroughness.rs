use super::*;
use std::f64::consts::PI;

//Steyerl micro-roughness model: diffuse scattering off a rough Fermi
//potential step, parameterized by the rms roughness b and the lateral
//correlation length w of the surface.

/// Squared critical wavenumber of a potential step of height `u_step` (J).
fn critical_wavenumber_squared(u_step: f64) -> f64 {
    2. * M_N * u_step / (HBAR * HBAR)
}

/// |S(theta)|^2 enhancement factor of the wavefunction at the surface.
fn s_squared(k: f64, costheta: f64, kc2: f64) -> f64 {
    let kz2 = k * k * costheta * costheta;
    if kc2 <= 0. {
        return 1.;
    }
    if kz2 >= kc2 {
        let s = 2. * kz2.sqrt() / (kz2.sqrt() + (kz2 - kc2).sqrt());
        s * s
    } else {
        4. * kz2 / kc2
    }
}

/// Probability density per solid angle of diffuse reflection into
/// (theta_out, phi_out), for a neutron of speed `v_abs` hitting the step
/// `u_step` at incidence cosine `cos_theta_in`. phi_out = 0 lies in the plane
/// of incidence.
pub fn mr_dist(
    v_abs: f64,
    cos_theta_in: f64,
    u_step: f64,
    b: f64,
    w: f64,
    theta_out: f64,
    phi_out: f64,
) -> f64 {
    if u_step <= 0. || cos_theta_in <= 0. {
        return 0.;
    }
    let k = M_N * v_abs / HBAR;
    let kc2 = critical_wavenumber_squared(u_step);
    let sin_theta_in = (1. - cos_theta_in * cos_theta_in).max(0.).sqrt();
    let cos_theta_out = theta_out.cos();
    let sin_theta_out = theta_out.sin();
    if cos_theta_out <= 0. {
        return 0.;
    }

    let prefactor = kc2 * kc2 * b * b * w * w / (8. * PI * cos_theta_in);
    let angular = (-(w * w * k * k / 2.)
        * (sin_theta_in * sin_theta_in + sin_theta_out * sin_theta_out
            - 2. * sin_theta_in * sin_theta_out * phi_out.cos()))
        .exp();
    prefactor
        * s_squared(k, cos_theta_in, kc2)
        * s_squared(k, cos_theta_out, kc2)
        * angular
        * cos_theta_out
}

/// Total diffuse reflection probability: mr_dist integrated over the
/// outgoing hemisphere on a fixed midpoint grid.
pub fn mr_prob(v_abs: f64, cos_theta_in: f64, u_step: f64, b: f64, w: f64) -> f64 {
    const N_THETA: usize = 50;
    const N_PHI: usize = 50;
    let dtheta = (PI / 2.) / N_THETA as f64;
    let dphi = TWO_PI / N_PHI as f64;
    let mut total = 0.;
    for i in 0..N_THETA {
        let theta = (i as f64 + 0.5) * dtheta;
        for j in 0..N_PHI {
            let phi = -PI + (j as f64 + 0.5) * dphi;
            total += mr_dist(v_abs, cos_theta_in, u_step, b, w, theta, phi) * theta.sin();
        }
    }
    (total * dtheta * dphi).min(1.)
}

/// Rejection-samples an outgoing (theta, phi) from the micro-roughness
/// distribution. Falls back to the distribution maximum found on a coarse
/// grid as the envelope.
pub fn mr_sample(
    rng: &mut McGenerator,
    v_abs: f64,
    cos_theta_in: f64,
    u_step: f64,
    b: f64,
    w: f64,
) -> (f64, f64) {
    const N_SCAN: usize = 25;
    let mut dist_max: f64 = 0.;
    for i in 0..N_SCAN {
        let theta = (i as f64 + 0.5) * (PI / 2.) / N_SCAN as f64;
        for j in 0..N_SCAN {
            let phi = -PI + (j as f64 + 0.5) * TWO_PI / N_SCAN as f64;
            dist_max = dist_max.max(mr_dist(v_abs, cos_theta_in, u_step, b, w, theta, phi));
        }
    }
    let envelope = dist_max * 1.2 + f64::MIN_POSITIVE;
    for _ in 0..10000 {
        //uniform over the hemisphere's solid angle
        let costheta = rng.uniform();
        let theta = costheta.acos();
        let phi = rng.uniform_range(-PI, PI);
        if rng.uniform() * envelope <= mr_dist(v_abs, cos_theta_in, u_step, b, w, theta, phi) {
            return (theta, phi);
        }
    }
    //pathological parameters; the cosine-weighted fallback keeps the run alive
    let theta = rng.uniform().sqrt().asin();
    let phi = rng.uniform_range(-PI, PI);
    (theta, phi)
}
