use super::*;

/// Spatial region particles start from.
#[derive(Deserialize, Clone, Debug)]
pub enum SourceVolume {
    BOX { x_min: f64, x_max: f64, y_min: f64, y_max: f64, z_min: f64, z_max: f64 },
    CYLINDER { r_min: f64, r_max: f64, phi_min: f64, phi_max: f64, z_min: f64, z_max: f64 },
}

/// Angular distribution of the initial velocity.
#[derive(Deserialize, Clone, Copy, Debug)]
pub enum AngularDistribution {
    ISOTROPIC,
    /// Cosine-weighted about +z, a typical guide-exit distribution.
    COSINE_Z,
    FIXED { x: f64, y: f64, z: f64 },
}

/// Source specification from the [source] section.
#[derive(Deserialize, Clone, Debug)]
pub struct SourceParameters {
    pub particle: ParticleKind,
    pub volume: SourceVolume,
    pub energy_min: f64,
    pub energy_max: f64,
    /// One of NEV, EV, KEV, MEV.
    pub energy_unit: String,
    /// Kinetic energies are drawn with density ~ E^exponent; 0 is uniform,
    /// 0.5 the usual UCN spectrum.
    #[serde(default)]
    pub spectrum_exponent: f64,
    #[serde(default = "default_angular")]
    pub angular: AngularDistribution,
    /// -1 low-field seeker, +1 high-field seeker, 0 unpolarized.
    #[serde(default = "default_polarization")]
    pub polarization: i32,
    #[serde(default = "default_max_tries")]
    pub max_tries: usize,
}

fn default_angular() -> AngularDistribution {
    AngularDistribution::ISOTROPIC
}

fn default_polarization() -> i32 {
    -1
}

fn default_max_tries() -> usize {
    1_000_000
}

pub fn energy_unit_factor(unit: &str) -> Result<f64, anyhow::Error> {
    match unit {
        "NEV" => Ok(NEV),
        "EV" => Ok(EV),
        "KEV" => Ok(EV * 1E3),
        "MEV" => Ok(EV * 1E6),
        "J" => Ok(1.),
        _ => bail!("Input error: unknown energy unit {}. Choose one of: NEV, EV, KEV, MEV, J", unit),
    }
}

/// Samples one particle from the source. Fails with the no-initial-position
/// stop code when max_tries draws never land in a vacuum-like region.
pub fn create_particle(
    parameters: &SourceParameters,
    index: u64,
    t_start: f64,
    neutron_lifetime: f64,
    geometry: &Geometry,
    field: &FieldManager,
    rng: &mut McGenerator,
) -> Result<ParticleState, StopCode> {
    let mut position = None;
    for _ in 0..parameters.max_tries {
        let candidate = sample_volume(&parameters.volume, rng);
        let solid = geometry.solid_at(&candidate, t_start);
        if geometry.registry.material_of(solid).vacuum {
            position = Some(candidate);
            break;
        }
    }
    let pos = position.ok_or(StopCode::NO_INITIAL_POSITION)?;

    let unit = energy_unit_factor(&parameters.energy_unit).map_err(|_| StopCode::NO_INITIAL_POSITION)?;
    let energy = sample_energy(parameters, rng) * unit;
    let kind = parameters.particle;
    let speed = if kind.relativistic() {
        let gamma = 1. + energy / (kind.mass() * C_0 * C_0);
        C_0 * (1. - 1. / (gamma * gamma)).sqrt()
    } else {
        (2. * energy / kind.mass()).sqrt()
    };
    let direction = match parameters.angular {
        AngularDistribution::ISOTROPIC => rng.isotropic_direction(),
        AngularDistribution::COSINE_Z => rng.cosine_direction(&Vector::new(0., 0., 1.)),
        AngularDistribution::FIXED { x, y, z } => Vector::new(x, y, z).normalized(),
    };

    let hfs = if kind == ParticleKind::NEUTRON { parameters.polarization } else { 0 };
    let mut state = ParticleState::new(kind, index, t_start, pos, direction.scale(speed), hfs);
    state.inside = geometry.solids_containing(&pos, t_start);
    if kind == ParticleKind::NEUTRON {
        state.decay_time = t_start + rng.exponential_lifetime(neutron_lifetime);
        //spin starts along the local field; along z where there is no field
        let b = field.b_at(&pos, t_start);
        if b.babs() > 0. {
            state.spin = b.b.normalized();
        }
    }
    Ok(state)
}

fn sample_volume(volume: &SourceVolume, rng: &mut McGenerator) -> Vector {
    match *volume {
        SourceVolume::BOX { x_min, x_max, y_min, y_max, z_min, z_max } => Vector::new(
            rng.uniform_range(x_min, x_max),
            rng.uniform_range(y_min, y_max),
            rng.uniform_range(z_min, z_max),
        ),
        SourceVolume::CYLINDER { r_min, r_max, phi_min, phi_max, z_min, z_max } => {
            //uniform in volume, so r is drawn from the r dr measure
            let r = (rng.uniform_range(r_min * r_min, r_max * r_max)).sqrt();
            let phi = rng.uniform_range(phi_min, phi_max);
            Vector::new(r * phi.cos(), r * phi.sin(), rng.uniform_range(z_min, z_max))
        }
    }
}

fn sample_energy(parameters: &SourceParameters, rng: &mut McGenerator) -> f64 {
    let (e_min, e_max) = (parameters.energy_min, parameters.energy_max);
    if e_max <= e_min {
        return e_min;
    }
    //inverse transform of the E^a density on [e_min, e_max]
    let a = parameters.spectrum_exponent;
    if a == 0. {
        rng.uniform_range(e_min, e_max)
    } else {
        let p = a + 1.;
        let u = rng.uniform();
        ((1. - u) * e_min.powf(p) + u * e_max.powf(p)).powf(1. / p)
    }
}

/// Decay products of a neutron: a proton and an electron at the decay point
/// with isotropic directions, energies from the recoil and allowed-beta
/// spectra. The full three-body kinematics is not reproduced.
pub fn decay_products(parent: &ParticleState, geometry: &Geometry, rng: &mut McGenerator) -> Vec<ParticleState> {
    let mut products = Vec::with_capacity(2);
    for kind in [ParticleKind::PROTON, ParticleKind::ELECTRON] {
        let energy = match kind {
            ParticleKind::PROTON => rng.decay_proton_energy(),
            _ => rng.decay_electron_energy(),
        };
        let speed = if kind.relativistic() {
            let gamma = 1. + energy / (kind.mass() * C_0 * C_0);
            C_0 * (1. - 1. / (gamma * gamma)).sqrt()
        } else {
            (2. * energy / kind.mass()).sqrt()
        };
        let direction = rng.isotropic_direction();
        let mut product = ParticleState::new(kind, parent.index, parent.t, parent.pos, direction.scale(speed), 0);
        product.inside = geometry.solids_containing(&parent.pos, parent.t);
        products.push(product);
    }
    products
}
