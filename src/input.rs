use super::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

///This helper function is a workaround to issue #368 in serde
fn default_one_u64() -> u64 {
    1
}

///This helper function is a workaround to issue #368 in serde
fn default_one_usize() -> usize {
    1
}

///This helper function is a workaround to issue #368 in serde
fn default_one_u8() -> u8 {
    1
}

///This helper function is a workaround to issue #368 in serde
fn default_simtime() -> f64 {
    1500.
}

///This helper function is a workaround to issue #368 in serde
fn default_b_target() -> f64 {
    0.1
}

///This helper function is a workaround to issue #368 in serde
fn default_true() -> bool {
    true
}

///This helper function is a workaround to issue #368 in serde
fn default_neutron_lifetime() -> f64 {
    TAU_N
}

/// The [global] section of config.toml.
#[derive(Deserialize, Clone)]
pub struct GlobalConfig {
    pub simtype: SimulationType,
    #[serde(default = "default_one_u64")]
    pub simcount: u64,
    #[serde(default = "default_simtime")]
    pub simtime: f64,
    #[serde(default = "default_one_u8")]
    pub secondaries: u8,
    /// Spin tracking switches to Bloch integration below this field (T).
    #[serde(default = "default_b_target")]
    pub b_target: f64,
    /// Actually flip the discrete spin label with the computed probability.
    #[serde(default = "default_true")]
    pub flipspin: bool,
    #[serde(default = "default_one_usize")]
    pub num_threads: usize,
    #[serde(default = "default_one_u64")]
    pub num_chunks: u64,
    #[serde(default = "default_neutron_lifetime")]
    pub neutron_lifetime: f64,
    /// Plane for the BF_CUT mode: origin and two spanning points.
    pub b_cut_plane: Option<BCutConfig>,
    /// Grid for the BF_ONLY mode.
    pub b_scan: Option<BScanConfig>,
    /// Parameters of the MR_THETA_OUT_ANGLE mode.
    pub mr_solid_angle: Option<MrSolidAngleConfig>,
    /// Parameters of the MR_THETA_I_ENERGY mode.
    pub mr_energy: Option<MrEnergyConfig>,
}

#[derive(Deserialize, Clone)]
pub struct BCutConfig {
    pub p0: [f64; 3],
    pub p1: [f64; 3],
    pub p2: [f64; 3],
    pub n1: usize,
    pub n2: usize,
    #[serde(default)]
    pub t: f64,
}

#[derive(Deserialize, Clone)]
pub struct BScanConfig {
    pub r_min: f64,
    pub r_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub dr: f64,
    pub dz: f64,
    #[serde(default)]
    pub t: f64,
}

#[derive(Deserialize, Clone)]
pub struct MrSolidAngleConfig {
    /// Fermi potential of the reflecting surface in neV.
    pub fermi: f64,
    /// Incident neutron energy in neV.
    pub energy: f64,
    pub b: f64,
    pub w: f64,
    pub theta_i: f64,
}

#[derive(Deserialize, Clone)]
pub struct MrEnergyConfig {
    pub fermi: f64,
    pub b: f64,
    pub w: f64,
    pub theta_start: f64,
    pub theta_end: f64,
    /// Energy scan bounds in neV.
    pub energy_start: f64,
    pub energy_end: f64,
}

/// One [[solids]] entry: a triangulated surface with its material, priority
/// and optional activity window.
#[derive(Deserialize, Clone)]
pub struct SolidConfig {
    pub name: String,
    pub material: String,
    pub priority: i32,
    pub vertices: Vec<[f64; 3]>,
    pub indices: Vec<[u32; 3]>,
    pub time_window: Option<(f64, f64)>,
}

#[derive(Deserialize, Clone, Default)]
pub struct GeometrySection {
    pub default_material: Option<String>,
}

/// One [[fields]] entry.
#[derive(Deserialize)]
pub struct FieldEntryConfig {
    pub source: FieldSourceConfig,
    pub ramp: Option<Ramp>,
}

#[derive(Deserialize)]
pub enum FieldSourceConfig {
    /// Tabulated cylindrically symmetric field, file path relative to inpath.
    TABLE { file: String },
    /// Finite straight wire from p1 to p2 carrying `current` Amperes.
    WIRE { p1: [f64; 3], p2: [f64; 3], current: f64 },
    /// Homogeneous field.
    UNIFORM { b: [f64; 3], e: Option<[f64; 3]> },
}

/// Per-kind integration and logging settings as they appear in the config
/// file; everything is optional and falls back to kind-specific defaults.
#[derive(Deserialize, Clone, Default)]
pub struct KindConfigPartial {
    pub eps: Option<f64>,
    pub h1: Option<f64>,
    pub hmin: Option<f64>,
    pub hmax: Option<f64>,
    pub dxsav: Option<f64>,
    pub macro_step: Option<f64>,
    pub max_steps: Option<usize>,
    pub stepper: Option<StepperKind>,
    pub track: Option<bool>,
    pub track_interval: Option<f64>,
    pub spin_log: Option<bool>,
    pub reflect_log: Option<bool>,
    pub spin_eps: Option<f64>,
    pub spin_dxsav: Option<f64>,
}

/// Finalized per-kind settings.
#[derive(Clone)]
pub struct KindConfig {
    pub eps: f64,
    pub h1: f64,
    pub hmin: f64,
    pub hmax: f64,
    pub dxsav: f64,
    pub macro_step: f64,
    pub max_steps: usize,
    pub stepper: StepperKind,
    pub track: bool,
    pub track_interval: f64,
    pub spin_log: bool,
    pub reflect_log: bool,
    pub spin_eps: f64,
    pub spin_dxsav: f64,
}

impl KindConfig {
    /// Kind-specific defaults; tolerances per the tracking requirements,
    /// step guesses scaled to each kind's timescale.
    pub fn defaults(kind: ParticleKind) -> KindConfig {
        match kind {
            ParticleKind::NEUTRON => KindConfig {
                eps: 1E-13,
                h1: 5E-5,
                hmin: 1E-15,
                hmax: 5E-3,
                dxsav: 1E-5,
                macro_step: 1E-2,
                max_steps: 1_000_000,
                stepper: StepperKind::CASH_KARP,
                track: false,
                track_interval: 1E-3,
                spin_log: false,
                reflect_log: false,
                spin_eps: 1E-13,
                spin_dxsav: 5E-7,
            },
            ParticleKind::PROTON => KindConfig {
                eps: 1E-10,
                h1: 1E-8,
                hmin: 1E-18,
                hmax: 1E-7,
                dxsav: 1E-10,
                macro_step: 1E-6,
                max_steps: 1_000_000,
                stepper: StepperKind::CASH_KARP,
                track: false,
                track_interval: 1E-8,
                spin_log: false,
                reflect_log: false,
                spin_eps: 1E-13,
                spin_dxsav: 5E-7,
            },
            ParticleKind::ELECTRON => KindConfig {
                eps: 1E-10,
                h1: 2E-10,
                hmin: 1E-20,
                hmax: 1E-9,
                dxsav: 2E-12,
                macro_step: 1E-8,
                max_steps: 1_000_000,
                stepper: StepperKind::CASH_KARP,
                track: false,
                track_interval: 5E-12,
                spin_log: false,
                reflect_log: false,
                spin_eps: 1E-13,
                spin_dxsav: 5E-7,
            },
        }
    }

    fn merged(kind: ParticleKind, partial: &KindConfigPartial) -> KindConfig {
        let d = KindConfig::defaults(kind);
        KindConfig {
            eps: partial.eps.unwrap_or(d.eps),
            h1: partial.h1.unwrap_or(d.h1),
            hmin: partial.hmin.unwrap_or(d.hmin),
            hmax: partial.hmax.unwrap_or(d.hmax),
            dxsav: partial.dxsav.unwrap_or(d.dxsav),
            macro_step: partial.macro_step.unwrap_or(d.macro_step),
            max_steps: partial.max_steps.unwrap_or(d.max_steps),
            stepper: partial.stepper.unwrap_or(d.stepper),
            track: partial.track.unwrap_or(d.track),
            track_interval: partial.track_interval.unwrap_or(d.track_interval),
            spin_log: partial.spin_log.unwrap_or(d.spin_log),
            reflect_log: partial.reflect_log.unwrap_or(d.reflect_log),
            spin_eps: partial.spin_eps.unwrap_or(d.spin_eps),
            spin_dxsav: partial.spin_dxsav.unwrap_or(d.spin_dxsav),
        }
    }

    pub fn ode_options(&self) -> OdeOptions {
        OdeOptions {
            eps: self.eps,
            h1: self.h1,
            hmin: self.hmin,
            hmax: self.hmax,
            dxsav: self.dxsav,
            max_steps: self.max_steps,
            stepper: self.stepper,
        }
    }

    /// The Bloch sub-integrator always runs Cash-Karp, at its own (stricter)
    /// tolerance and sample cadence.
    pub fn spin_ode_options(&self) -> OdeOptions {
        OdeOptions {
            eps: self.spin_eps,
            h1: 1E-7,
            hmin: 1E-20,
            hmax: f64::INFINITY,
            dxsav: self.spin_dxsav,
            max_steps: self.max_steps,
            stepper: StepperKind::CASH_KARP,
        }
    }
}

/// Raw deserialization target for config.toml.
#[derive(Deserialize)]
pub struct InputFileConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub materials: HashMap<String, MaterialParameters>,
    #[serde(default)]
    pub geometry: GeometrySection,
    #[serde(default)]
    pub solids: Vec<SolidConfig>,
    #[serde(default)]
    pub fields: Vec<FieldEntryConfig>,
    pub source: Option<SourceParameters>,
    #[serde(default)]
    pub neutron: KindConfigPartial,
    #[serde(default)]
    pub proton: KindConfigPartial,
    #[serde(default)]
    pub electron: KindConfigPartial,
}

/// Fully resolved run options.
pub struct Options {
    pub jobnumber: u64,
    pub seed: u64,
    pub inpath: PathBuf,
    pub outpath: PathBuf,
    pub global: GlobalConfig,
    pub source: SourceParameters,
    pub neutron: KindConfig,
    pub proton: KindConfig,
    pub electron: KindConfig,
}

impl Options {
    pub fn kind(&self, kind: ParticleKind) -> &KindConfig {
        match kind {
            ParticleKind::NEUTRON => &self.neutron,
            ParticleKind::PROTON => &self.proton,
            ParticleKind::ELECTRON => &self.electron,
        }
    }
}

/// Positional command line: jobnumber inpath outpath seed, all optional.
pub struct CliArgs {
    pub jobnumber: u64,
    pub inpath: PathBuf,
    pub outpath: PathBuf,
    pub seed: Option<u64>,
}

/// Returns None when help was requested.
pub fn parse_cli(args: &[String]) -> Result<Option<CliArgs>, anyhow::Error> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("Usage:\nucntrack [jobnumber [path/to/in/files [path/to/out/files [seed]]]]");
        return Ok(None);
    }
    let jobnumber = match args.first() {
        Some(arg) => arg.parse().with_context(|| format!("Input error: bad jobnumber {}.", arg))?,
        None => 0,
    };
    let inpath = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("./in"));
    let outpath = PathBuf::from(args.get(2).map(String::as_str).unwrap_or("./out"));
    let seed = match args.get(3) {
        Some(arg) => Some(arg.parse().with_context(|| format!("Input error: bad seed {}.", arg))?),
        None => None,
    };
    Ok(Some(CliArgs { jobnumber, inpath, outpath, seed }))
}

/// Loads config.toml and assembles the immutable simulation structures.
pub fn input(cli: CliArgs) -> Result<(Options, Geometry, FieldManager), anyhow::Error> {
    let config_path = cli.inpath.join("config.toml");
    let config_string = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Input error: could not open {}.", config_path.display()))?;
    let config: InputFileConfig = toml::from_str(&config_string)
        .with_context(|| format!("Input error: could not parse {}.", config_path.display()))?;

    let global = config.global.clone();
    assert!(global.simcount >= 1, "Input error: simcount must be at least 1.");
    assert!(global.simtime >= 0., "Input error: simtime must not be negative.");
    assert!(global.num_threads > 0, "Input error: num_threads must be greater than zero.");
    assert!(global.num_chunks > 0, "Input error: num_chunks must be greater than zero.");
    assert!(global.b_target > 0., "Input error: b_target must be greater than zero.");
    assert!(global.secondaries <= 1, "Input error: secondaries must be 0 or 1.");

    let solid_specs: Vec<(String, String, i32, Option<(f64, f64)>)> = config
        .solids
        .iter()
        .map(|s| (s.name.clone(), s.material.clone(), s.priority, s.time_window))
        .collect();
    let registry = MaterialRegistry::new(
        &config.materials,
        &solid_specs,
        config.geometry.default_material.as_deref(),
    )?;
    let meshes: Vec<SolidMesh> = config
        .solids
        .iter()
        .map(|s| SolidMesh { vertices: s.vertices.clone(), indices: s.indices.clone() })
        .collect();
    let geometry = Geometry::new(registry, &meshes)?;

    let mut field = FieldManager::new();
    for entry in &config.fields {
        let ramp = entry.ramp.clone().unwrap_or_else(Ramp::constant);
        match &entry.source {
            FieldSourceConfig::TABLE { file } => {
                let table = TabulatedField::from_file(&cli.inpath.join(file))?;
                field.add_source(Box::new(table), ramp);
            }
            FieldSourceConfig::WIRE { p1, p2, current } => {
                field.add_source(
                    Box::new(WireSegment::new(Vector::from_array(*p1), Vector::from_array(*p2), *current)),
                    ramp,
                );
            }
            FieldSourceConfig::UNIFORM { b, e } => {
                field.add_source(
                    Box::new(UniformField {
                        b: Vector::from_array(*b),
                        e: Vector::from_array((*e).unwrap_or([0.; 3])),
                    }),
                    ramp,
                );
            }
        }
    }

    let source = match config.source {
        Some(source) => {
            source::energy_unit_factor(&source.energy_unit)?;
            assert!(source.energy_min >= 0. && source.energy_max >= source.energy_min,
                "Input error: source energy range is empty.");
            source
        }
        None => {
            if global.simtype == SimulationType::PARTICLE {
                bail!("Input error: simtype PARTICLE needs a [source] section.");
            }
            //diagnostic modes never sample the source
            SourceParameters {
                particle: ParticleKind::NEUTRON,
                volume: SourceVolume::BOX { x_min: 0., x_max: 0., y_min: 0., y_max: 0., z_min: 0., z_max: 0. },
                energy_min: 0.,
                energy_max: 0.,
                energy_unit: "NEV".to_string(),
                spectrum_exponent: 0.,
                angular: AngularDistribution::ISOTROPIC,
                polarization: 0,
                max_tries: 1,
            }
        }
    };

    let seed = cli.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .wrapping_add(cli.jobnumber)
    });

    let options = Options {
        jobnumber: cli.jobnumber,
        seed,
        inpath: cli.inpath,
        outpath: cli.outpath,
        global,
        source,
        neutron: KindConfig::merged(ParticleKind::NEUTRON, &config.neutron),
        proton: KindConfig::merged(ParticleKind::PROTON, &config.proton),
        electron: KindConfig::merged(ParticleKind::ELECTRON, &config.electron),
    };
    Ok((options, geometry, field))
}
