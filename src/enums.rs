use super::*;

/// Kind of particle being tracked. Fixes mass, charge, magnetic moment and
/// whether the equations of motion are classical or relativistic.
#[derive(Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum ParticleKind {
    NEUTRON,
    PROTON,
    ELECTRON,
}

impl ParticleKind {
    pub fn mass(&self) -> f64 {
        match self {
            ParticleKind::NEUTRON => M_N,
            ParticleKind::PROTON => M_P,
            ParticleKind::ELECTRON => M_E,
        }
    }

    /// Signed charge in Coulombs; zero for neutrons.
    pub fn charge(&self) -> f64 {
        match self {
            ParticleKind::NEUTRON => 0.,
            ParticleKind::PROTON => Q_E,
            ParticleKind::ELECTRON => -Q_E,
        }
    }

    /// Magnitude of the magnetic moment in J/T; zero for proton and electron here.
    pub fn magnetic_moment(&self) -> f64 {
        match self {
            ParticleKind::NEUTRON => MU_N,
            _ => 0.,
        }
    }

    pub fn relativistic(&self) -> bool {
        matches!(self, ParticleKind::ELECTRON)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParticleKind::NEUTRON => "neutron",
            ParticleKind::PROTON => "proton",
            ParticleKind::ELECTRON => "electron",
        }
    }
}

impl fmt::Display for ParticleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Top-level mode of the program run.
#[derive(Deserialize, PartialEq, Clone, Copy, Debug)]
pub enum SimulationType {
    /// Track particles through fields and geometry.
    PARTICLE,
    /// Tabulate the magnetic field on an (r, z) grid and exit.
    BF_ONLY,
    /// Tabulate fields on a planar cut and exit.
    BF_CUT,
    /// Sample random segments against the geometry and exit.
    GEOMETRY,
    /// Tabulate the micro-roughness distribution over outgoing angles and exit.
    MR_THETA_OUT_ANGLE,
    /// Tabulate the integrated micro-roughness probability over incident angle and energy and exit.
    MR_THETA_I_ENERGY,
}

impl fmt::Display for SimulationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SimulationType::PARTICLE => write!(f, "particle tracking"),
            SimulationType::BF_ONLY => write!(f, "magnetic field tabulation"),
            SimulationType::BF_CUT => write!(f, "field cut tabulation"),
            SimulationType::GEOMETRY => write!(f, "geometry sampling"),
            SimulationType::MR_THETA_OUT_ANGLE => write!(f, "micro-roughness solid-angle tabulation"),
            SimulationType::MR_THETA_I_ENERGY => write!(f, "integrated micro-roughness tabulation"),
        }
    }
}

/// Why a particle stopped. Negative codes are error-like, non-negative are
/// physical terminations.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum StopCode {
    NOT_CATEGORIZED,
    BULK_ABSORBED,
    SURFACE_ABSORBED,
    OUT_OF_TIME,
    LEFT_BOUNDING_BOX,
    INTEGRATION_ERROR,
    DECAYED,
    NO_INITIAL_POSITION,
    GEOMETRY_PREDICATE_ERROR,
    GEOMETRY_ERROR,
}

impl StopCode {
    pub fn id(&self) -> i32 {
        match self {
            StopCode::NOT_CATEGORIZED => 0,
            StopCode::BULK_ABSORBED => 1,
            StopCode::SURFACE_ABSORBED => 2,
            StopCode::OUT_OF_TIME => -1,
            StopCode::LEFT_BOUNDING_BOX => -2,
            StopCode::INTEGRATION_ERROR => -3,
            StopCode::DECAYED => -4,
            StopCode::NO_INITIAL_POSITION => -5,
            StopCode::GEOMETRY_PREDICATE_ERROR => -6,
            StopCode::GEOMETRY_ERROR => -7,
        }
    }

    pub fn all() -> [StopCode; 10] {
        [
            StopCode::SURFACE_ABSORBED,
            StopCode::BULK_ABSORBED,
            StopCode::NOT_CATEGORIZED,
            StopCode::OUT_OF_TIME,
            StopCode::LEFT_BOUNDING_BOX,
            StopCode::INTEGRATION_ERROR,
            StopCode::DECAYED,
            StopCode::NO_INITIAL_POSITION,
            StopCode::GEOMETRY_PREDICATE_ERROR,
            StopCode::GEOMETRY_ERROR,
        ]
    }
}

impl fmt::Display for StopCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StopCode::NOT_CATEGORIZED => write!(f, "was not categorized"),
            StopCode::BULK_ABSORBED => write!(f, "was absorbed in a material"),
            StopCode::SURFACE_ABSORBED => write!(f, "was absorbed on a surface"),
            StopCode::OUT_OF_TIME => write!(f, "did not finish"),
            StopCode::LEFT_BOUNDING_BOX => write!(f, "hit the outer boundaries"),
            StopCode::INTEGRATION_ERROR => write!(f, "produced an integration error"),
            StopCode::DECAYED => write!(f, "decayed"),
            StopCode::NO_INITIAL_POSITION => write!(f, "found no initial position"),
            StopCode::GEOMETRY_PREDICATE_ERROR => write!(f, "exhausted the surface epsilon push"),
            StopCode::GEOMETRY_ERROR => write!(f, "encountered a geometry error"),
        }
    }
}

/// Adaptive ODE driver to use for trajectory integration.
#[derive(Deserialize, PartialEq, Clone, Copy, Debug)]
pub enum StepperKind {
    /// Embedded fifth-order Runge-Kutta with Cash-Karp coefficients.
    CASH_KARP,
    /// Modified-midpoint steps with Richardson extrapolation.
    BULIRSCH_STOER,
}

impl fmt::Display for StepperKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StepperKind::CASH_KARP => write!(f, "Cash-Karp Runge-Kutta"),
            StepperKind::BULIRSCH_STOER => write!(f, "Bulirsch-Stoer"),
        }
    }
}

/// Angular model for the diffuse fraction of a surface reflection.
#[derive(Deserialize, PartialEq, Clone, Copy, Debug)]
pub enum DiffuseModel {
    /// Cosine-weighted outgoing direction with a fixed per-bounce probability.
    LAMBERT { probability: f64 },
    /// Steyerl micro-roughness model; b is the rms roughness and w the
    /// correlation length, both in meters.
    MICRO_ROUGHNESS { b: f64, w: f64 },
}

impl fmt::Display for DiffuseModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DiffuseModel::LAMBERT { probability } => {
                write!(f, "Lambert diffuse reflection with probability {}", probability)
            }
            DiffuseModel::MICRO_ROUGHNESS { b, w } => {
                write!(f, "micro-roughness diffuse reflection with b = {} m, w = {} m", b, w)
            }
        }
    }
}
