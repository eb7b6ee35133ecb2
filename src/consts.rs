use std::f64::consts::PI;

//Physical constants, SI units
/// Elementary charge in Coulombs.
pub const Q_E: f64 = 1.602176634E-19;
/// One electron-volt in Joules.
pub const EV: f64 = Q_E;
/// One nano-electron-volt in Joules.
pub const NEV: f64 = EV * 1E-9;
/// Neutron mass in kilograms.
pub const M_N: f64 = 1.67492749804E-27;
/// Proton mass in kilograms.
pub const M_P: f64 = 1.67262192369E-27;
/// Electron mass in kilograms.
pub const M_E: f64 = 9.1093837015E-31;
/// Magnitude of the neutron magnetic moment in Joules/Tesla.
pub const MU_N: f64 = 0.96623651E-26;
/// Neutron gyromagnetic ratio in radians/(second Tesla).
pub const GAMMA_N: f64 = 1.83247185E8;
/// Standard gravitational acceleration in meters/second^2.
pub const GRAV: f64 = 9.80665;
/// Speed of light in meters/second.
pub const C_0: f64 = 299792458.;
/// Reduced Planck constant in Joule seconds.
pub const HBAR: f64 = 1.054571817E-34;
/// Vacuum permeability in Tesla meters/Ampere.
pub const MU_0: f64 = 4E-7 * PI;
/// Free neutron lifetime in seconds.
pub const TAU_N: f64 = 885.7;
/// Neutron beta-decay electron endpoint energy in Joules.
pub const DECAY_E_MAX_ELECTRON: f64 = 782E3 * EV;
/// Maximum proton recoil energy from neutron decay in Joules.
pub const DECAY_E_MAX_PROTON: f64 = 751. * EV;
/// Reference velocity of the 1/v absorption law in meters/second.
pub const V_THERMAL: f64 = 2200.;

//Field table unit conversions; tables are written in CGS-like units
/// Table lengths are in centimeters.
pub const TABLE_LENGTH_CONV: f64 = 1E-2;
/// Table magnetic fields are in Gauss.
pub const TABLE_B_CONV: f64 = 1E-4;
/// Table electric fields are in Volts/centimeter.
pub const TABLE_E_CONV: f64 = 1E2;

/// Radius below which cylindrical 1/r terms switch to their axis limits.
pub const R_AXIS_EPS: f64 = 1E-10;
/// Push applied along the surface normal after a resolved collision.
pub const SURFACE_PUSH: f64 = 1E-9;
/// 2 pi, for phase and solid angle loops.
pub const TWO_PI: f64 = 2. * PI;
