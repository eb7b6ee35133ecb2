#![allow(non_camel_case_types)]

use std::fmt;

//Error handling crate
use anyhow::{anyhow, bail, Context, Result};

//Serializing/Deserializing crate
use serde::*;

//Load internal modules
pub mod consts;
pub mod diagnostics;
pub mod enums;
pub mod fields;
pub mod geometry;
pub mod input;
pub mod integrator;
pub mod material;
pub mod mc;
pub mod microroughness;
pub mod output;
pub mod particle;
pub mod physics;
pub mod source;
pub mod spin;
pub mod structs;
pub mod surface;
pub mod tests;

pub use crate::consts::*;
pub use crate::enums::*;
pub use crate::fields::{FieldManager, FieldSource, Ramp, TabulatedField, UniformField, WireSegment};
pub use crate::geometry::{Geometry, Intersection, SolidMesh, Triangle};
pub use crate::input::{
    BCutConfig, BScanConfig, CliArgs, GlobalConfig, KindConfig, MrEnergyConfig, MrSolidAngleConfig, Options,
    SolidConfig,
};
pub use crate::integrator::{odeint, DenseOutput, DenseSample, OdeOptions, OdeSolution};
pub use crate::material::{Material, MaterialParameters, MaterialRegistry, Solid};
pub use crate::mc::McGenerator;
pub use crate::output::{EndRecord, OutputWriter, ParticleRecord, Summary, TrackRow};
pub use crate::particle::{equations_of_motion, integrate_step, ParticleState};
pub use crate::physics::{run_simulation, simulate_particle, simulate_particle_index, SimulationContext};
pub use crate::source::{AngularDistribution, SourceParameters, SourceVolume};
pub use crate::spin::SpinTracker;
pub use crate::structs::{BFieldValue, EFieldValue, SquareMatrix3, Vector};
