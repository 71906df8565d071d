//! ucntrack: Monte-Carlo trajectory engine for ultra-cold neutrons,
//! protons and electrons in electromagnetic fields and triangulated
//! geometries.
//!
//! The crate is organised around five cooperating pieces: field sources
//! summed by a [`FieldManager`], a triangulated [`Geometry`] answering
//! segment and containment queries, the adaptive [`Dopr853`] stepper with
//! dense output, the [`TrajectoryIntegrator`] driving one particle at a
//! time, and the [`ParticleBehavior`] capability record supplying the
//! species-specific reactions.

mod analytic_field;
mod bounding_box;
pub mod constants;
mod error;
mod field;
mod field_2d;
mod field_3d;
mod field_manager;
mod geometry;
mod integrator;
mod mesh;
mod model;
mod output;
mod particle;
mod species;
mod stepper;

pub use analytic_field::{ExponentialFieldX, LinearFieldZ, UniformField};
pub use bounding_box::BoundingBox;
pub use error::{Error, Result};
pub use field::{
    BFieldValue, EFieldValue, FieldSource, Ramp, RampCurve, TableOptions, UnitConversion,
};
pub use field_2d::AxisymmetricField;
pub use field_3d::GriddedField3D;
pub use field_manager::FieldManager;
pub use geometry::{
    CollisionRecord, Geometry, Material, Solid, DEFAULT_SOLID_ID,
};
pub use integrator::TrajectoryIntegrator;
pub use mesh::{SegmentHit, Triangle, TriangleMesh};
pub use model::{Model, RunSettings};
pub use output::{Output, OutputConfig, RunContext};
pub use particle::{
    position, velocity, EquationOfMotion, HitResult, Particle, ParticleBehavior,
    Segment, SpeciesInfo, State, StepResult, StopId,
};
pub use species::{
    AbsorbAll, Ballistic, NeutronDecay, SpecularReflector, ELECTRON, NEUTRON, PROTON,
};
pub use stepper::{Dopr853, OdeRhs, StepController, StepError, StepperStats};
