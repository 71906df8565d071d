//! Particle state, species attributes and the behavior contract the
//! trajectory integrator is generic over.

use std::sync::Arc;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::constants::{
    C_0, ELEMENTARY_CHARGE, GRAV_CONST, RELATIVISTIC_THRESHOLD,
};
use crate::field_manager::FieldManager;
use crate::geometry::Solid;
use crate::stepper::OdeRhs;

/// ODE state vector: (x, y, z, vx, vy, vz).
pub type State = [f64; 6];

pub fn position(y: &State) -> Vector3<f64> {
    Vector3::new(y[0], y[1], y[2])
}

pub fn velocity(y: &State) -> Vector3<f64> {
    Vector3::new(y[3], y[4], y[5])
}

/// Terminal fate of a particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopId {
    /// Integration still running.
    Unknown,
    /// Absorbed in the solid with this id.
    Absorbed(u32),
    /// Survived to the time or trajectory-length bound.
    NotFinished,
    /// Left the world bounding box.
    HitBoundaries,
    /// Stepper failure, solid-set inconsistency or degenerate crossing.
    NumericalError,
    /// Reached its proper lifetime.
    Decayed,
    /// The source could not place the particle.
    NoInitialPosition,
}

impl StopId {
    /// Numeric code used in the end log.
    pub fn code(&self) -> i32 {
        match self {
            StopId::Unknown => 0,
            StopId::Absorbed(id) => *id as i32,
            StopId::NotFinished => -1,
            StopId::HitBoundaries => -2,
            StopId::NumericalError => -3,
            StopId::Decayed => -4,
            StopId::NoInitialPosition => -5,
        }
    }
}

/// Immutable per-species attributes, SI units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeciesInfo {
    pub name: &'static str,
    /// Charge [C].
    pub charge: f64,
    /// Mass [kg].
    pub mass: f64,
    /// Magnetic moment [J/T].
    pub moment: f64,
}

impl SpeciesInfo {
    /// Kinetic energy in eV; relativistic above `RELATIVISTIC_THRESHOLD`.
    pub fn ekin_ev(&self, v: &Vector3<f64>) -> f64 {
        let speed = v.norm();
        let joules = if speed / C_0 < RELATIVISTIC_THRESHOLD {
            0.5 * self.mass * speed * speed
        } else {
            let gamma = 1.0 / (1.0 - speed * speed / (C_0 * C_0)).sqrt();
            self.mass * C_0 * C_0 * (gamma - 1.0)
        };
        joules / ELEMENTARY_CHARGE
    }

    /// Potential energy in eV: gravity, electric potential and the
    /// magnetic-moment term -p mu |B|.
    pub fn epot_ev(
        &self,
        t: f64,
        y: &State,
        pol: i8,
        field: Option<&FieldManager>,
    ) -> f64 {
        let mut joules = self.mass * GRAV_CONST * y[2];
        if let Some(field) = field {
            if self.moment != 0.0 && pol != 0 {
                let b = field.b_field(y[0], y[1], y[2], t);
                joules += -(pol as f64) * self.moment * b.magnitude();
            }
            if self.charge != 0.0 {
                let e = field.e_field(y[0], y[1], y[2], t);
                joules += self.charge * e.v;
            }
        }
        joules / ELEMENTARY_CHARGE
    }

    /// Total energy in eV.
    pub fn etot_ev(
        &self,
        t: f64,
        y: &State,
        pol: i8,
        field: Option<&FieldManager>,
    ) -> f64 {
        self.ekin_ev(&velocity(y)) + self.epot_ev(t, y, pol, field)
    }
}

/// Fully relativistic equations of motion for one species in the
/// configured fields: gravity, Lorentz force, magnetic-dipole force.
pub struct EquationOfMotion<'a> {
    pub species: SpeciesInfo,
    pub pol: i8,
    pub field: Option<&'a FieldManager>,
    /// Gravitational acceleration [m/s^2]; zero turns gravity off for
    /// validation studies.
    pub gravity: f64,
}

impl<'a> EquationOfMotion<'a> {
    pub fn new(species: SpeciesInfo, pol: i8, field: Option<&'a FieldManager>) -> Self {
        EquationOfMotion {
            species,
            pol,
            field,
            gravity: GRAV_CONST,
        }
    }
}

impl OdeRhs<6> for EquationOfMotion<'_> {
    fn derivs(&self, t: f64, y: &State, dydt: &mut State) {
        dydt[0] = y[3];
        dydt[1] = y[4];
        dydt[2] = y[5];

        let q = self.species.charge;
        let mu = self.species.moment;
        let m = self.species.mass;
        let pol = self.pol as f64;

        let mut f = Vector3::new(0.0, 0.0, -m * self.gravity);
        if let Some(field) = self.field {
            if q != 0.0 || (mu != 0.0 && self.pol != 0) {
                let b = field.b_field(y[0], y[1], y[2], t);
                if q != 0.0 {
                    let e = field.e_field(y[0], y[1], y[2], t);
                    let v = velocity(y);
                    f += q * (e.vector() + v.cross(&b.vector()));
                }
                if mu != 0.0 && self.pol != 0 {
                    f += pol * mu * b.magnitude_gradient();
                }
            }
        }

        // dv/dt = 1/(gamma m) (F - v (v.F) / c^2)
        let v = velocity(y);
        let rel = (1.0 - v.norm_squared() / (C_0 * C_0)).sqrt() / m;
        let vf = v.dot(&f) / (C_0 * C_0);
        dydt[3] = rel * (f.x - v.x * vf);
        dydt[4] = rel * (f.y - v.y * vf);
        dydt[5] = rel * (f.z - v.z * vf);
    }
}

/// One sub-segment of the trajectory handed to the reaction hooks.
/// Hooks may shorten it (move t2/y2) when they change the trajectory.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub t1: f64,
    pub y1: State,
    pub t2: f64,
    pub y2: State,
}

/// Outcome of a boundary-crossing reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitResult {
    /// The particle passed into the entering solid. `changed` reports
    /// whether the hook altered the trajectory (e.g. refraction).
    Transmit { changed: bool },
    /// The particle bounced back and stays in its current solid.
    Reflect,
    /// The particle stopped at the wall.
    Absorb,
}

/// Outcome of a bulk step reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Unchanged,
    /// The trajectory was altered (bulk scattering); integration restarts
    /// from the shortened segment end.
    Deflected,
    /// The particle was absorbed in the solid it is moving through.
    Absorbed,
}

/// Species-specific reactions: the capability record carried by each
/// particle. The integrator knows nothing else about species physics.
pub trait ParticleBehavior: Send + Sync {
    /// Reaction at a material boundary. May mutate the segment end, the
    /// polarisation and the spin-flip counter.
    #[allow(clippy::too_many_arguments)]
    fn on_hit(
        &self,
        seg: &mut Segment,
        normal: &Vector3<f64>,
        leaving: &Solid,
        entering: &Solid,
        pol: &mut i8,
        n_spinflip: &mut u32,
        rng: &mut StdRng,
    ) -> HitResult;

    /// Reaction along a collision-free sub-segment inside `current`.
    fn on_step(&self, seg: &mut Segment, current: &Solid, rng: &mut StdRng) -> StepResult;

    /// Called once when the particle reaches its lifetime; returns the
    /// secondary particles to attach to the parent.
    fn decay(&self, _parent: &Particle, _rng: &mut StdRng) -> Vec<Particle> {
        Vec::new()
    }
}

/// A particle instance: species attributes, start/end snapshots, counters
/// and the behavior record. Owns its secondaries exclusively.
pub struct Particle {
    pub species: SpeciesInfo,
    pub number: u32,
    pub status: StopId,
    /// Proper lifetime drawn at creation [s].
    pub tau: f64,
    /// Trajectory-length bound [m].
    pub max_traj: f64,
    pub t_start: f64,
    pub t_end: f64,
    pub y_start: State,
    pub y_end: State,
    pub pol_start: i8,
    pub pol_end: i8,
    /// Largest total energy seen along the trajectory [eV].
    pub h_max: f64,
    pub traj_length: f64,
    pub n_hit: u32,
    pub n_spinflip: u32,
    pub n_step: u64,
    /// Wall-clock seconds spent integrating this particle.
    pub computing_time: f64,
    pub secondaries: Vec<Particle>,
    pub behavior: Arc<dyn ParticleBehavior>,
}

impl Particle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        species: SpeciesInfo,
        number: u32,
        t: f64,
        y: State,
        pol: i8,
        tau: f64,
        max_traj: f64,
        behavior: Arc<dyn ParticleBehavior>,
    ) -> Particle {
        Particle {
            species,
            number,
            status: StopId::Unknown,
            tau,
            max_traj,
            t_start: t,
            t_end: t,
            y_start: y,
            y_end: y,
            pol_start: pol,
            pol_end: pol,
            h_max: 0.0,
            traj_length: 0.0,
            n_hit: 0,
            n_spinflip: 0,
            n_step: 0,
            computing_time: 0.0,
            secondaries: Vec::new(),
            behavior,
        }
    }

    pub fn h_start_ev(&self, field: Option<&FieldManager>) -> f64 {
        self.species
            .etot_ev(self.t_start, &self.y_start, self.pol_start, field)
    }

    pub fn h_end_ev(&self, field: Option<&FieldManager>) -> f64 {
        self.species
            .etot_ev(self.t_end, &self.y_end, self.pol_end, field)
    }

    pub fn e_start_ev(&self) -> f64 {
        self.species.ekin_ev(&velocity(&self.y_start))
    }

    pub fn e_end_ev(&self) -> f64 {
        self.species.ekin_ev(&velocity(&self.y_end))
    }
}

impl std::fmt::Debug for Particle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Particle")
            .field("species", &self.species.name)
            .field("number", &self.number)
            .field("status", &self.status)
            .field("t_end", &self.t_end)
            .field("y_end", &self.y_end)
            .field("secondaries", &self.secondaries.len())
            .finish()
    }
}
