//! Monte-Carlo driver: runs a batch of particles through the trajectory
//! integrator, sequentially or fanned out over a thread pool.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::constants::GRAV_CONST;
use crate::error::Result;
use crate::field_manager::FieldManager;
use crate::geometry::Geometry;
use crate::integrator::TrajectoryIntegrator;
use crate::output::Output;
use crate::particle::{Particle, StopId};

/// Run-wide parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Absolute simulation end time [s].
    pub t_max: f64,
    /// Base seed; particle n integrates with seed + n so runs reproduce
    /// regardless of scheduling.
    pub seed: u64,
    /// Gravitational acceleration [m/s^2].
    pub gravity: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            t_max: f64::INFINITY,
            seed: 0,
            gravity: GRAV_CONST,
        }
    }
}

/// A complete simulation setup. Geometry and fields are immutable and
/// shared by all particle tasks.
pub struct Model {
    pub geometry: Geometry,
    pub field: Option<FieldManager>,
    pub settings: RunSettings,
}

impl Model {
    fn integrator(&self) -> TrajectoryIntegrator<'_> {
        TrajectoryIntegrator::new(&self.geometry, self.field.as_ref(), self.settings.t_max)
            .with_gravity(self.settings.gravity)
    }

    /// Integrate all particles in order on the calling thread.
    pub fn run(&self, particles: &mut [Particle], output: &Mutex<Output>) {
        let integrator = self.integrator();
        for particle in particles.iter_mut() {
            self.run_one(&integrator, particle, output);
        }
    }

    /// Integrate particles fanned out across the rayon thread pool.
    /// Writes to the shared sinks are serialised; per-particle events
    /// keep their order, interleaving across particles is unspecified.
    pub fn run_parallel(&self, particles: &mut [Particle], output: &Mutex<Output>) {
        let integrator = self.integrator();
        particles.par_iter_mut().for_each(|particle| {
            self.run_one(&integrator, particle, output);
        });
    }

    /// One particle and, after it finished, its decay products. Failures
    /// are logged and never abort the rest of the batch.
    fn run_one(&self, integrator: &TrajectoryIntegrator, particle: &mut Particle, output: &Mutex<Output>) {
        let mut rng = StdRng::seed_from_u64(
            self.settings.seed.wrapping_add(particle.number as u64),
        );
        if let Err(e) = self.integrate_family(integrator, particle, &mut rng, output) {
            error!(
                particle = particle.number,
                error = %e,
                "output failure while integrating particle"
            );
        }
    }

    fn integrate_family(
        &self,
        integrator: &TrajectoryIntegrator,
        particle: &mut Particle,
        rng: &mut StdRng,
        output: &Mutex<Output>,
    ) -> Result<()> {
        if particle.status != StopId::Unknown {
            // e.g. the source failed to place it; record and move on
            output.lock().unwrap().write_end(particle, self.field.as_ref())?;
            return Ok(());
        }
        integrator.integrate(particle, rng, output)?;
        let mut secondaries = std::mem::take(&mut particle.secondaries);
        for secondary in secondaries.iter_mut() {
            self.integrate_family(integrator, secondary, rng, output)?;
        }
        particle.secondaries = secondaries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Solid;
    use crate::species::{Ballistic, NeutronDecay, NEUTRON};
    use std::sync::Arc;

    fn drift_batch(n: u32) -> Vec<Particle> {
        (0..n)
            .map(|i| {
                Particle::new(
                    NEUTRON,
                    i,
                    0.0,
                    [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                    0,
                    1e9,
                    1e30,
                    Arc::new(Ballistic),
                )
            })
            .collect()
    }

    fn free_model(t_max: f64) -> Model {
        Model {
            geometry: Geometry::new(Solid::default_solid()),
            field: None,
            settings: RunSettings {
                t_max,
                seed: 1,
                gravity: 0.0,
            },
        }
    }

    #[test]
    fn test_batch_runs_every_particle() {
        let model = free_model(1.0);
        let mut particles = drift_batch(4);
        let output = Mutex::new(Output::disabled());
        model.run(&mut particles, &output);
        for p in &particles {
            assert_eq!(p.status, StopId::NotFinished);
            assert!((p.y_end[0] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let model = free_model(1.0);
        let mut sequential = drift_batch(6);
        let mut parallel = drift_batch(6);
        let output = Mutex::new(Output::disabled());
        model.run(&mut sequential, &output);
        model.run_parallel(&mut parallel, &output);
        for (a, b) in sequential.iter().zip(&parallel) {
            assert_eq!(a.status, b.status);
            assert_eq!(a.y_end, b.y_end);
            assert_eq!(a.n_step, b.n_step);
        }
    }

    #[test]
    fn test_decay_products_are_integrated() {
        // the relativistic electron secondary is resampled every 0.01 m,
        // so give it only a short post-decay window
        let model = free_model(1.0005e-2);
        let mut particles = vec![Particle::new(
            NEUTRON,
            0,
            0.0,
            [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            1,
            1e-2,
            1e30,
            Arc::new(NeutronDecay),
        )];
        let output = Mutex::new(Output::disabled());
        model.run(&mut particles, &output);
        let parent = &particles[0];
        assert_eq!(parent.status, StopId::Decayed);
        assert_eq!(parent.secondaries.len(), 2);
        for s in &parent.secondaries {
            // the secondaries ran until the simulation end time
            assert_eq!(s.status, StopId::NotFinished);
            assert!(s.t_end > parent.t_end);
        }
    }

    #[test]
    fn test_preterminated_particle_is_skipped() {
        let model = free_model(1.0);
        let mut p = drift_batch(1);
        p[0].status = StopId::NoInitialPosition;
        let output = Mutex::new(Output::disabled());
        model.run(&mut p, &output);
        assert_eq!(p[0].status, StopId::NoInitialPosition);
        assert_eq!(p[0].n_step, 0);
    }
}
