//! The trajectory integrator: drives the adaptive stepper, resamples each
//! accepted step against the geometry, localises surface crossings by
//! recursive bisection and dispatches the particle's reaction hooks.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Instant;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::constants::{MAX_SAMPLE_DIST, MIN_SAMPLE_DIST, REFLECT_TOLERANCE};
use crate::error::Result;
use crate::field_manager::FieldManager;
use crate::geometry::Geometry;
use crate::output::Output;
use crate::particle::{
    position, velocity, EquationOfMotion, HitResult, Particle, ParticleBehavior,
    Segment, State, StepResult, StopId,
};
use crate::stepper::Dopr853;

/// Absolute tolerance handed to the stepper.
const STEPPER_ATOL: f64 = 1e-13;

/// Bisection depth after which a crossing is treated as localised.
const MAX_BISECT_ITERATIONS: u32 = 99;

/// Integrates single particles to completion against a fixed world.
/// Shareable across particle tasks; all mutable state lives in the
/// particle and the per-call locals.
pub struct TrajectoryIntegrator<'a> {
    geometry: &'a Geometry,
    field: Option<&'a FieldManager>,
    /// Absolute end time of the simulation [s].
    pub t_max: f64,
    /// Gravitational acceleration [m/s^2]; settable to zero for
    /// validation studies.
    pub gravity: f64,
}

impl<'a> TrajectoryIntegrator<'a> {
    pub fn new(geometry: &'a Geometry, field: Option<&'a FieldManager>, t_max: f64) -> Self {
        TrajectoryIntegrator {
            geometry,
            field,
            t_max,
            gravity: crate::constants::GRAV_CONST,
        }
    }

    pub fn with_gravity(mut self, gravity: f64) -> Self {
        self.gravity = gravity;
        self
    }

    /// Integrate one particle until its terminal status is decided.
    ///
    /// Numerical failures terminate the particle with a status code and
    /// never return `Err`; only output I/O failures do.
    pub fn integrate(
        &self,
        particle: &mut Particle,
        rng: &mut StdRng,
        output: &Mutex<Output>,
    ) -> Result<()> {
        let wall_clock = Instant::now();
        let behavior = particle.behavior.clone();

        let mut t = particle.t_end;
        let mut y = particle.y_end;
        let mut pol = particle.pol_end;
        let t_decay = particle.t_start + particle.tau;

        info!(
            particle = particle.number,
            species = particle.species.name,
            t,
            e_ev = particle.species.ekin_ev(&velocity(&y)),
            tau = particle.tau,
            "starting integration at ({}, {}, {})",
            y[0],
            y[1],
            y[2]
        );

        let mut currentsolids: BTreeSet<u32> =
            self.geometry.solids_at(t, position(&y)).into_iter().collect();
        particle.h_max = particle
            .h_max
            .max(particle.species.etot_ev(t, &y, pol, self.field));

        let mut stepper = Dopr853::new(t, y, STEPPER_ATOL, 0.0);
        let speed0 = velocity(&y).norm();
        let mut h = if speed0 > 0.0 { 0.001 / speed0 } else { 1e-3 };

        let snapshot_times = output.lock().unwrap().config.snapshot_times.clone();
        let mut next_snapshot = snapshot_times.partition_point(|&ts| ts < t);
        let mut last_track = position(&y);
        self.log_track(particle, t, &y, pol, output)?;
        let mut percent = 0u32;

        while particle.status == StopId::Unknown {
            let time_eps = 1e-12 * t.abs().max(1.0);
            // lifetime and simulation bounds; checked here so a clamped
            // step can never underflow the stepper
            if t >= t_decay - time_eps {
                particle.status = StopId::Decayed;
                break;
            }
            if t >= self.t_max - time_eps || particle.traj_length >= particle.max_traj {
                particle.status = StopId::NotFinished;
                break;
            }
            h = h.min(t_decay - t).min(self.t_max - t);

            let eom = EquationOfMotion {
                species: particle.species,
                pol,
                field: self.field,
                gravity: self.gravity,
            };
            if let Err(e) = stepper.step(h, &eom) {
                warn!(
                    particle = particle.number,
                    t, error = %e, "stepper failed"
                );
                particle.status = StopId::NumericalError;
                break;
            }
            particle.n_step += 1;

            // walk the accepted step in pieces no longer than the sample
            // distance, interpolating intermediate states
            let t_now = stepper.t();
            let y_now = *stepper.y();
            let mut t1 = t;
            let mut y1 = y;
            let mut changed = false;
            while t1 < t_now {
                let v1 = velocity(&y1).norm();
                let mut t2 = if v1 > 0.0 {
                    t1 + MAX_SAMPLE_DIST / v1
                } else {
                    t_now
                };
                let y2 = if t2 >= t_now {
                    t2 = t_now;
                    y_now
                } else {
                    dense_state(&stepper, t2)
                };
                let mut seg = Segment { t1, y1, t2, y2 };

                changed = self.resolve(
                    &mut seg,
                    &stepper,
                    behavior.as_ref(),
                    particle,
                    &mut pol,
                    &mut currentsolids,
                    rng,
                    output,
                    1,
                )?;

                particle.traj_length +=
                    (position(&seg.y2) - position(&seg.y1)).norm();
                particle.h_max = particle.h_max.max(particle.species.etot_ev(
                    seg.t2,
                    &seg.y2,
                    pol,
                    self.field,
                ));

                while next_snapshot < snapshot_times.len()
                    && seg.t1 <= snapshot_times[next_snapshot]
                    && seg.t2 > snapshot_times[next_snapshot]
                {
                    let ts = snapshot_times[next_snapshot];
                    let ys = dense_state(&stepper, ts);
                    debug!(particle = particle.number, t = ts, "snapshot");
                    output
                        .lock()
                        .unwrap()
                        .write_snapshot(particle, ts, &ys, pol, self.field)?;
                    next_snapshot += 1;
                }

                let p2 = position(&seg.y2);
                if (p2 - last_track).norm() >= MIN_SAMPLE_DIST {
                    self.log_track(particle, seg.t2, &seg.y2, pol, output)?;
                    last_track = p2;
                }

                if changed {
                    t = seg.t2;
                    y = seg.y2;
                    break;
                }
                t1 = seg.t2;
                y1 = seg.y2;
            }
            if !changed {
                t = t_now;
                y = y_now;
            } else if particle.status == StopId::Unknown {
                stepper.reset(t, y);
            }

            let progress = ((t - particle.t_start) / particle.tau)
                .max((t - particle.t_start) / (self.t_max - particle.t_start))
                .max(particle.traj_length / particle.max_traj);
            let decile = (progress * 10.0).floor() as u32;
            if decile > percent {
                percent = decile;
                debug!(particle = particle.number, "{}0 percent done", decile);
            }

            h = stepper.h_next();
        }

        particle.t_end = t;
        particle.y_end = y;
        particle.pol_end = pol;
        particle.computing_time += wall_clock.elapsed().as_secs_f64();
        self.log_track(particle, t, &y, pol, output)?;
        output.lock().unwrap().write_end(particle, self.field)?;

        if particle.status == StopId::Decayed {
            info!(particle = particle.number, t, "particle decayed");
            let secondaries = behavior.decay(particle, rng);
            particle.secondaries.extend(secondaries);
        }

        info!(
            particle = particle.number,
            status = ?particle.status,
            t_end = particle.t_end,
            traj_length = particle.traj_length,
            n_hit = particle.n_hit,
            n_step = particle.n_step,
            "integration finished"
        );
        Ok(())
    }

    /// Check one sub-segment for boundary crossings and bulk reactions.
    ///
    /// Returns true if the trajectory was materially changed; the segment
    /// end then holds the new integration endpoint. Crossings that are
    /// not yet localised are bisected around the first collision with a
    /// small iteration-dependent skew, so the recursion converges even
    /// when the collision sits at an exact binary fraction of the
    /// segment.
    #[allow(clippy::too_many_arguments)]
    fn resolve(
        &self,
        seg: &mut Segment,
        stepper: &Dopr853<6>,
        behavior: &dyn ParticleBehavior,
        particle: &mut Particle,
        pol: &mut i8,
        currentsolids: &mut BTreeSet<u32>,
        rng: &mut StdRng,
        output: &Mutex<Output>,
        iteration: u32,
    ) -> Result<bool> {
        if !self.geometry.in_bounds(&position(&seg.y1)) {
            warn!(
                particle = particle.number,
                t = seg.t1,
                "particle left the world bounding box at ({}, {}, {})",
                seg.y1[0],
                seg.y1[1],
                seg.y1[2]
            );
            particle.status = StopId::HitBoundaries;
            return Ok(true);
        }

        let records = self.geometry.collisions(
            seg.t1,
            position(&seg.y1),
            seg.t2,
            position(&seg.y2),
        );
        if records.is_empty() {
            return self.bulk_step(seg, behavior, particle, currentsolids, rng);
        }

        let first = records[0];
        let delta = position(&seg.y2) - position(&seg.y1);
        let distnormal = delta.dot(&first.normal);
        let localised = (first.s * distnormal.abs() < REFLECT_TOLERANCE
            && (1.0 - first.s) * distnormal.abs() < REFLECT_TOLERANCE)
            || iteration > MAX_BISECT_ITERATIONS;

        if !localised {
            return self.bisect(
                seg,
                stepper,
                behavior,
                particle,
                pol,
                currentsolids,
                rng,
                output,
                iteration,
                first.s,
            );
        }

        // touching surfaces: two different solids reported at the same s
        if records.len() > 1
            && records[1].s == first.s
            && records[1].solid_id != first.solid_id
        {
            self.numerical_error(
                particle,
                seg,
                format!(
                    "hit solids '{}' and '{}' at once; check the geometry for touching surfaces",
                    self.solid_name(first.solid_id),
                    self.solid_name(records[1].solid_id)
                ),
            );
            return Ok(true);
        }
        if distnormal == 0.0 {
            self.numerical_error(
                particle,
                seg,
                format!(
                    "crossing surface of '{}' with a track parallel to it",
                    self.solid_name(first.solid_id)
                ),
            );
            return Ok(true);
        }

        let top = *currentsolids
            .iter()
            .next_back()
            .expect("current-solid set always holds the default solid");
        let entering_wall = distnormal < 0.0;

        // consistency of the crossing with the current-solid set
        if entering_wall && currentsolids.contains(&first.solid_id) {
            self.numerical_error(
                particle,
                seg,
                format!(
                    "entering '{}' which it already is inside of; \
                     overlapping solids with equal priority?",
                    self.solid_name(first.solid_id)
                ),
            );
            return Ok(true);
        }
        if !entering_wall && !currentsolids.contains(&first.solid_id) {
            self.numerical_error(
                particle,
                seg,
                format!(
                    "leaving '{}' which it never entered",
                    self.solid_name(first.solid_id)
                ),
            );
            return Ok(true);
        }

        let (leaving_id, entering_id, reaction_admitted) = if entering_wall {
            // a reaction happens only when the entered solid takes priority
            (top, first.solid_id, first.solid_id > top)
        } else {
            // on exit only the active solid can react; the particle then
            // moves on inside the next solid on the stack
            let below_top = currentsolids
                .iter()
                .rev()
                .nth(1)
                .copied()
                .unwrap_or(self.geometry.default_solid().id);
            (first.solid_id, below_top, first.solid_id == top)
        };

        let mut result = HitResult::Transmit { changed: false };
        if reaction_admitted {
            let leaving = match self.geometry.solid(leaving_id) {
                Some(s) => s.clone(),
                None => {
                    self.numerical_error(
                        particle,
                        seg,
                        format!("unknown solid id {}", leaving_id),
                    );
                    return Ok(true);
                }
            };
            let entering = match self.geometry.solid(entering_id) {
                Some(s) => s.clone(),
                None => {
                    self.numerical_error(
                        particle,
                        seg,
                        format!("unknown solid id {}", entering_id),
                    );
                    return Ok(true);
                }
            };
            let pol_before = *pol;
            let y1_before = seg.y1;
            result = behavior.on_hit(
                seg,
                &first.normal,
                &leaving,
                &entering,
                pol,
                &mut particle.n_spinflip,
                rng,
            );
            particle.n_hit += 1;
            output.lock().unwrap().write_hit(
                particle,
                seg.t1,
                &y1_before,
                pol_before,
                &seg.y2,
                *pol,
                &first.normal,
                leaving.id,
                entering.id,
            )?;
        }

        match result {
            HitResult::Transmit { changed } => {
                if entering_wall {
                    currentsolids.insert(first.solid_id);
                } else {
                    currentsolids.remove(&first.solid_id);
                }
                if changed {
                    return Ok(true);
                }
            }
            HitResult::Reflect => return Ok(true),
            HitResult::Absorb => {
                let wall = if entering_wall { first.solid_id } else { leaving_id };
                info!(
                    particle = particle.number,
                    t = seg.t2,
                    solid = %self.solid_name(wall),
                    "absorbed at surface"
                );
                particle.status = StopId::Absorbed(wall);
                return Ok(true);
            }
        }

        // crossing did not change the path: still check the bulk
        self.bulk_step(seg, behavior, particle, currentsolids, rng)
    }

    /// Cut the segment just before and just after the first collision and
    /// recurse on the pieces, propagating any truncation upward.
    #[allow(clippy::too_many_arguments)]
    fn bisect(
        &self,
        seg: &mut Segment,
        stepper: &Dopr853<6>,
        behavior: &dyn ParticleBehavior,
        particle: &mut Particle,
        pol: &mut i8,
        currentsolids: &mut BTreeSet<u32>,
        rng: &mut StdRng,
        output: &Mutex<Output>,
        iteration: u32,
        s: f64,
    ) -> Result<bool> {
        let skew = 0.01 * iteration as f64;
        let mut left_t = seg.t1;
        let mut left_y = seg.y1;

        let t_cut1 = seg.t1 + (seg.t2 - seg.t1) * s * (1.0 - skew);
        if t_cut1 > seg.t1 && t_cut1 < seg.t2 {
            let y_cut = dense_state(stepper, t_cut1);
            let mut sub = Segment {
                t1: seg.t1,
                y1: seg.y1,
                t2: t_cut1,
                y2: y_cut,
            };
            if self.resolve(
                &mut sub,
                stepper,
                behavior,
                particle,
                pol,
                currentsolids,
                rng,
                output,
                iteration + 1,
            )? {
                seg.t2 = sub.t2;
                seg.y2 = sub.y2;
                return Ok(true);
            }
            left_t = t_cut1;
            left_y = y_cut;
        }

        let t_cut2 = seg.t1 + (seg.t2 - seg.t1) * s * (1.0 + skew);
        if t_cut2 > left_t && t_cut2 < seg.t2 {
            let y_cut = dense_state(stepper, t_cut2);
            let mut sub = Segment {
                t1: left_t,
                y1: left_y,
                t2: t_cut2,
                y2: y_cut,
            };
            if self.resolve(
                &mut sub,
                stepper,
                behavior,
                particle,
                pol,
                currentsolids,
                rng,
                output,
                iteration + 1,
            )? {
                seg.t2 = sub.t2;
                seg.y2 = sub.y2;
                return Ok(true);
            }
            left_t = t_cut2;
            left_y = y_cut;
        }

        let mut sub = Segment {
            t1: left_t,
            y1: left_y,
            t2: seg.t2,
            y2: seg.y2,
        };
        if self.resolve(
            &mut sub,
            stepper,
            behavior,
            particle,
            pol,
            currentsolids,
            rng,
            output,
            iteration + 1,
        )? {
            seg.t2 = sub.t2;
            seg.y2 = sub.y2;
            return Ok(true);
        }
        Ok(false)
    }

    /// Collision-free segment: give the behavior its bulk reaction.
    fn bulk_step(
        &self,
        seg: &mut Segment,
        behavior: &dyn ParticleBehavior,
        particle: &mut Particle,
        currentsolids: &BTreeSet<u32>,
        rng: &mut StdRng,
    ) -> Result<bool> {
        let active_id = *currentsolids
            .iter()
            .next_back()
            .expect("current-solid set always holds the default solid");
        let active = match self.geometry.solid(active_id) {
            Some(s) => s.clone(),
            None => {
                self.numerical_error(
                    particle,
                    seg,
                    format!("unknown active solid id {}", active_id),
                );
                return Ok(true);
            }
        };
        match behavior.on_step(seg, &active, rng) {
            StepResult::Unchanged => Ok(false),
            StepResult::Deflected => Ok(true),
            StepResult::Absorbed => {
                info!(
                    particle = particle.number,
                    t = seg.t2,
                    solid = %active.name,
                    "absorbed in bulk"
                );
                particle.status = StopId::Absorbed(active.id);
                Ok(true)
            }
        }
    }

    fn numerical_error(&self, particle: &mut Particle, seg: &mut Segment, reason: String) {
        warn!(
            particle = particle.number,
            t = seg.t1,
            "{} at ({}, {}, {}); stopping particle",
            reason,
            seg.y1[0],
            seg.y1[1],
            seg.y1[2]
        );
        seg.t2 = seg.t1;
        seg.y2 = seg.y1;
        particle.status = StopId::NumericalError;
    }

    fn solid_name(&self, id: u32) -> String {
        self.geometry
            .solid(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("<unknown {}>", id))
    }

    fn log_track(
        &self,
        particle: &Particle,
        t: f64,
        y: &State,
        pol: i8,
        output: &Mutex<Output>,
    ) -> Result<()> {
        let mut out = output.lock().unwrap();
        if !out.config.track_log {
            return Ok(());
        }
        let (b, e) = match self.field {
            Some(f) => (
                f.b_field(y[0], y[1], y[2], t),
                f.e_field(y[0], y[1], y[2], t),
            ),
            None => Default::default(),
        };
        let e_kin = particle.species.ekin_ev(&velocity(y));
        let h = e_kin + particle.species.epot_ev(t, y, pol, self.field);
        out.write_track(particle, t, y, pol, h, e_kin, &b, &e)
    }
}

/// Full interpolated state at a time inside the last accepted step.
fn dense_state(stepper: &Dopr853<6>, t: f64) -> State {
    let mut y = [0.0; 6];
    for (i, v) in y.iter_mut().enumerate() {
        *v = stepper.dense_out(i, t);
    }
    y
}
