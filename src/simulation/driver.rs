//! Integration driver: advances the simulation to a requested time.
//!
//! The driver subdivides the interval into integrator steps and polls the
//! watchdogs at every step boundary, never mid-step. Landing exactly on
//! the target is done with a shortened finishing step; the pre-step state
//! is checkpointed so the next `integrate` call continues the trajectory
//! as if the short step had never been taken. Repeated calls with growing
//! targets therefore reproduce a single long integration bit for bit.
//!
//! Runtime failures (`Escape`, `Encounter`, `Collision`, `Interrupted`)
//! leave the simulation at the step boundary where they were detected;
//! the caller may inspect particles, remove an offender, and integrate
//! again with the same target.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::Error;
use crate::simulation::forces::{CollisionKind, ForceModel};
use crate::simulation::integrator;
use crate::simulation::sim::{Checkpoint, Simulation};

impl Simulation {
    /// Advance to `t_target`, landing on it exactly.
    pub fn integrate(&mut self, t_target: f64) -> Result<(), Error> {
        self.integrate_with(t_target, true)
    }

    /// Advance to `t_target`. With `exact_finish` false the driver stops
    /// at the first step boundary at or past the target instead of
    /// shortening the final step.
    pub fn integrate_with(&mut self, t_target: f64, exact_finish: bool) -> Result<(), Error> {
        if self.particles.is_empty() {
            return Err(Error::NoParticles);
        }
        if t_target == self.t {
            return Ok(());
        }
        if !self.dt.is_finite() || self.dt == 0.0 {
            return Err(Error::InvalidTimestep);
        }

        // A selector change discards integrator-private scratch state and
        // the finishing-step checkpoint: the old backend's trajectory
        // cannot be reproduced by the new one
        if self.active_integrator != Some(self.integrator) {
            self.scratch.reset();
            self.checkpoint = None;
            self.active_integrator = Some(self.integrator);
        }

        // Rewind to the state before the previous shortened finishing
        // step, if one was taken and nothing was mutated since
        if let Some(cp) = self.checkpoint.take() {
            trace!(t = cp.t, "resuming from pre-finish checkpoint");
            self.t = cp.t;
            self.particles = cp.particles;
            self.scratch = cp.scratch;
            self.steps_done = cp.steps_done;
        }

        let started = Instant::now();
        let result = self.drive(t_target, exact_finish);
        self.walltime += started.elapsed();
        result
    }

    fn drive(&mut self, t_target: f64, exact_finish: bool) -> Result<(), Error> {
        let forward = t_target > self.t;
        if (forward && self.dt < 0.0) || (!forward && self.dt > 0.0) {
            self.dt = -self.dt;
            self.scratch.reset();
        }
        debug!(
            t = self.t,
            t_target,
            integrator = %self.integrator,
            exact_finish,
            "integrate"
        );

        loop {
            if self.halt.load(Ordering::Relaxed) {
                return Err(Error::Interrupted { t: self.t });
            }
            let remaining = t_target - self.t;
            if remaining == 0.0 {
                break;
            }

            // Size of the step the integrator would take next
            let step_cap = if self.integrator.is_adaptive() {
                match self.scratch.h {
                    Some(h) => h.abs().min(self.dt.abs()),
                    None => self.dt.abs(),
                }
            } else {
                self.dt.abs()
            };
            let finishing = exact_finish && remaining.abs() <= step_cap;

            let model = ForceModel {
                gravity: self.gravity,
                G: self.G,
                softening2: self.softening2,
                opening_angle: self.opening_angle,
                extra: &self.extra_forces,
            };

            if finishing {
                self.checkpoint = Some(Checkpoint {
                    t: self.t,
                    particles: self.particles.clone(),
                    scratch: self.scratch.clone(),
                    steps_done: self.steps_done,
                });
                integrator::advance(
                    self.integrator,
                    &mut self.particles,
                    &model,
                    self.t,
                    remaining,
                    &mut self.scratch,
                    self.atol,
                    self.rtol,
                    true,
                );
                self.t = t_target;
            } else {
                let achieved = integrator::advance(
                    self.integrator,
                    &mut self.particles,
                    &model,
                    self.t,
                    self.dt,
                    &mut self.scratch,
                    self.atol,
                    self.rtol,
                    false,
                );
                self.t += achieved;
            }
            self.steps_done += 1;

            self.watchdogs()?;
            if let Some(cb) = self.heartbeat.as_mut() {
                cb(self.t, &self.particles);
            }

            if finishing {
                break;
            }
            if !exact_finish {
                let passed = if forward {
                    self.t >= t_target
                } else {
                    self.t <= t_target
                };
                if passed {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Step-boundary checks: escape radius, close encounters, collisions.
    /// Offending particles are never removed here; the caller owns the
    /// policy.
    fn watchdogs(&self) -> Result<(), Error> {
        if self.exit_max_distance.is_finite() {
            let r2_max = self.exit_max_distance * self.exit_max_distance;
            for p in &self.particles {
                if p.r2() > r2_max {
                    return Err(Error::Escape { t: self.t });
                }
            }
        }
        if self.exit_min_distance > 0.0 {
            let d2_min = self.exit_min_distance * self.exit_min_distance;
            for (i, p) in self.particles.iter().enumerate() {
                for q in &self.particles[i + 1..] {
                    if (q.x - p.x).norm_squared() < d2_min {
                        return Err(Error::Encounter { t: self.t });
                    }
                }
            }
        }
        if self.collision == CollisionKind::Direct {
            for (i, p) in self.particles.iter().enumerate() {
                for q in &self.particles[i + 1..] {
                    let touch = p.radius + q.radius;
                    if touch > 0.0 && (q.x - p.x).norm_squared() < touch * touch {
                        return Err(Error::Collision { t: self.t });
                    }
                }
            }
        }
        Ok(())
    }
}
