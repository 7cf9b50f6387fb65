//! Build fully-initialized simulations from configuration
//!
//! Takes a [`ScenarioConfig`] (YAML-facing) and produces a runtime
//! [`Scenario`]: a configured [`Simulation`] with all bodies added, plus
//! the scenario's integration target time.

use crate::configuration::config::{BodyConfig, ScenarioConfig};
use crate::error::Error;
use crate::simulation::forces::CollisionKind;
use crate::simulation::particle::{hash_name, ParticleSpec};
use crate::simulation::sim::Simulation;

/// A runtime scenario: the simulation ready to run and the time to run it
/// to.
pub struct Scenario {
    pub sim: Simulation,
    pub t_end: f64,
}

impl Scenario {
    /// Map a configuration onto a simulation, adding bodies in file order
    /// so the first body is the default primary for orbital elements.
    pub fn build(cfg: ScenarioConfig) -> Result<Self, Error> {
        let mut sim = Simulation::new();

        sim.integrator = cfg.engine.integrator;
        sim.gravity = cfg.engine.gravity;
        sim.collision = cfg.engine.collision.unwrap_or(CollisionKind::None);
        if let Some(theta) = cfg.engine.opening_angle {
            sim.opening_angle = theta;
        }

        let p = &cfg.parameters;
        sim.dt = p.dt;
        sim.G = p.G;
        sim.softening2 = p.softening2.unwrap_or(0.0);
        if let Some(atol) = p.atol {
            sim.atol = atol;
        }
        if let Some(rtol) = p.rtol {
            sim.rtol = rtol;
        }
        if let Some(d) = p.exit_max_distance {
            sim.exit_max_distance = d;
        }
        if let Some(d) = p.exit_min_distance {
            sim.exit_min_distance = d;
        }

        for body in &cfg.bodies {
            sim.add(particle_spec(body))?;
        }

        Ok(Scenario {
            sim,
            t_end: cfg.parameters.t_end,
        })
    }
}

fn particle_spec(body: &BodyConfig) -> ParticleSpec {
    ParticleSpec {
        m: body.m.unwrap_or(0.0),
        radius: body.radius.unwrap_or(0.0),
        x: body.x.map(|x| x[0]),
        y: body.x.map(|x| x[1]),
        z: body.x.map(|x| x[2]),
        vx: body.v.map(|v| v[0]),
        vy: body.v.map(|v| v[1]),
        vz: body.v.map(|v| v[2]),
        a: body.a,
        e: body.e,
        inc: body.inc,
        Omega: body.Omega,
        omega: body.omega,
        pomega: body.pomega,
        f: body.f,
        M: body.M,
        E: body.E,
        lambda: body.lambda,
        primary: body.primary.as_deref().map(hash_name),
        hash: body.hash,
        name: body.name.clone(),
    }
}
