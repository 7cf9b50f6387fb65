//! Error types surfaced by the simulation runtime
//!
//! Configuration errors (`InvalidOrbit`, `DuplicateHash`, ...) leave the
//! simulation unchanged. Runtime errors (`Escape`, `Encounter`, ...) carry
//! the simulation time of the step boundary at which they were detected;
//! the simulation is left at that boundary so the caller can inspect and
//! modify the particle set before integrating again.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid orbit: {0}")]
    InvalidOrbit(&'static str),

    #[error("a particle with hash {0} already exists")]
    DuplicateHash(u64),

    #[error("the simulation contains no particles")]
    NoParticles,

    #[error("unknown integrator \"{0}\"")]
    UnknownIntegrator(String),

    #[error("the timestep is zero or not finite")]
    InvalidTimestep,

    #[error("no particle matches the given index or hash")]
    NotFound,

    #[error("A particle escaped (r>exit_max_distance) at t={t}.")]
    Escape { t: f64 },

    #[error("Two particles had a close encounter (d<exit_min_distance) at t={t}.")]
    Encounter { t: f64 },

    #[error("Two particles collided at t={t}.")]
    Collision { t: f64 },

    #[error("integration was interrupted at t={t}")]
    Interrupted { t: f64 },

    #[error("corrupt or incompatible snapshot: {0}")]
    BadSnapshot(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Simulation time attached to runtime failures, if any.
    pub fn time(&self) -> Option<f64> {
        match self {
            Error::Escape { t }
            | Error::Encounter { t }
            | Error::Collision { t }
            | Error::Interrupted { t } => Some(*t),
            _ => None,
        }
    }
}
