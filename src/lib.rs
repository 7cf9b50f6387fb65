pub mod simulation;
pub mod configuration;
pub mod benchmark;
pub mod error;

pub use simulation::particle::{hash_name, NVec3, Particle, ParticleSpec};
pub use simulation::sim::Simulation;
pub use simulation::orbit::{self, Orbit};
pub use simulation::integrator::IntegratorKind;
pub use simulation::forces::{CollisionKind, Force, GravityKind};
pub use simulation::scenario::Scenario;

pub use configuration::config::{BodyConfig, EngineConfig, ParametersConfig, ScenarioConfig};

pub use error::Error;

pub use benchmark::benchmark::{bench_gravity, bench_leapfrog};
