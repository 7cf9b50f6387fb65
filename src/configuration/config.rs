//! Configuration types for loading simulation scenarios from YAML.
//!
//! A scenario consists of:
//!
//! - [`EngineConfig`]     - integrator, gravity and collision selectors
//! - [`ParametersConfig`] - numerical parameters and physical constants
//! - [`BodyConfig`]       - initial state for each particle
//! - [`ScenarioConfig`]   - top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//!
//! ```yaml
//! engine:
//!   integrator: "leapfrog"   # or "verlet", "rk4", "rkf45"
//!   gravity: "direct"        # or "tree", "none"
//!   opening_angle: 0.7       # Barnes-Hut cell opening criterion
//!
//! parameters:
//!   t_end: 6.2832            # integration target time
//!   dt: 0.001                # step size (step cap for rkf45)
//!   G: 1.0                   # gravitational constant
//!   softening2: 1.0e-4       # squared softening length
//!   exit_max_distance: 50.0  # escape watchdog radius
//!
//! bodies:
//!   - m: 1.0                 # a body at the origin, at rest
//!   - m: 1.0e-3              # a body on a Kepler orbit around the first
//!     a: 1.0
//!     e: 0.05
//!     name: "earth"
//!   - m: 0.0                 # a test particle with explicit state
//!     x: [0.4, 0.0, 0.0]
//!     v: [0.0, 1.2, 0.0]
//! ```
//!
//! Bodies give either a Cartesian state (`x`, `v`) or orbital elements
//! (`a` plus any of `e`, `inc`, `Omega`, `omega`/`pomega` and one anomaly),
//! mirroring `ParticleSpec`.

use serde::Deserialize;

use crate::simulation::forces::{CollisionKind, GravityKind};
use crate::simulation::integrator::IntegratorKind;

/// Engine selectors: which integrator, gravity and collision backends run
/// the scenario.
#[derive(Deserialize, Debug)]
pub struct EngineConfig {
    pub integrator: IntegratorKind,
    pub gravity: GravityKind,
    pub collision: Option<CollisionKind>, // defaults to no collision check
    pub opening_angle: Option<f64>, // Barnes-Hut opening criterion
}

/// Global numerical and physical parameters for a scenario.
#[allow(non_snake_case)]
#[derive(Deserialize, Debug, Clone)]
pub struct ParametersConfig {
    pub t_end: f64, // integration target time
    pub dt: f64, // step size
    pub G: f64, // gravitational constant
    pub softening2: Option<f64>, // squared softening length
    pub atol: Option<f64>, // absolute error tolerance (rkf45)
    pub rtol: Option<f64>, // relative error tolerance (rkf45)
    pub exit_max_distance: Option<f64>, // escape watchdog radius
    pub exit_min_distance: Option<f64>, // encounter watchdog distance
}

/// Initial state for a single body, in Cartesian or orbital-element form.
#[allow(non_snake_case)]
#[derive(Deserialize, Debug, Default)]
pub struct BodyConfig {
    pub m: Option<f64>, // mass; omitted means a test particle
    pub radius: Option<f64>,
    // Cartesian state
    pub x: Option<[f64; 3]>,
    pub v: Option<[f64; 3]>,
    // Orbital elements relative to `primary` (or the first body)
    pub a: Option<f64>,
    pub e: Option<f64>,
    pub inc: Option<f64>,
    pub Omega: Option<f64>,
    pub omega: Option<f64>,
    pub pomega: Option<f64>,
    pub f: Option<f64>,
    pub M: Option<f64>,
    pub E: Option<f64>,
    pub lambda: Option<f64>,
    pub primary: Option<String>, // name of the reference body
    // Identity
    pub name: Option<String>,
    pub hash: Option<u64>,
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug)]
pub struct ScenarioConfig {
    pub engine: EngineConfig,
    pub parameters: ParametersConfig,
    pub bodies: Vec<BodyConfig>,
}
