//! Core particle state for the N-body simulation.
//!
//! A [`Particle`] carries mass, an optional physical radius, position and
//! velocity as `nalgebra` vectors, and an opaque 64-bit hash identity that
//! stays attached to the particle while the store compacts indices on
//! removal.
//!
//! A [`ParticleSpec`] is the descriptor accepted by `Simulation::add`: it
//! names either a full Cartesian state or a set of orbital elements
//! relative to a primary, never both.

use nalgebra::Vector3;
pub type NVec3 = Vector3<f64>;

/// FNV-1a, 64 bit. String-keyed particle identities are derived with this
/// function, and it is part of the snapshot contract: hashes written by one
/// process resolve to the same names in another.
pub fn hash_name(name: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

/// splitmix64 finalizer, used to scatter auto-assigned particle keys.
pub(crate) fn scramble_key(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub m: f64, // mass; 0 marks a test particle
    pub radius: f64, // physical radius, used by the collision check
    pub x: NVec3, // position
    pub v: NVec3, // velocity
    pub(crate) hash: u64, // identity, stable across index compaction
    pub name: Option<String>, // user label
}

impl Particle {
    /// The particle's 64-bit identity.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Squared distance from the origin of the inertial frame.
    pub fn r2(&self) -> f64 {
        self.x.norm_squared()
    }
}

/// Descriptor consumed by `Simulation::add`.
///
/// Exactly one of the two state families may be used:
/// - Cartesian: `x, y, z, vx, vy, vz` (unset components default to 0)
/// - orbital elements: `a` plus any of `e, inc, Omega, omega` and at most
///   one anomaly (`f`, `M`, `E` or `lambda`), relative to `primary` or the
///   first particle
///
/// Identity: `hash` wins over a name-derived hash; with neither set a fresh
/// key is generated.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Default)]
pub struct ParticleSpec {
    pub m: f64,
    pub radius: f64,
    // Cartesian state
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub vx: Option<f64>,
    pub vy: Option<f64>,
    pub vz: Option<f64>,
    // Orbital elements
    pub a: Option<f64>,
    pub e: Option<f64>,
    pub inc: Option<f64>,
    pub Omega: Option<f64>, // longitude of ascending node
    pub omega: Option<f64>, // argument of periapsis
    pub pomega: Option<f64>, // longitude of periapsis, alternative to omega
    pub f: Option<f64>, // true anomaly
    pub M: Option<f64>, // mean anomaly
    pub E: Option<f64>, // eccentric anomaly
    pub lambda: Option<f64>, // mean longitude
    pub primary: Option<u64>, // hash of the reference body for the elements
    // Identity
    pub hash: Option<u64>,
    pub name: Option<String>,
}

impl ParticleSpec {
    pub(crate) fn uses_cartesian(&self) -> bool {
        self.x.is_some()
            || self.y.is_some()
            || self.z.is_some()
            || self.vx.is_some()
            || self.vy.is_some()
            || self.vz.is_some()
    }

    pub(crate) fn uses_elements(&self) -> bool {
        self.a.is_some()
            || self.e.is_some()
            || self.inc.is_some()
            || self.Omega.is_some()
            || self.omega.is_some()
            || self.pomega.is_some()
            || self.f.is_some()
            || self.M.is_some()
            || self.E.is_some()
            || self.lambda.is_some()
            || self.primary.is_some()
    }
}
