//! Force evaluation for the N-body engine
//!
//! Gravity is selected by [`GravityKind`] (direct pairwise summation or a
//! Barnes-Hut tree); user-supplied [`Force`] terms are summed on top of it
//! into the same acceleration buffer. Evaluators read particle state and
//! write accelerations to a separate buffer, never aliasing the particle
//! array.

use serde::Deserialize;

use crate::simulation::octree::Octree;
use crate::simulation::particle::{NVec3, Particle};

/// Gravity backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum GravityKind {
    #[serde(rename = "none")]
    None, // additional forces only
    #[serde(rename = "direct")]
    Direct, // exact pairwise O(N^2) summation
    #[serde(rename = "tree")]
    Tree, // Barnes-Hut octree, O(N log N)
}

/// Collision check selector. `Direct` tests every pair for radius overlap
/// at step boundaries; resolution is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CollisionKind {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "direct")]
    Direct,
}

/// Trait for additional acceleration sources composed on top of gravity.
/// Implementations add their contribution into `out[i]` for each particle.
pub trait Force: Send + Sync {
    fn accumulate(&self, t: f64, particles: &[Particle], out: &mut [NVec3]);
}

/// Snapshot of the force configuration handed to the integrators.
///
/// Borrowed from the simulation for the duration of one `integrate` call so
/// that step kernels can mutate the particle array while evaluating forces
/// through this view.
#[allow(non_snake_case)]
pub struct ForceModel<'a> {
    pub gravity: GravityKind,
    pub G: f64,
    pub softening2: f64, // squared softening length added to every pair distance
    pub opening_angle: f64, // Barnes-Hut cell opening criterion
    pub extra: &'a [Box<dyn Force>],
}

impl ForceModel<'_> {
    /// Compute total accelerations at time `t` for all particles.
    /// `out[i]` is overwritten with the sum of all contributions.
    pub fn accelerations(&self, t: f64, particles: &[Particle], out: &mut [NVec3]) {
        for a in out.iter_mut() {
            *a = NVec3::zeros();
        }
        match self.gravity {
            GravityKind::None => {}
            GravityKind::Direct => direct_gravity(self.G, self.softening2, particles, out),
            GravityKind::Tree => {
                let tree = Octree::build(particles);
                for (i, a) in out.iter_mut().enumerate() {
                    *a += tree.acceleration_on(
                        i,
                        particles,
                        self.G,
                        self.softening2,
                        self.opening_angle,
                    );
                }
            }
        }
        for term in self.extra {
            term.accumulate(t, particles, out);
        }
    }
}

/// Softened Newtonian gravity, direct pairwise sum.
#[allow(non_snake_case)]
pub fn direct_gravity(G: f64, softening2: f64, particles: &[Particle], out: &mut [NVec3]) {
    let n = particles.len();

    // Loop over each unordered pair (i, j) with i < j
    for i in 0..n {
        let xi = particles[i].x;
        let mi = particles[i].m;

        for j in (i + 1)..n {
            let xj = particles[j].x;
            let mj = particles[j].m;

            // Displacement from i to j: i is pulled along +r, j along -r
            let r = xj - xi;

            // Softened squared separation
            let d2 = r.dot(&r) + softening2;

            let inv_r = d2.sqrt().recip();
            let inv_r3 = inv_r * inv_r * inv_r;

            // coef = G / |r_soft|^3
            let coef = G * inv_r3;

            // Newton's third law: equal and opposite contributions
            out[i] += coef * mj * r;
            out[j] -= coef * mi * r;
        }
    }
}
