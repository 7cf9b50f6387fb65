//! Barnes-Hut octree for approximate gravity.
//!
//! Distant groups of particles are replaced by their total mass at their
//! center of mass. The tree is rebuilt from scratch for every force
//! evaluation: nodes live in a flat `Vec` and reference their children by
//! index, so a build is a handful of allocations rather than a pointer
//! chase.
//!
//! A cell is "opened" (descended into) when `size / distance` exceeds the
//! opening angle; otherwise its monopole is used. `opening_angle = 0`
//! degenerates to the exact pairwise sum.

use crate::simulation::particle::{NVec3, Particle};

/// Deepest subdivision level. Particles that still share a cell at this
/// depth (coincident or nearly so) are kept together in the cell's
/// overflow list and summed directly.
const MAX_DEPTH: u32 = 64;

struct Node {
    mass: f64,
    com: NVec3,
    center: NVec3, // geometric center of the cubic cell
    half: f64, // half the cell's edge length
    children: [Option<usize>; 8],
    body: Option<usize>, // occupant of a leaf cell
    overflow: Vec<usize>, // extra occupants at MAX_DEPTH; empty elsewhere
}

pub struct Octree {
    nodes: Vec<Node>,
}

impl Octree {
    /// Build an octree over the current particle positions.
    pub fn build(particles: &[Particle]) -> Self {
        let (center, half) = bounding_cube(particles);
        let mut tree = Octree {
            nodes: vec![Node {
                mass: 0.0,
                com: NVec3::zeros(),
                center,
                half,
                children: [None; 8],
                body: None,
                overflow: Vec::new(),
            }],
        };
        for i in 0..particles.len() {
            tree.insert(0, i, particles, 0);
        }
        tree.summarize(0, particles);
        tree
    }

    /// Net gravitational acceleration on particle `i`.
    #[allow(non_snake_case)]
    pub fn acceleration_on(
        &self,
        i: usize,
        particles: &[Particle],
        G: f64,
        softening2: f64,
        opening_angle: f64,
    ) -> NVec3 {
        let mut acc = NVec3::zeros();
        self.walk(0, i, particles, G, softening2, opening_angle, &mut acc);
        acc
    }

    fn insert(&mut self, node: usize, body: usize, particles: &[Particle], depth: u32) {
        if depth >= MAX_DEPTH {
            self.nodes[node].overflow.push(body);
            return;
        }
        let occupied = self.nodes[node].body;
        let has_children = self.nodes[node].children.iter().any(|c| c.is_some());

        if occupied.is_none() && !has_children {
            // Empty leaf: take the body
            self.nodes[node].body = Some(body);
            return;
        }

        // Internal node (or a leaf that must split): push the previous
        // occupant down, then descend with the new body
        if let Some(prev) = self.nodes[node].body.take() {
            let child = self.child_for(node, particles[prev].x);
            self.insert(child, prev, particles, depth + 1);
        }
        let child = self.child_for(node, particles[body].x);
        self.insert(child, body, particles, depth + 1);
    }

    /// Index of the child cell containing `pos`, created on demand.
    fn child_for(&mut self, node: usize, pos: NVec3) -> usize {
        let center = self.nodes[node].center;
        let half = self.nodes[node].half;
        let octant = (pos.x > center.x) as usize
            | ((pos.y > center.y) as usize) << 1
            | ((pos.z > center.z) as usize) << 2;
        if let Some(child) = self.nodes[node].children[octant] {
            return child;
        }
        let quarter = 0.5 * half;
        let child_center = NVec3::new(
            center.x + if pos.x > center.x { quarter } else { -quarter },
            center.y + if pos.y > center.y { quarter } else { -quarter },
            center.z + if pos.z > center.z { quarter } else { -quarter },
        );
        let idx = self.nodes.len();
        self.nodes.push(Node {
            mass: 0.0,
            com: NVec3::zeros(),
            center: child_center,
            half: quarter,
            children: [None; 8],
            body: None,
            overflow: Vec::new(),
        });
        self.nodes[node].children[octant] = Some(idx);
        idx
    }

    /// Bottom-up mass and center-of-mass aggregation.
    fn summarize(&mut self, node: usize, particles: &[Particle]) -> (f64, NVec3) {
        let mut mass = 0.0;
        let mut weighted = NVec3::zeros();
        if let Some(i) = self.nodes[node].body {
            mass += particles[i].m;
            weighted += particles[i].m * particles[i].x;
        }
        for &i in &self.nodes[node].overflow.clone() {
            mass += particles[i].m;
            weighted += particles[i].m * particles[i].x;
        }
        for octant in 0..8 {
            if let Some(child) = self.nodes[node].children[octant] {
                let (cm, cw) = self.summarize(child, particles);
                mass += cm;
                weighted += cw;
            }
        }
        self.nodes[node].mass = mass;
        self.nodes[node].com = if mass > 0.0 {
            weighted / mass
        } else {
            self.nodes[node].center
        };
        (mass, weighted)
    }

    #[allow(non_snake_case, clippy::too_many_arguments)]
    fn walk(
        &self,
        node: usize,
        i: usize,
        particles: &[Particle],
        G: f64,
        softening2: f64,
        opening_angle: f64,
        acc: &mut NVec3,
    ) {
        let n = &self.nodes[node];
        if n.mass == 0.0 {
            return;
        }

        let d = n.com - particles[i].x;
        let dist2 = d.norm_squared();
        let is_leaf = n.children.iter().all(|c| c.is_none());

        // Monopole is acceptable when the cell looks small from here
        if !is_leaf && (2.0 * n.half) * (2.0 * n.half) < opening_angle * opening_angle * dist2 {
            *acc += point_mass(G, softening2, n.mass, d);
            return;
        }

        if is_leaf {
            if let Some(j) = n.body {
                if j != i {
                    let dj = particles[j].x - particles[i].x;
                    *acc += point_mass(G, softening2, particles[j].m, dj);
                }
            }
            for &j in &n.overflow {
                if j != i {
                    let dj = particles[j].x - particles[i].x;
                    *acc += point_mass(G, softening2, particles[j].m, dj);
                }
            }
            return;
        }

        for octant in 0..8 {
            if let Some(child) = n.children[octant] {
                self.walk(child, i, particles, G, softening2, opening_angle, acc);
            }
        }
    }
}

/// Acceleration at the origin of `d` due to a softened point mass.
#[allow(non_snake_case)]
fn point_mass(G: f64, softening2: f64, m: f64, d: NVec3) -> NVec3 {
    let d2 = d.norm_squared() + softening2;
    let inv_r = d2.sqrt().recip();
    G * m * inv_r * inv_r * inv_r * d
}

/// Cubic bounding volume enclosing every particle, padded slightly so that
/// boundary particles fall strictly inside.
fn bounding_cube(particles: &[Particle]) -> (NVec3, f64) {
    if particles.is_empty() {
        return (NVec3::zeros(), 1.0);
    }
    let mut lo = particles[0].x;
    let mut hi = particles[0].x;
    for p in particles {
        lo = lo.inf(&p.x);
        hi = hi.sup(&p.x);
    }
    let center = 0.5 * (lo + hi);
    let extent = (hi - lo).amax();
    let half = 0.5 * extent * 1.001 + f64::MIN_POSITIVE;
    (center, half.max(1.0e-12))
}
