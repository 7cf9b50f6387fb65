//! The simulation object: particle store, configuration, and inspection.
//!
//! A [`Simulation`] exclusively owns its particles. Identity is the 64-bit
//! hash, kept resolvable through an internal hash-to-index map that is
//! updated on every mutation; indices are a transient convenience that any
//! add or remove invalidates. The integration driver itself lives in
//! `driver.rs`.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::simulation::forces::{CollisionKind, Force, GravityKind};
use crate::simulation::integrator::{IntegratorKind, Scratch};
use crate::simulation::orbit::{self, Orbit};
use crate::simulation::particle::{hash_name, scramble_key, NVec3, Particle, ParticleSpec};

/// State saved immediately before a shortened finishing step, so a later
/// `integrate` call can continue the trajectory as if the short step had
/// never been taken.
#[derive(Clone)]
pub(crate) struct Checkpoint {
    pub(crate) t: f64,
    pub(crate) particles: Vec<Particle>,
    pub(crate) scratch: Scratch,
    pub(crate) steps_done: u64,
}

/// Heartbeat callback, invoked after every completed step with the current
/// time and particle array.
pub type Heartbeat = Box<dyn FnMut(f64, &[Particle]) + Send>;

#[allow(non_snake_case)]
pub struct Simulation {
    pub t: f64, // current simulation time
    pub dt: f64, // step size (current step cap for the adaptive backend)
    pub G: f64, // gravitational constant
    pub softening2: f64, // squared gravitational softening length
    pub opening_angle: f64, // Barnes-Hut opening criterion
    pub atol: f64, // absolute tolerance for adaptive step control
    pub rtol: f64, // relative tolerance for adaptive step control
    pub exit_max_distance: f64, // escape radius; +inf disables the check
    pub exit_min_distance: f64, // encounter distance; 0 disables the check
    pub integrator: IntegratorKind,
    pub gravity: GravityKind,
    pub collision: CollisionKind,
    pub steps_done: u64, // completed steps over the simulation's lifetime
    pub walltime: Duration, // wall clock spent inside `integrate`

    pub(crate) particles: Vec<Particle>,
    pub(crate) index: HashMap<u64, usize>, // hash -> current index
    pub(crate) next_key: u64, // auto-identity sequence, never rewinds
    pub(crate) scratch: Scratch,
    pub(crate) active_integrator: Option<IntegratorKind>, // selector seen by the last run
    pub(crate) checkpoint: Option<Checkpoint>,
    pub(crate) halt: Arc<AtomicBool>,
    pub(crate) heartbeat: Option<Heartbeat>,
    pub(crate) extra_forces: Vec<Box<dyn Force>>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// A new, empty simulation with default configuration: G = 1,
    /// dt = 1e-3, leapfrog integration, direct gravity, all watchdogs
    /// disabled.
    pub fn new() -> Self {
        Simulation {
            t: 0.0,
            dt: 1.0e-3,
            G: 1.0,
            softening2: 0.0,
            opening_angle: 0.7,
            atol: 1.0e-9,
            rtol: 1.0e-6,
            exit_max_distance: f64::INFINITY,
            exit_min_distance: 0.0,
            integrator: IntegratorKind::Leapfrog,
            gravity: GravityKind::Direct,
            collision: CollisionKind::None,
            steps_done: 0,
            walltime: Duration::ZERO,
            particles: Vec::new(),
            index: HashMap::new(),
            next_key: 0,
            scratch: Scratch::default(),
            active_integrator: None,
            checkpoint: None,
            halt: Arc::new(AtomicBool::new(false)),
            heartbeat: None,
            extra_forces: Vec::new(),
        }
    }

    // store ================================================================

    /// Append a particle described by `spec` and return its hash identity.
    ///
    /// The add is transactional: on any error the simulation is unchanged.
    pub fn add(&mut self, spec: ParticleSpec) -> Result<u64, Error> {
        if spec.uses_cartesian() && spec.uses_elements() {
            return Err(Error::InvalidOrbit(
                "a particle takes either a Cartesian state or orbital elements, not both",
            ));
        }

        let mut particle = if spec.uses_elements() {
            self.particle_from_elements(&spec)?
        } else {
            Particle {
                m: spec.m,
                radius: spec.radius,
                x: NVec3::new(
                    spec.x.unwrap_or(0.0),
                    spec.y.unwrap_or(0.0),
                    spec.z.unwrap_or(0.0),
                ),
                v: NVec3::new(
                    spec.vx.unwrap_or(0.0),
                    spec.vy.unwrap_or(0.0),
                    spec.vz.unwrap_or(0.0),
                ),
                hash: 0,
                name: None,
            }
        };
        particle.radius = spec.radius;
        particle.name = spec.name.clone();

        // Identity: explicit hash, then name-derived, then a fresh key.
        // Resolved last so the auto sequence never advances on a failed add.
        let hash = match (spec.hash, spec.name.as_deref()) {
            (Some(h), _) => {
                if self.index.contains_key(&h) {
                    return Err(Error::DuplicateHash(h));
                }
                h
            }
            (None, Some(name)) => {
                let h = hash_name(name);
                if self.index.contains_key(&h) {
                    return Err(Error::DuplicateHash(h));
                }
                h
            }
            (None, None) => self.generate_key(),
        };
        particle.hash = hash;

        self.index.insert(hash, self.particles.len());
        self.particles.push(particle);
        self.mark_topology_changed();
        Ok(hash)
    }

    fn particle_from_elements(&self, spec: &ParticleSpec) -> Result<Particle, Error> {
        let a = spec
            .a
            .ok_or(Error::InvalidOrbit("orbital elements require a semi-major axis"))?;
        let primary = match spec.primary {
            Some(h) => self.get_by_hash(h).ok_or(Error::NotFound)?,
            None => self.particles.first().ok_or(Error::NoParticles)?,
        };

        let e = spec.e.unwrap_or(0.0);
        let inc = spec.inc.unwrap_or(0.0);
        let node = spec.Omega.unwrap_or(0.0);
        let peri = match (spec.omega, spec.pomega) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidOrbit(
                    "omega and pomega are alternatives, give only one",
                ))
            }
            (Some(w), None) => w,
            (None, Some(pw)) => pw - node,
            (None, None) => 0.0,
        };

        let anomalies =
            [spec.f, spec.M, spec.E, spec.lambda].iter().filter(|v| v.is_some()).count();
        if anomalies > 1 {
            return Err(Error::InvalidOrbit(
                "f, M, E and lambda are alternatives, give only one",
            ));
        }
        let f = if let Some(f) = spec.f {
            f
        } else if let Some(ecc_anom) = spec.E {
            orbit::eccentric_to_true(ecc_anom, e)
        } else if let Some(m_anom) = spec.M {
            orbit::eccentric_to_true(orbit::mean_to_eccentric(m_anom, e), e)
        } else if let Some(lambda) = spec.lambda {
            let m_anom = lambda - node - peri;
            orbit::eccentric_to_true(orbit::mean_to_eccentric(m_anom, e), e)
        } else {
            0.0
        };

        orbit::particle_from_orbit(self.G, primary, spec.m, a, e, inc, node, peri, f)
    }

    /// Remove the particle at `i`, preserving the relative order and the
    /// hashes of the survivors.
    pub fn remove(&mut self, i: usize) -> Result<Particle, Error> {
        if i >= self.particles.len() {
            return Err(Error::NotFound);
        }
        let removed = self.particles.remove(i);
        self.index.remove(&removed.hash);
        for (idx, p) in self.particles.iter().enumerate().skip(i) {
            self.index.insert(p.hash, idx);
        }
        self.mark_topology_changed();
        Ok(removed)
    }

    /// Remove the particle with the given hash.
    pub fn remove_by_hash(&mut self, hash: u64) -> Result<Particle, Error> {
        let i = *self.index.get(&hash).ok_or(Error::NotFound)?;
        self.remove(i)
    }

    /// Remove the particle whose identity was derived from `name`.
    pub fn remove_by_name(&mut self, name: &str) -> Result<Particle, Error> {
        self.remove_by_hash(hash_name(name))
    }

    pub fn get(&self, i: usize) -> Option<&Particle> {
        self.particles.get(i)
    }

    pub fn get_by_hash(&self, hash: u64) -> Option<&Particle> {
        self.index.get(&hash).map(|&i| &self.particles[i])
    }

    /// Resolve a particle added under `name` (identity derived with
    /// [`hash_name`]).
    pub fn get_by_name(&self, name: &str) -> Option<&Particle> {
        self.get_by_hash(hash_name(name))
    }

    /// Read-only view of the particle array. Indices are valid only until
    /// the next mutation.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable view of the particle array. Editing state by hand discards
    /// the internal finishing-step checkpoint, so trajectory reproduction
    /// restarts from the edited state.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        self.checkpoint = None;
        &mut self.particles
    }

    pub fn n(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    fn generate_key(&mut self) -> u64 {
        loop {
            let key = scramble_key(self.next_key);
            self.next_key = self.next_key.wrapping_add(1);
            if !self.index.contains_key(&key) {
                return key;
            }
        }
    }

    pub(crate) fn mark_topology_changed(&mut self) {
        self.scratch.reset();
        self.checkpoint = None;
    }

    // frame and diagnostics ===============================================

    /// Aggregate center-of-mass pseudo-particle. For a system of test
    /// particles only (total mass zero) the unweighted mean is used.
    pub fn com(&self) -> Result<Particle, Error> {
        if self.particles.is_empty() {
            return Err(Error::NoParticles);
        }
        let m_tot: f64 = self.particles.iter().map(|p| p.m).sum();
        let (x, v) = if m_tot > 0.0 {
            (
                self.particles.iter().map(|p| p.m * p.x).sum::<NVec3>() / m_tot,
                self.particles.iter().map(|p| p.m * p.v).sum::<NVec3>() / m_tot,
            )
        } else {
            let n = self.particles.len() as f64;
            (
                self.particles.iter().map(|p| p.x).sum::<NVec3>() / n,
                self.particles.iter().map(|p| p.v).sum::<NVec3>() / n,
            )
        };
        Ok(Particle {
            m: m_tot,
            radius: 0.0,
            x,
            v,
            hash: 0,
            name: None,
        })
    }

    /// Shift every particle into the center-of-mass frame, eliminating
    /// drift of the inertial origin. Idempotent up to floating-point noise.
    pub fn move_to_com(&mut self) -> Result<(), Error> {
        let com = self.com()?;
        for p in &mut self.particles {
            p.x -= com.x;
            p.v -= com.v;
        }
        self.checkpoint = None;
        Ok(())
    }

    /// Total mechanical energy: kinetic plus softened pairwise potential.
    pub fn energy(&self) -> f64 {
        let mut e = 0.0;
        for (i, p) in self.particles.iter().enumerate() {
            e += 0.5 * p.m * p.v.norm_squared();
            for q in &self.particles[i + 1..] {
                let d2 = (q.x - p.x).norm_squared() + self.softening2;
                e -= self.G * p.m * q.m / d2.sqrt();
            }
        }
        e
    }

    /// Osculating orbital elements of particle `i` relative to the first
    /// particle, the default primary.
    pub fn orbit_of(&self, i: usize) -> Result<Orbit, Error> {
        let primary = self.particles.first().ok_or(Error::NoParticles)?;
        let p = self.particles.get(i).ok_or(Error::NotFound)?;
        orbit::orbit_from_particle(self.G, p, primary)
    }

    /// Osculating orbital elements of particle `i` relative to the
    /// particle with hash `primary`, mirroring the primary selection that
    /// `add` accepts for element input.
    pub fn orbit_of_with_primary(&self, i: usize, primary: u64) -> Result<Orbit, Error> {
        let primary = self.get_by_hash(primary).ok_or(Error::NotFound)?;
        let p = self.particles.get(i).ok_or(Error::NotFound)?;
        orbit::orbit_from_particle(self.G, p, primary)
    }

    /// Same as [`Simulation::orbit_of`], resolving the particle by hash.
    pub fn orbit_of_hash(&self, hash: u64) -> Result<Orbit, Error> {
        let i = *self.index.get(&hash).ok_or(Error::NotFound)?;
        self.orbit_of(i)
    }

    // hooks ===============================================================

    /// Shared flag polled at step boundaries; storing `true` makes the
    /// running `integrate` return `Interrupted`. The flag is not cleared
    /// automatically.
    pub fn halt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Install a callback invoked after every completed step.
    pub fn set_heartbeat(&mut self, cb: impl FnMut(f64, &[Particle]) + Send + 'static) {
        self.heartbeat = Some(Box::new(cb));
    }

    pub fn clear_heartbeat(&mut self) {
        self.heartbeat = None;
    }

    /// Register an additional force term, summed on top of gravity inside
    /// the force evaluation.
    pub fn add_force(&mut self, term: impl Force + 'static) {
        self.extra_forces.push(Box::new(term));
        self.checkpoint = None;
    }

    // inspection ==========================================================

    /// Human-readable summary of the simulation state. The version and
    /// build date lines are purely informational.
    pub fn status(&self) -> String {
        format!(
            "---------------------------------\n\
             gravsim {}\n\
             built:      {}\n\
             integrator: {}\n\
             N:          {}\n\
             t:          {:.12e}\n\
             dt:         {:.12e}\n\
             steps done: {}\n\
             walltime:   {:.3} s\n\
             ---------------------------------",
            env!("CARGO_PKG_VERSION"),
            env!("GRAVSIM_BUILD_DATE"),
            self.integrator,
            self.n(),
            self.t,
            self.dt,
            self.steps_done,
            self.walltime.as_secs_f64(),
        )
    }
}
