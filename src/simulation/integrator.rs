//! Time integrators for the N-body system
//!
//! Four backends selected by [`IntegratorKind`]:
//! - `leapfrog`: drift-kick-drift with a single force evaluation per step,
//!   symplectic, fixed step
//! - `verlet`: velocity-Verlet (kick-drift-kick) with two force
//!   evaluations per step, symplectic, fixed step
//! - `rk4`: classical 4th-order Runge-Kutta, higher local accuracy but not
//!   symplectic
//! - `rkf45`: embedded Fehlberg 4(5) pair with proportional step control
//!   against `atol`/`rtol`
//!
//! Every kernel advances positions and velocities in place and reports the
//! step actually taken; the driver owns the simulation clock.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;
use crate::simulation::forces::ForceModel;
use crate::simulation::particle::{NVec3, Particle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IntegratorKind {
    #[serde(rename = "leapfrog")]
    Leapfrog,
    #[serde(rename = "verlet")]
    Verlet,
    #[serde(rename = "rk4")]
    Rk4,
    #[serde(rename = "rkf45")]
    Rkf45,
}

impl IntegratorKind {
    pub fn is_adaptive(self) -> bool {
        matches!(self, IntegratorKind::Rkf45)
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            IntegratorKind::Leapfrog => 0,
            IntegratorKind::Verlet => 1,
            IntegratorKind::Rk4 => 2,
            IntegratorKind::Rkf45 => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IntegratorKind::Leapfrog),
            1 => Some(IntegratorKind::Verlet),
            2 => Some(IntegratorKind::Rk4),
            3 => Some(IntegratorKind::Rkf45),
            _ => None,
        }
    }
}

impl fmt::Display for IntegratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegratorKind::Leapfrog => "leapfrog",
            IntegratorKind::Verlet => "verlet",
            IntegratorKind::Rk4 => "rk4",
            IntegratorKind::Rkf45 => "rkf45",
        };
        f.write_str(name)
    }
}

impl FromStr for IntegratorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "leapfrog" => Ok(IntegratorKind::Leapfrog),
            "verlet" => Ok(IntegratorKind::Verlet),
            "rk4" => Ok(IntegratorKind::Rk4),
            "rkf45" => Ok(IntegratorKind::Rkf45),
            other => Err(Error::UnknownIntegrator(other.to_string())),
        }
    }
}

/// Integrator-private scratch state. Re-initialized whenever the selector
/// changes or the particle set is mutated, and checkpointed together with
/// the particle array so a shortened finishing step can be undone.
#[derive(Debug, Clone, Default)]
pub struct Scratch {
    pub(crate) h: Option<f64>, // current adaptive step, None until the first step
}

impl Scratch {
    pub(crate) fn reset(&mut self) {
        self.h = None;
    }
}

/// Advance the system by one internal step of at most `dt` and return the
/// step actually taken (always `dt` for the fixed-step backends).
///
/// With `exact` set the kernel is forced to take exactly `dt` so the driver
/// can land on a requested finish time; the adaptive state is left
/// untouched in that case.
#[allow(clippy::too_many_arguments)]
pub(crate) fn advance(
    kind: IntegratorKind,
    particles: &mut [Particle],
    forces: &ForceModel,
    t: f64,
    dt: f64,
    scratch: &mut Scratch,
    atol: f64,
    rtol: f64,
    exact: bool,
) -> f64 {
    match kind {
        IntegratorKind::Leapfrog => {
            leapfrog_step(particles, forces, t, dt);
            dt
        }
        IntegratorKind::Verlet => {
            verlet_step(particles, forces, t, dt);
            dt
        }
        IntegratorKind::Rk4 => {
            rk4_step(particles, forces, t, dt);
            dt
        }
        IntegratorKind::Rkf45 => {
            if exact {
                let _ = rkf45_attempt(particles, forces, t, dt, atol, rtol, true);
                dt
            } else {
                rkf45_step(particles, forces, t, dt, scratch, atol, rtol)
            }
        }
    }
}

/// Advance by one step using single-force-eval leapfrog (drift-kick-drift).
pub fn leapfrog_step(particles: &mut [Particle], forces: &ForceModel, t: f64, dt: f64) {
    let n = particles.len();
    if n == 0 {
        return;
    }
    let half_dt = 0.5 * dt;

    // Drift: x_n+1/2 = x_n + (dt/2) v_n
    for p in particles.iter_mut() {
        p.x += half_dt * p.v;
    }

    // Kick: v_n+1 = v_n + dt a(x_n+1/2)
    let mut a_mid = vec![NVec3::zeros(); n];
    forces.accelerations(t + half_dt, particles, &mut a_mid);
    for (p, a) in particles.iter_mut().zip(a_mid.iter()) {
        p.v += dt * *a;
    }

    // Drift: x_n+1 = x_n+1/2 + (dt/2) v_n+1
    for p in particles.iter_mut() {
        p.x += half_dt * p.v;
    }
}

/// Advance by one step using velocity-Verlet (kick-drift-kick), two force
/// evaluations per step.
pub fn verlet_step(particles: &mut [Particle], forces: &ForceModel, t: f64, dt: f64) {
    let n = particles.len();
    if n == 0 {
        return;
    }
    let half_dt = 0.5 * dt;

    // a_n from x_n
    let mut a_old = vec![NVec3::zeros(); n];
    forces.accelerations(t, particles, &mut a_old);

    // Kick: v_n+1/2 = v_n + (dt/2) a_n
    for (p, a) in particles.iter_mut().zip(a_old.iter()) {
        p.v += half_dt * *a;
    }

    // Drift: x_n+1 = x_n + dt v_n+1/2
    for p in particles.iter_mut() {
        p.x += dt * p.v;
    }

    // a_n+1 from x_n+1
    let mut a_new = vec![NVec3::zeros(); n];
    forces.accelerations(t + dt, particles, &mut a_new);

    // Second kick: v_n+1 = v_n+1/2 + (dt/2) a_n+1
    for (p, a) in particles.iter_mut().zip(a_new.iter()) {
        p.v += half_dt * *a;
    }
}

/// Advance by one step using classical fixed-step RK4.
pub fn rk4_step(particles: &mut [Particle], forces: &ForceModel, t: f64, dt: f64) {
    let n = particles.len();
    if n == 0 {
        return;
    }
    let x0: Vec<NVec3> = particles.iter().map(|p| p.x).collect();
    let v0: Vec<NVec3> = particles.iter().map(|p| p.v).collect();

    // Stage state lives in a scratch copy so force evaluation always sees
    // a consistent particle array
    let mut stage: Vec<Particle> = particles.to_vec();
    let mut a = vec![NVec3::zeros(); n];

    // k1 at (t, y0)
    forces.accelerations(t, &stage, &mut a);
    let k1: Vec<(NVec3, NVec3)> = (0..n).map(|i| (v0[i], a[i])).collect();

    // k2 at (t + dt/2, y0 + dt/2 k1)
    for i in 0..n {
        stage[i].x = x0[i] + 0.5 * dt * k1[i].0;
        stage[i].v = v0[i] + 0.5 * dt * k1[i].1;
    }
    forces.accelerations(t + 0.5 * dt, &stage, &mut a);
    let k2: Vec<(NVec3, NVec3)> = (0..n).map(|i| (stage[i].v, a[i])).collect();

    // k3 at (t + dt/2, y0 + dt/2 k2)
    for i in 0..n {
        stage[i].x = x0[i] + 0.5 * dt * k2[i].0;
        stage[i].v = v0[i] + 0.5 * dt * k2[i].1;
    }
    forces.accelerations(t + 0.5 * dt, &stage, &mut a);
    let k3: Vec<(NVec3, NVec3)> = (0..n).map(|i| (stage[i].v, a[i])).collect();

    // k4 at (t + dt, y0 + dt k3)
    for i in 0..n {
        stage[i].x = x0[i] + dt * k3[i].0;
        stage[i].v = v0[i] + dt * k3[i].1;
    }
    forces.accelerations(t + dt, &stage, &mut a);
    let k4: Vec<(NVec3, NVec3)> = (0..n).map(|i| (stage[i].v, a[i])).collect();

    let w = dt / 6.0;
    for i in 0..n {
        particles[i].x = x0[i] + w * (k1[i].0 + 2.0 * k2[i].0 + 2.0 * k3[i].0 + k4[i].0);
        particles[i].v = v0[i] + w * (k1[i].1 + 2.0 * k2[i].1 + 2.0 * k3[i].1 + k4[i].1);
    }
}

// Fehlberg 4(5) tableau
const STAGE_TIME: [f64; 6] = [0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0];
const COUPLING: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 4.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 32.0, 9.0 / 32.0, 0.0, 0.0, 0.0],
    [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0, 0.0, 0.0],
    [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0, 0.0],
    [-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
];
const WEIGHTS_5: [f64; 6] = [
    16.0 / 135.0,
    0.0,
    6656.0 / 12825.0,
    28561.0 / 56430.0,
    -9.0 / 50.0,
    2.0 / 55.0,
];
const WEIGHTS_4: [f64; 6] = [
    25.0 / 216.0,
    0.0,
    1408.0 / 2565.0,
    2197.0 / 4104.0,
    -1.0 / 5.0,
    0.0,
];

// Step controller (I-controller with exponent 1/5)
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const MAX_ATTEMPTS: u32 = 24;

/// One adaptive RKF45 step of at most `h_cap`. Retries with a smaller step
/// until the scaled error estimate drops below 1, stores the suggested next
/// step in `scratch`, and returns the step taken.
fn rkf45_step(
    particles: &mut [Particle],
    forces: &ForceModel,
    t: f64,
    h_cap: f64,
    scratch: &mut Scratch,
    atol: f64,
    rtol: f64,
) -> f64 {
    // Resume from the remembered step unless it is too large for the cap
    // or points the wrong way after a direction change
    let mut h = match scratch.h {
        Some(h) if h.abs() <= h_cap.abs() && h * h_cap > 0.0 => h,
        _ => h_cap,
    };

    let mut attempts = 0;
    loop {
        attempts += 1;
        let (err, rollback) = rkf45_attempt(particles, forces, t, h, atol, rtol, false);
        if err <= 1.0 || attempts >= MAX_ATTEMPTS {
            // Accepted; propose the next step from the error estimate
            let factor = if err > 0.0 {
                (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            } else {
                MAX_FACTOR
            };
            scratch.h = Some(h * factor);
            return h;
        }
        // Rejected: restore and shrink
        rollback(particles);
        let factor = (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, 1.0);
        h *= factor;
    }
}

/// Evaluate one RKF45 step of exactly `h`, writing the 5th-order solution
/// into `particles`. Returns the scaled error estimate together with a
/// rollback closure restoring the pre-step state. With `force_accept` the
/// error is reported as 0 (used for the shortened finishing step).
fn rkf45_attempt(
    particles: &mut [Particle],
    forces: &ForceModel,
    t: f64,
    h: f64,
    atol: f64,
    rtol: f64,
    force_accept: bool,
) -> (f64, impl Fn(&mut [Particle])) {
    let n = particles.len();
    let x0: Vec<NVec3> = particles.iter().map(|p| p.x).collect();
    let v0: Vec<NVec3> = particles.iter().map(|p| p.v).collect();

    let mut stage: Vec<Particle> = particles.to_vec();
    let mut a = vec![NVec3::zeros(); n];
    let mut k: Vec<Vec<(NVec3, NVec3)>> = Vec::with_capacity(6);

    for s in 0..6 {
        for i in 0..n {
            let mut xs = x0[i];
            let mut vs = v0[i];
            for (j, kj) in k.iter().enumerate() {
                xs += h * COUPLING[s][j] * kj[i].0;
                vs += h * COUPLING[s][j] * kj[i].1;
            }
            stage[i].x = xs;
            stage[i].v = vs;
        }
        forces.accelerations(t + STAGE_TIME[s] * h, &stage, &mut a);
        k.push((0..n).map(|i| (stage[i].v, a[i])).collect());
    }

    let mut err: f64 = 0.0;
    for i in 0..n {
        let mut dx5 = NVec3::zeros();
        let mut dv5 = NVec3::zeros();
        let mut dx4 = NVec3::zeros();
        let mut dv4 = NVec3::zeros();
        for (s, ks) in k.iter().enumerate() {
            dx5 += WEIGHTS_5[s] * ks[i].0;
            dv5 += WEIGHTS_5[s] * ks[i].1;
            dx4 += WEIGHTS_4[s] * ks[i].0;
            dv4 += WEIGHTS_4[s] * ks[i].1;
        }
        let x5 = x0[i] + h * dx5;
        let v5 = v0[i] + h * dv5;
        let x4 = x0[i] + h * dx4;
        let v4 = v0[i] + h * dv4;

        if !force_accept {
            for c in 0..3 {
                let scale_x = atol + rtol * x0[i][c].abs().max(x5[c].abs());
                let scale_v = atol + rtol * v0[i][c].abs().max(v5[c].abs());
                err = err.max(((x5[c] - x4[c]) / scale_x).abs());
                err = err.max(((v5[c] - v4[c]) / scale_v).abs());
            }
        }

        particles[i].x = x5;
        particles[i].v = v5;
    }

    let rollback = move |ps: &mut [Particle]| {
        for (i, p) in ps.iter_mut().enumerate() {
            p.x = x0[i];
            p.v = v0[i];
        }
    };
    (err, rollback)
}
