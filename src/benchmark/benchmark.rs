use std::time::Instant;

use crate::simulation::forces::{ForceModel, GravityKind};
use crate::simulation::integrator::leapfrog_step;
use crate::simulation::particle::{NVec3, Particle};

/// Deterministic particle cloud for benchmarking, no rand needed.
fn cloud(n: usize) -> Vec<Particle> {
    let mut particles = Vec::with_capacity(n);
    for i in 0..n {
        let i_f = i as f64;
        let x = NVec3::new(
            (i_f * 0.37).sin() * 5.0,
            (i_f * 0.13).cos() * 5.0,
            (i_f * 0.07).sin() * 5.0,
        );
        particles.push(Particle {
            m: 1.0,
            radius: 0.01,
            x,
            v: NVec3::zeros(),
            hash: i as u64,
            name: None,
        });
    }
    particles
}

fn model(gravity: GravityKind) -> ForceModel<'static> {
    ForceModel {
        gravity,
        G: 0.1,
        softening2: 1.0e-4,
        opening_angle: 0.7,
        extra: &[],
    }
}

/// Time a single force evaluation, direct vs Barnes-Hut, at growing N.
pub fn bench_gravity() {
    let ns = [200, 400, 800, 1600, 3200, 6400];

    for n in ns {
        let particles = cloud(n);
        let mut out = vec![NVec3::zeros(); n];

        let direct = model(GravityKind::Direct);
        let tree = model(GravityKind::Tree);

        // Warm up
        direct.accelerations(0.0, &particles, &mut out);
        tree.accelerations(0.0, &particles, &mut out);

        let t0 = Instant::now();
        direct.accelerations(0.0, &particles, &mut out);
        let dt_direct = t0.elapsed().as_secs_f64();

        let t1 = Instant::now();
        tree.accelerations(0.0, &particles, &mut out);
        let dt_tree = t1.elapsed().as_secs_f64();

        println!("N = {n:5}, direct = {dt_direct:8.6} s, tree = {dt_tree:8.6} s");
    }
}

/// Time a fixed number of leapfrog steps at growing N.
pub fn bench_leapfrog() {
    let ns = [200, 400, 800, 1600];
    let steps = 100;

    for n in ns {
        let mut particles = cloud(n);
        let forces = model(GravityKind::Tree);

        let t0 = Instant::now();
        let mut t = 0.0;
        for _ in 0..steps {
            leapfrog_step(&mut particles, &forces, t, 1.0e-3);
            t += 1.0e-3;
        }
        let elapsed = t0.elapsed().as_secs_f64();

        println!(
            "N = {n:5}, {steps} leapfrog steps = {elapsed:8.6} s ({:.6} s/step)",
            elapsed / steps as f64
        );
    }
}
