use gravsim::simulation::forces::{ForceModel, GravityKind};
use gravsim::simulation::particle::{hash_name, NVec3, Particle};
use gravsim::{CollisionKind, Error, Force, IntegratorKind, ParticleSpec, Simulation};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Spec for a star of mass `m` at the origin, at rest
pub fn star(m: f64) -> ParticleSpec {
    ParticleSpec {
        m,
        ..Default::default()
    }
}

/// Spec for a body on a Kepler orbit around the first particle
pub fn planet(m: f64, a: f64, e: f64, name: &str) -> ParticleSpec {
    ParticleSpec {
        m,
        a: Some(a),
        e: Some(e),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Star plus two planets, leapfrog, dt = 1e-3
pub fn kepler_sim() -> Simulation {
    let mut sim = Simulation::new();
    sim.dt = 1.0e-3;
    sim.add(star(1.0)).unwrap();
    sim.add(planet(1.0e-3, 1.0, 0.1, "earth")).unwrap();
    sim.add(planet(1.0e-4, 1.52, 0.09, "mars")).unwrap();
    sim
}

/// Deterministic particle cloud, no rand needed
pub fn cloud(n: usize) -> Vec<ParticleSpec> {
    (0..n)
        .map(|i| {
            let i_f = i as f64;
            ParticleSpec {
                m: 0.1 + 0.01 * (i_f * 0.29).cos().abs(),
                x: Some((i_f * 0.37).sin() * 5.0),
                y: Some((i_f * 0.13).cos() * 5.0),
                z: Some((i_f * 0.07).sin() * 5.0),
                ..Default::default()
            }
        })
        .collect()
}

// ==================================================================================
// Particle store tests
// ==================================================================================

#[test]
fn add_and_len() {
    let mut sim = Simulation::new();
    assert_eq!(sim.n(), 0);
    sim.add(star(1.0)).unwrap();
    sim.add(planet(0.0, 1.0, 0.0, "earth")).unwrap();
    assert_eq!(sim.n(), 2);
    sim.remove(1).unwrap();
    assert_eq!(sim.n(), 1);
}

#[test]
fn lookup_by_name_and_hash() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    let hash = sim.add(planet(0.0, 0.7, 0.0, "venus")).unwrap();

    assert_eq!(hash, hash_name("venus"));
    assert_eq!(sim.get_by_name("venus").unwrap().hash(), hash);
    assert_eq!(sim.get_by_hash(hash).unwrap().name.as_deref(), Some("venus"));
    assert!(sim.get_by_name("pluto").is_none());
}

#[test]
fn duplicate_hash_is_rejected_and_leaves_store_unchanged() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    sim.add(planet(0.0, 1.0, 0.0, "earth")).unwrap();

    let n_before = sim.n();
    let err = sim.add(planet(0.0, 1.3, 0.0, "earth")).unwrap_err();
    assert!(matches!(err, Error::DuplicateHash(h) if h == hash_name("earth")));
    assert_eq!(sim.n(), n_before);

    // Explicit numeric hash collides the same way
    let err = sim
        .add(ParticleSpec {
            hash: Some(hash_name("earth")),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateHash(_)));
}

#[test]
fn remove_misses_report_not_found() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    assert!(matches!(sim.remove(5), Err(Error::NotFound)));
    assert!(matches!(sim.remove_by_hash(42), Err(Error::NotFound)));
    assert!(matches!(sim.remove_by_name("nope"), Err(Error::NotFound)));
    assert_eq!(sim.n(), 1);
}

#[test]
fn hashes_survive_removal_and_order_is_preserved() {
    let mut sim = Simulation::new();
    for name in ["a", "b", "c", "d"] {
        sim.add(ParticleSpec {
            m: 1.0,
            name: Some(name.to_string()),
            ..Default::default()
        })
        .unwrap();
    }

    sim.remove_by_name("b").unwrap();

    assert_eq!(sim.n(), 3);
    assert_eq!(sim.get_by_name("c").unwrap().hash(), hash_name("c"));
    assert_eq!(sim.get_by_name("d").unwrap().hash(), hash_name("d"));
    // Index compaction keeps relative order: [a, c, d]
    assert_eq!(sim.get(1).unwrap().hash(), hash_name("c"));
    assert_eq!(sim.get(2).unwrap().hash(), hash_name("d"));
}

#[test]
fn auto_assigned_hashes_are_unique() {
    let mut sim = Simulation::new();
    let mut hashes = Vec::new();
    for _ in 0..64 {
        hashes.push(sim.add(ParticleSpec::default()).unwrap());
    }
    hashes.sort_unstable();
    hashes.dedup();
    assert_eq!(hashes.len(), 64);
}

#[test]
fn failed_add_is_transactional() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();

    // Geometrically impossible elements
    let err = sim
        .add(ParticleSpec {
            a: Some(1.0),
            e: Some(-0.2),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOrbit(_)));
    assert_eq!(sim.n(), 1);

    // Mixing Cartesian state with elements
    let err = sim
        .add(ParticleSpec {
            a: Some(1.0),
            x: Some(0.3),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOrbit(_)));
    assert_eq!(sim.n(), 1);
}

#[test]
fn elements_need_a_primary() {
    let mut sim = Simulation::new();
    let err = sim
        .add(ParticleSpec {
            a: Some(1.0),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::NoParticles));

    sim.add(star(1.0)).unwrap();
    let err = sim
        .add(ParticleSpec {
            a: Some(1.0),
            primary: Some(hash_name("missing")),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

// ==================================================================================
// Orbital element tests
// ==================================================================================

#[test]
fn elements_round_trip_to_high_accuracy() {
    let cases = [
        // (a, e, inc, Omega, omega, f)
        (1.0, 0.0, 0.0, 0.0, 0.0, 0.4),
        (1.0, 0.3, 0.5, 1.2, 2.1, 0.7),
        (2.5, 0.9, 1.1, 4.0, 5.5, 2.9),
        (0.7, 0.99, 2.8, 0.3, 1.0, 0.2),
        (1.52, 0.09, 0.04, 6.0, 3.0, 5.0),
    ];
    for &(a, e, inc, node, peri, f) in &cases {
        let mut sim = Simulation::new();
        sim.add(star(1.0)).unwrap();
        sim.add(ParticleSpec {
            m: 1.0e-3,
            a: Some(a),
            e: Some(e),
            inc: Some(inc),
            Omega: Some(node),
            omega: Some(peri),
            f: Some(f),
            ..Default::default()
        })
        .unwrap();

        let orbit = sim.orbit_of(1).unwrap();
        let tol_a = 1.0e-10 * a.abs().max(1.0);
        let tol_e = 1.0e-10 * e.abs().max(1.0);
        assert!((orbit.a - a).abs() < tol_a, "a: {} vs {}", orbit.a, a);
        assert!((orbit.e - e).abs() < tol_e, "e: {} vs {}", orbit.e, e);
        assert!((orbit.inc - inc).abs() < 1.0e-8, "inc: {} vs {}", orbit.inc, inc);
        if e > 1.0e-8 && inc > 1.0e-6 {
            assert!(angle_close(orbit.Omega, node), "Omega: {} vs {}", orbit.Omega, node);
            assert!(angle_close(orbit.omega, peri), "omega: {} vs {}", orbit.omega, peri);
            assert!(angle_close(orbit.f, f), "f: {} vs {}", orbit.f, f);
        }
    }
}

fn angle_close(x: f64, y: f64) -> bool {
    let two_pi = 2.0 * std::f64::consts::PI;
    let d = (x - y).rem_euclid(two_pi);
    d < 1.0e-8 || (two_pi - d) < 1.0e-8
}

#[test]
fn circular_coplanar_orbit_keeps_a_despite_singular_angles() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec {
        a: Some(1.0),
        e: Some(0.0),
        inc: Some(0.0),
        f: Some(2.2),
        ..Default::default()
    })
    .unwrap();

    let orbit = sim.orbit_of(1).unwrap();
    assert!((orbit.a - 1.0).abs() < 1.0e-12);
    assert!(orbit.e < 1.0e-12);
    // omega and Omega are undefined here; the position angle is still
    // recovered through f with both reported as 0
    assert!(angle_close(orbit.Omega + orbit.omega + orbit.f, 2.2));
}

#[test]
fn impossible_elements_are_rejected() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();

    let bad = [
        ParticleSpec { a: Some(1.0), e: Some(-0.1), ..Default::default() },
        ParticleSpec { a: Some(1.0), e: Some(1.0), ..Default::default() },
        ParticleSpec { a: Some(0.0), ..Default::default() },
        ParticleSpec { a: Some(-1.0), e: Some(0.5), ..Default::default() },
        ParticleSpec { a: Some(1.0), e: Some(1.5), ..Default::default() },
        // true anomaly beyond the asymptotes of the hyperbola
        ParticleSpec { a: Some(-1.0), e: Some(1.5), f: Some(3.0), ..Default::default() },
        // alternative angles both set
        ParticleSpec { a: Some(1.0), omega: Some(0.1), pomega: Some(0.2), ..Default::default() },
        ParticleSpec { a: Some(1.0), f: Some(0.1), M: Some(0.2), ..Default::default() },
    ];
    for spec in bad {
        assert!(
            matches!(sim.add(spec), Err(Error::InvalidOrbit(_))),
            "expected InvalidOrbit"
        );
        assert_eq!(sim.n(), 1);
    }
}

#[test]
fn mean_anomaly_solves_keplers_equation() {
    use gravsim::orbit::{eccentric_to_mean, mean_to_eccentric};
    for &e in &[0.0, 0.1, 0.5, 0.9, 0.99] {
        for k in 0..12 {
            let m = -3.0 + 0.5 * k as f64;
            let ecc_anom = mean_to_eccentric(m, e);
            assert!(
                (eccentric_to_mean(ecc_anom, e) - m).abs() < 1.0e-12,
                "e={e} M={m}"
            );
        }
    }
    // Hyperbolic branch
    for &e in &[1.1, 2.0, 5.0] {
        for &m in &[-4.0, -0.3, 0.0, 0.7, 6.0] {
            let hyp_anom = mean_to_eccentric(m, e);
            assert!(
                (eccentric_to_mean(hyp_anom, e) - m).abs() < 1.0e-11,
                "e={e} M={m}"
            );
        }
    }
}

#[test]
fn hyperbolic_orbit_round_trips() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec {
        a: Some(-2.0),
        e: Some(1.5),
        inc: Some(0.4),
        Omega: Some(1.0),
        omega: Some(2.0),
        f: Some(0.5),
        ..Default::default()
    })
    .unwrap();

    let orbit = sim.orbit_of(1).unwrap();
    assert!((orbit.a + 2.0).abs() < 1.0e-10);
    assert!((orbit.e - 1.5).abs() < 1.0e-10);
    assert!(orbit.period.is_nan());
}

#[test]
fn adding_by_mean_anomaly_matches_true_anomaly_path() {
    use gravsim::orbit::{mean_to_eccentric, eccentric_to_true, true_to_mean};
    let e = 0.3;
    let f = 1.1;
    let m = true_to_mean(f, e);

    let mut sim_f = Simulation::new();
    sim_f.add(star(1.0)).unwrap();
    sim_f
        .add(ParticleSpec { a: Some(1.0), e: Some(e), f: Some(f), ..Default::default() })
        .unwrap();

    let mut sim_m = Simulation::new();
    sim_m.add(star(1.0)).unwrap();
    sim_m
        .add(ParticleSpec { a: Some(1.0), e: Some(e), M: Some(m), ..Default::default() })
        .unwrap();

    let pf = sim_f.get(1).unwrap();
    let pm = sim_m.get(1).unwrap();
    assert!((pf.x - pm.x).norm() < 1.0e-12);
    assert!((pf.v - pm.v).norm() < 1.0e-12);

    // and the anomaly chain is self-consistent
    let f_back = eccentric_to_true(mean_to_eccentric(m, e), e);
    assert!(angle_close(f_back, f));
}

// ==================================================================================
// Center-of-mass tests
// ==================================================================================

#[test]
fn move_to_com_zeroes_total_momentum() {
    let mut sim = kepler_sim();
    sim.move_to_com().unwrap();

    let p_tot: NVec3 = sim.particles().iter().map(|p| p.m * p.v).sum();
    let m_tot: f64 = sim.particles().iter().map(|p| p.m).sum();
    let v_max = sim
        .particles()
        .iter()
        .map(|p| p.v.norm())
        .fold(0.0, f64::max);
    assert!(p_tot.norm() < 1.0e-12 * m_tot * v_max.max(1.0));
}

#[test]
fn move_to_com_is_idempotent() {
    let mut sim = kepler_sim();
    sim.move_to_com().unwrap();
    let before: Vec<NVec3> = sim.particles().iter().map(|p| p.x).collect();

    sim.move_to_com().unwrap();
    let size = before.iter().map(|x| x.norm()).fold(0.0, f64::max);
    for (p, x0) in sim.particles().iter().zip(before.iter()) {
        assert!((p.x - x0).norm() < 1.0e-14 * size.max(1.0));
    }
}

#[test]
fn com_of_empty_simulation_fails() {
    let mut sim = Simulation::new();
    assert!(matches!(sim.com(), Err(Error::NoParticles)));
    assert!(matches!(sim.move_to_com(), Err(Error::NoParticles)));
}

// ==================================================================================
// Gravity tests
// ==================================================================================

fn accels(sim: &Simulation) -> Vec<NVec3> {
    let model = ForceModel {
        gravity: sim.gravity,
        G: sim.G,
        softening2: sim.softening2,
        opening_angle: sim.opening_angle,
        extra: &[],
    };
    let mut out = vec![NVec3::zeros(); sim.n()];
    model.accelerations(sim.t, sim.particles(), &mut out);
    out
}

#[test]
fn gravity_newton_third_law() {
    let mut sim = Simulation::new();
    sim.add(ParticleSpec { m: 2.0, x: Some(-0.5), ..Default::default() }).unwrap();
    sim.add(ParticleSpec { m: 3.0, x: Some(0.5), ..Default::default() }).unwrap();

    let acc = accels(&sim);
    let net = acc[0] * sim.get(0).unwrap().m + acc[1] * sim.get(1).unwrap().m;
    assert!(net.norm() < 1.0e-12, "net momentum change not zero: {net:?}");
}

#[test]
fn gravity_inverse_square_law() {
    let mut near = Simulation::new();
    near.add(ParticleSpec { m: 1.0, x: Some(-0.5), ..Default::default() }).unwrap();
    near.add(ParticleSpec { m: 1.0, x: Some(0.5), ..Default::default() }).unwrap();

    let mut far = Simulation::new();
    far.add(ParticleSpec { m: 1.0, x: Some(-1.0), ..Default::default() }).unwrap();
    far.add(ParticleSpec { m: 1.0, x: Some(1.0), ..Default::default() }).unwrap();

    let ratio = accels(&near)[0].norm() / accels(&far)[0].norm();
    assert!((ratio - 4.0).abs() < 1.0e-3, "expected ~4x, got {ratio}");
}

#[test]
fn softening_prevents_blowup() {
    let mut sim = Simulation::new();
    sim.softening2 = 0.1;
    sim.add(ParticleSpec { m: 1.0, x: Some(-0.5e-9), ..Default::default() }).unwrap();
    sim.add(ParticleSpec { m: 1.0, x: Some(0.5e-9), ..Default::default() }).unwrap();

    assert!(accels(&sim)[0].norm() < 1.0e9, "softening failed");
}

#[test]
fn test_particles_exert_no_force() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec { m: 0.0, x: Some(1.0), ..Default::default() }).unwrap();

    let acc = accels(&sim);
    assert_eq!(acc[0].norm(), 0.0, "massless particle pulled the star");
    assert!(acc[1].norm() > 0.0, "gravity does act on the test particle");
}

#[test]
fn tree_gravity_agrees_with_direct_summation() {
    let mut sim = Simulation::new();
    for spec in cloud(50) {
        sim.add(spec).unwrap();
    }

    sim.gravity = GravityKind::Direct;
    let exact = accels(&sim);
    sim.gravity = GravityKind::Tree;
    sim.opening_angle = 0.5;
    let approx = accels(&sim);

    let a_typ = exact.iter().map(|a| a.norm()).fold(0.0, f64::max);
    for (i, (a, b)) in exact.iter().zip(approx.iter()).enumerate() {
        let rel = (a - b).norm() / a_typ;
        assert!(rel < 0.02, "particle {i}: tree error {rel}");
    }
}

#[test]
fn tree_handles_coincident_particles() {
    let mut sim = Simulation::new();
    sim.gravity = GravityKind::Tree;
    // Two particles at the same position must not recurse forever
    sim.add(ParticleSpec { m: 1.0, x: Some(1.0), ..Default::default() }).unwrap();
    sim.add(ParticleSpec { m: 1.0, x: Some(1.0), ..Default::default() }).unwrap();
    sim.add(ParticleSpec { m: 1.0, x: Some(-1.0), ..Default::default() }).unwrap();

    let acc = accels(&sim);
    assert!(acc[2].norm().is_finite());
}

// ==================================================================================
// Driver tests
// ==================================================================================

#[test]
fn integrate_to_current_time_is_a_no_op() {
    let mut sim = kepler_sim();
    sim.integrate(1.0).unwrap();
    let before: Vec<Particle> = sim.particles().to_vec();
    let steps = sim.steps_done;

    sim.integrate(1.0).unwrap();
    assert_eq!(sim.steps_done, steps);
    for (p, q) in sim.particles().iter().zip(before.iter()) {
        assert_eq!(p.x, q.x);
        assert_eq!(p.v, q.v);
    }
}

#[test]
fn one_kepler_orbit_returns_to_the_start() {
    let mut sim = Simulation::new();
    sim.dt = 1.0e-3;
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec {
        a: Some(1.0),
        name: Some("earth".to_string()),
        ..Default::default()
    })
    .unwrap();
    sim.add(ParticleSpec {
        a: Some(1.52),
        name: Some("mars".to_string()),
        ..Default::default()
    })
    .unwrap();
    sim.move_to_com().unwrap();

    sim.integrate(2.0 * std::f64::consts::PI).unwrap();

    let earth = sim.get_by_name("earth").unwrap();
    assert!(
        earth.x.x > 0.999 && earth.x.x < 1.001,
        "earth.x = {}",
        earth.x.x
    );
    assert!(earth.x.y.abs() < 1.0e-3, "earth.y = {}", earth.x.y);
}

#[test]
fn escape_is_detected_and_recoverable() {
    let mut sim = Simulation::new();
    sim.dt = 1.0e-3;
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec {
        x: Some(0.4),
        vx: Some(5.0),
        name: Some("mercury".to_string()),
        ..Default::default()
    })
    .unwrap();
    sim.add(planet(0.0, 0.7, 0.0, "venus")).unwrap();
    sim.add(planet(0.0, 1.0, 0.0, "earth")).unwrap();
    sim.exit_max_distance = 50.0;

    let mut escapes = 0;
    let t_max = 20.0 * 2.0 * std::f64::consts::PI;
    for k in 1..=1000 {
        let target = t_max * k as f64 / 1000.0;
        loop {
            match sim.integrate(target) {
                Ok(()) => break,
                Err(Error::Escape { t }) => {
                    assert_eq!(t, sim.t);
                    escapes += 1;
                    let offender = sim
                        .particles()
                        .iter()
                        .find(|p| p.r2() > 50.0 * 50.0)
                        .map(|p| p.hash())
                        .expect("escape reported but no particle beyond the radius");
                    sim.remove_by_hash(offender).unwrap();
                }
                Err(e) => panic!("unexpected failure: {e}"),
            }
        }
        // Surviving planets stay bounded after the escaper is gone
        if let Some(venus) = sim.get_by_name("venus") {
            assert!(venus.x.x.abs() <= 1.1, "venus drifted to {}", venus.x.x);
        }
    }

    assert_eq!(escapes, 1);
    assert_eq!(sim.n(), 3);
    assert!(sim.get_by_name("mercury").is_none());
    assert!(sim.get_by_name("venus").is_some());
}

#[test]
fn monotone_targets_reproduce_a_single_run_bitwise() {
    let mut one_shot = kepler_sim();
    one_shot.integrate(10.0).unwrap();

    let mut two_calls = kepler_sim();
    two_calls.integrate(5.0).unwrap();
    two_calls.integrate(10.0).unwrap();

    assert_eq!(one_shot.t, two_calls.t);
    for (p, q) in one_shot.particles().iter().zip(two_calls.particles().iter()) {
        assert_eq!(p.x, q.x, "positions diverged");
        assert_eq!(p.v, q.v, "velocities diverged");
    }
}

#[test]
fn adaptive_integrator_also_reproduces_split_runs() {
    let build = || {
        let mut sim = Simulation::new();
        sim.integrator = IntegratorKind::Rkf45;
        sim.dt = 0.1; // step cap; the controller picks the actual step
        sim.atol = 1.0e-12;
        sim.rtol = 1.0e-10;
        sim.add(star(1.0)).unwrap();
        sim.add(planet(1.0e-3, 1.0, 0.2, "p")).unwrap();
        sim
    };

    let mut one_shot = build();
    one_shot.integrate(3.0).unwrap();

    let mut two_calls = build();
    two_calls.integrate(1.3).unwrap();
    two_calls.integrate(3.0).unwrap();

    for (p, q) in one_shot.particles().iter().zip(two_calls.particles().iter()) {
        assert_eq!(p.x, q.x, "adaptive positions diverged");
        assert_eq!(p.v, q.v, "adaptive velocities diverged");
    }
}

#[test]
fn inexact_finish_stops_at_a_step_boundary() {
    let mut sim = kepler_sim();
    let target = 0.0105;
    sim.integrate_with(target, false).unwrap();
    assert!(sim.t >= target);
    assert!(sim.t - target < sim.dt);
}

#[test]
fn halt_flag_interrupts_at_a_step_boundary() {
    let mut sim = kepler_sim();
    let halt = sim.halt_handle();

    halt.store(true, Ordering::Relaxed);
    let err = sim.integrate(1.0).unwrap_err();
    assert!(matches!(err, Error::Interrupted { .. }));

    halt.store(false, Ordering::Relaxed);
    sim.integrate(1.0).unwrap();
    assert_eq!(sim.t, 1.0);
}

#[test]
fn driver_configuration_errors() {
    let mut empty = Simulation::new();
    assert!(matches!(empty.integrate(1.0), Err(Error::NoParticles)));

    let mut sim = kepler_sim();
    sim.dt = 0.0;
    assert!(matches!(sim.integrate(1.0), Err(Error::InvalidTimestep)));

    assert!(matches!(
        "ias15".parse::<IntegratorKind>(),
        Err(Error::UnknownIntegrator(_))
    ));
    assert_eq!("rk4".parse::<IntegratorKind>().unwrap(), IntegratorKind::Rk4);
}

#[test]
fn backward_integration_flips_the_timestep() {
    let mut sim = kepler_sim();
    sim.integrate(1.0).unwrap();
    sim.integrate(0.5).unwrap();
    assert_eq!(sim.t, 0.5);
    assert!(sim.dt < 0.0);
}

#[test]
fn close_encounter_is_detected() {
    let mut sim = Simulation::new();
    sim.gravity = GravityKind::None;
    sim.exit_min_distance = 0.05;
    sim.dt = 1.0e-3;
    sim.add(ParticleSpec { x: Some(-1.0), vx: Some(1.0), ..Default::default() }).unwrap();
    sim.add(ParticleSpec { x: Some(1.0), vx: Some(-1.0), ..Default::default() }).unwrap();

    let err = sim.integrate(2.0).unwrap_err();
    match err {
        Error::Encounter { t } => {
            assert!(t > 0.9 && t < 1.1, "encounter at t = {t}");
            assert_eq!(t, sim.t);
        }
        other => panic!("expected Encounter, got {other}"),
    }
}

#[test]
fn collision_check_uses_particle_radii() {
    let mut sim = Simulation::new();
    sim.gravity = GravityKind::None;
    sim.collision = CollisionKind::Direct;
    sim.dt = 1.0e-3;
    sim.add(ParticleSpec {
        radius: 0.06,
        x: Some(-1.0),
        vx: Some(1.0),
        ..Default::default()
    })
    .unwrap();
    sim.add(ParticleSpec {
        radius: 0.06,
        x: Some(1.0),
        vx: Some(-1.0),
        ..Default::default()
    })
    .unwrap();

    let err = sim.integrate(2.0).unwrap_err();
    assert!(matches!(err, Error::Collision { .. }));
    assert!(sim.t < 1.05);
}

#[test]
fn heartbeat_runs_once_per_step() {
    let mut sim = kepler_sim();
    let count = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&count);
    sim.set_heartbeat(move |_t, _particles| {
        seen.fetch_add(1, Ordering::Relaxed);
    });

    sim.integrate(0.01).unwrap();
    let calls = count.load(Ordering::Relaxed);
    assert_eq!(calls, sim.steps_done);
    assert!(calls >= 9, "expected ~10 steps, saw {calls}");
}

#[test]
fn switching_integrators_mid_run_is_legal() {
    let mut sim = kepler_sim();
    sim.integrate(1.0).unwrap();
    sim.integrator = IntegratorKind::Rk4;
    sim.integrate(2.0).unwrap();
    sim.integrator = IntegratorKind::Verlet;
    sim.integrate(3.0).unwrap();
    assert_eq!(sim.t, 3.0);
}

// ==================================================================================
// Integrator accuracy tests
// ==================================================================================

#[test]
fn leapfrog_energy_drift_stays_bounded() {
    let mut sim = Simulation::new();
    sim.dt = 1.0e-3;
    sim.add(star(1.0)).unwrap();
    sim.add(planet(1.0e-3, 1.0, 0.1, "p")).unwrap();
    sim.move_to_com().unwrap();

    let e0 = sim.energy();
    sim.integrate(10.0 * 2.0 * std::f64::consts::PI).unwrap();
    let drift = ((sim.energy() - e0) / e0).abs();
    assert!(drift < 1.0e-5, "relative energy drift {drift}");
}

#[test]
fn verlet_energy_drift_stays_bounded() {
    let mut sim = Simulation::new();
    sim.integrator = IntegratorKind::Verlet;
    sim.dt = 1.0e-3;
    sim.add(star(1.0)).unwrap();
    sim.add(planet(1.0e-3, 1.0, 0.1, "p")).unwrap();
    sim.move_to_com().unwrap();

    let e0 = sim.energy();
    sim.integrate(10.0 * 2.0 * std::f64::consts::PI).unwrap();
    let drift = ((sim.energy() - e0) / e0).abs();
    assert!(drift < 1.0e-5, "relative energy drift {drift}");
}

#[test]
fn rk4_tracks_a_circular_orbit_closely() {
    let mut sim = Simulation::new();
    sim.integrator = IntegratorKind::Rk4;
    sim.dt = 1.0e-3;
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec { a: Some(1.0), ..Default::default() }).unwrap();

    sim.integrate(2.0 * std::f64::consts::PI).unwrap();
    let p = sim.get(1).unwrap();
    let err = (p.x - NVec3::new(1.0, 0.0, 0.0)).norm();
    assert!(err < 1.0e-8, "position error {err}");
}

#[test]
fn rkf45_meets_its_tolerances_on_a_circular_orbit() {
    let mut sim = Simulation::new();
    sim.integrator = IntegratorKind::Rkf45;
    sim.dt = 0.1;
    sim.atol = 1.0e-10;
    sim.rtol = 1.0e-10;
    sim.add(star(1.0)).unwrap();
    sim.add(ParticleSpec { a: Some(1.0), ..Default::default() }).unwrap();

    sim.integrate(2.0 * std::f64::consts::PI).unwrap();
    let p = sim.get(1).unwrap();
    let err = (p.x - NVec3::new(1.0, 0.0, 0.0)).norm();
    assert!(err < 1.0e-5, "position error {err}");
    // The controller actually subdivided rather than marching at the cap
    assert!(sim.steps_done > 62, "only {} steps", sim.steps_done);
}

#[test]
fn elements_can_be_measured_against_a_named_primary() {
    let mut sim = Simulation::new();
    sim.add(star(1.0)).unwrap();
    sim.add(planet(1.0e-3, 1.0, 0.0, "earth")).unwrap();
    // A satellite of the second body, not of the star
    sim.add(ParticleSpec {
        a: Some(0.01),
        primary: Some(hash_name("earth")),
        name: Some("moon".to_string()),
        ..Default::default()
    })
    .unwrap();

    // Relative to its own primary the satellite orbit comes back exactly
    let moon = sim.orbit_of_with_primary(2, hash_name("earth")).unwrap();
    assert!((moon.a - 0.01).abs() < 1.0e-10, "a = {}", moon.a);
    assert!(moon.e < 1.0e-8, "e = {}", moon.e);

    // Relative to the default primary (the star) the same state gives a
    // completely different conic, nothing like the 0.01 satellite orbit
    let helio = sim.orbit_of(2).unwrap();
    assert!(helio.a > 0.5, "a = {}", helio.a);

    assert!(matches!(
        sim.orbit_of_with_primary(2, hash_name("missing")),
        Err(Error::NotFound)
    ));
}

#[test]
fn osculating_elements_survive_integration() {
    let mut sim = kepler_sim();
    sim.move_to_com().unwrap();
    sim.integrate(3.0).unwrap();

    let orbit = sim.orbit_of_hash(hash_name("earth")).unwrap();
    assert!((orbit.a - 1.0).abs() < 5.0e-3, "a = {}", orbit.a);
    assert!((orbit.e - 0.1).abs() < 5.0e-3, "e = {}", orbit.e);
}

// ==================================================================================
// Additional force tests
// ==================================================================================

struct LinearDrag {
    k: f64,
}

impl Force for LinearDrag {
    fn accumulate(&self, _t: f64, particles: &[Particle], out: &mut [NVec3]) {
        for (p, a) in particles.iter().zip(out.iter_mut()) {
            *a -= self.k * p.v;
        }
    }
}

#[test]
fn additional_forces_compose_with_gravity() {
    let mut sim = Simulation::new();
    sim.gravity = GravityKind::None;
    sim.dt = 1.0e-3;
    sim.add(ParticleSpec { m: 1.0, vx: Some(1.0), ..Default::default() }).unwrap();
    sim.add_force(LinearDrag { k: 1.0 });

    sim.integrate(1.0).unwrap();
    let v = sim.get(0).unwrap().v.x;
    let expected = (-1.0f64).exp();
    assert!((v - expected).abs() < 1.0e-2, "v = {v}, expected ~{expected}");
}

// ==================================================================================
// Snapshot tests
// ==================================================================================

#[test]
fn snapshot_round_trips_bitwise() {
    let mut sim = kepler_sim();
    sim.exit_max_distance = 40.0;
    sim.softening2 = 1.0e-6;
    sim.integrate(1.5).unwrap();

    let mut buf = Vec::new();
    sim.save(&mut buf).unwrap();
    let restored = Simulation::load(&mut buf.as_slice()).unwrap();

    assert_eq!(restored.t, sim.t);
    assert_eq!(restored.dt, sim.dt);
    assert_eq!(restored.G, sim.G);
    assert_eq!(restored.exit_max_distance, 40.0);
    assert_eq!(restored.steps_done, sim.steps_done);
    assert_eq!(restored.n(), sim.n());
    for (p, q) in restored.particles().iter().zip(sim.particles().iter()) {
        assert_eq!(p.m, q.m);
        assert_eq!(p.x, q.x);
        assert_eq!(p.v, q.v);
        assert_eq!(p.hash(), q.hash());
    }

    // String identities keep resolving after a reload
    assert!(restored.get_by_hash(hash_name("earth")).is_some());
}

#[test]
fn snapshot_files_round_trip_and_continue_identically() {
    let mut sim = kepler_sim();
    sim.integrate(1.0).unwrap();

    let path = std::env::temp_dir().join("gravsim_snapshot_roundtrip.bin");
    sim.save_to(&path).unwrap();
    let mut a = Simulation::load_from(&path).unwrap();
    let mut b = Simulation::load_from(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(a.t, sim.t);
    assert_eq!(a.n(), sim.n());

    // Two restored copies evolve identically
    a.integrate(2.0).unwrap();
    b.integrate(2.0).unwrap();
    for (p, q) in a.particles().iter().zip(b.particles().iter()) {
        assert_eq!(p.x, q.x);
        assert_eq!(p.v, q.v);
    }
}

#[test]
fn corrupt_snapshots_are_rejected() {
    let garbage = b"NOPE";
    assert!(matches!(
        Simulation::load(&mut garbage.as_slice()),
        Err(Error::BadSnapshot(_))
    ));
}

// ==================================================================================
// Inspection tests
// ==================================================================================

#[test]
fn status_reports_the_scalars() {
    let mut sim = kepler_sim();
    sim.integrate(0.5).unwrap();
    let status = sim.status();
    assert!(status.contains("gravsim"));
    assert!(status.contains(concat!("built:      ", env!("GRAVSIM_BUILD_DATE"))));
    assert!(status.contains("leapfrog"));
    assert!(status.contains("steps done"));
}
