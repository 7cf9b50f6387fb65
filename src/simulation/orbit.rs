//! Orbital elements and their conversion to and from Cartesian state.
//!
//! Elements are always referenced to a primary body and use the owning
//! simulation's gravitational constant. Conversions follow the classical
//! rotation sequence (argument of periapsis, inclination, ascending node)
//! and handle the two singular loci explicitly:
//!
//! - `e = 0`: the argument of periapsis is undefined and reported as 0;
//!   the true anomaly degrades to the argument of latitude.
//! - `inc = 0`: the ascending node is undefined and reported as 0; angles
//!   normally measured from the node are measured from the x axis instead,
//!   so the longitude of periapsis `pomega = Omega + omega` stays well
//!   defined.
//!
//! Hyperbolic orbits (`e > 1`, `a < 0`) are supported; parabolic orbits
//! are rejected.

use crate::error::Error;
use crate::simulation::particle::{NVec3, Particle};

/// Relative floor below which eccentricity and node vectors are treated as
/// zero and the corresponding angles as undefined.
const MIN_REL: f64 = 1.0e-12;

/// Smallest inclination for which the ascending node is resolved.
const MIN_INC: f64 = 1.0e-8;

/// Osculating orbital elements of a particle relative to a primary.
///
/// Angles are in radians, normalized to `[0, 2pi)`. For hyperbolic orbits
/// `E` holds the hyperbolic anomaly and `period` is NaN.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy)]
pub struct Orbit {
    pub a: f64, // semi-major axis, negative for hyperbolic orbits
    pub e: f64, // eccentricity
    pub inc: f64, // inclination
    pub Omega: f64, // longitude of ascending node
    pub omega: f64, // argument of periapsis
    pub pomega: f64, // longitude of periapsis
    pub f: f64, // true anomaly
    pub E: f64, // eccentric (or hyperbolic) anomaly
    pub M: f64, // mean anomaly
    pub lambda: f64, // mean longitude
    pub d: f64, // separation from the primary
    pub period: f64, // orbital period
}

/// Wrap an angle into `[0, 2pi)`.
pub fn mod2pi(theta: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let r = theta % two_pi;
    if r < 0.0 {
        r + two_pi
    } else {
        r
    }
}

/// Solve Kepler's equation `M = E - e sin E` (elliptic) or
/// `M = e sinh F - F` (hyperbolic) for the eccentric anomaly.
pub fn mean_to_eccentric(m_anom: f64, e: f64) -> f64 {
    if e < 1.0 {
        // Wrap M into [-pi, pi) and seed with Danby's guess; Newton then
        // converges for the whole bound range, including e close to 1
        let pi = std::f64::consts::PI;
        let m = (m_anom + pi).rem_euclid(2.0 * pi) - pi;
        let mut ecc_anom = m + 0.85 * e * m.signum();
        for _ in 0..64 {
            let delta = (ecc_anom - e * ecc_anom.sin() - m) / (1.0 - e * ecc_anom.cos());
            ecc_anom -= delta;
            if delta.abs() < 1.0e-15 {
                break;
            }
        }
        ecc_anom + (m_anom - m)
    } else {
        // Hyperbolic anomaly; logarithmic seed keeps Newton stable for
        // large mean anomalies
        let m = m_anom;
        let mut hyp_anom = m.signum() * (2.0 * m.abs() / e + 1.8).ln();
        for _ in 0..64 {
            let delta = (e * hyp_anom.sinh() - hyp_anom - m) / (e * hyp_anom.cosh() - 1.0);
            hyp_anom -= delta;
            if delta.abs() < 1.0e-15 {
                break;
            }
        }
        hyp_anom
    }
}

/// True anomaly from the eccentric (or hyperbolic) anomaly.
pub fn eccentric_to_true(ecc_anom: f64, e: f64) -> f64 {
    if e < 1.0 {
        2.0 * f64::atan2(
            (1.0 + e).sqrt() * (ecc_anom / 2.0).sin(),
            (1.0 - e).sqrt() * (ecc_anom / 2.0).cos(),
        )
    } else {
        2.0 * (((e + 1.0) / (e - 1.0)).sqrt() * (ecc_anom / 2.0).tanh()).atan()
    }
}

/// Eccentric (or hyperbolic) anomaly from the true anomaly.
pub fn true_to_eccentric(f: f64, e: f64) -> f64 {
    if e < 1.0 {
        2.0 * f64::atan2(
            (1.0 - e).sqrt() * (f / 2.0).sin(),
            (1.0 + e).sqrt() * (f / 2.0).cos(),
        )
    } else {
        2.0 * (((e - 1.0) / (e + 1.0)).sqrt() * (f / 2.0).tan()).atanh()
    }
}

/// Mean anomaly from the eccentric (or hyperbolic) anomaly.
pub fn eccentric_to_mean(ecc_anom: f64, e: f64) -> f64 {
    if e < 1.0 {
        ecc_anom - e * ecc_anom.sin()
    } else {
        e * ecc_anom.sinh() - ecc_anom
    }
}

/// Mean anomaly straight from the true anomaly.
pub fn true_to_mean(f: f64, e: f64) -> f64 {
    eccentric_to_mean(true_to_eccentric(f, e), e)
}

/// Build a particle from orbital elements relative to `primary`.
///
/// The returned particle has no identity yet; the store assigns one on
/// insertion. Fails with `InvalidOrbit` for geometrically impossible
/// element sets.
#[allow(non_snake_case, clippy::too_many_arguments)]
pub fn particle_from_orbit(
    G: f64,
    primary: &Particle,
    m: f64,
    a: f64,
    e: f64,
    inc: f64,
    Omega: f64,
    omega: f64,
    f: f64,
) -> Result<Particle, Error> {
    if e < 0.0 {
        return Err(Error::InvalidOrbit("eccentricity must be non-negative"));
    }
    if e == 1.0 {
        return Err(Error::InvalidOrbit(
            "parabolic orbits (e=1) are not representable with a semi-major axis",
        ));
    }
    if a == 0.0 {
        return Err(Error::InvalidOrbit("semi-major axis must be non-zero"));
    }
    if e < 1.0 && a < 0.0 {
        return Err(Error::InvalidOrbit("bound orbits (e<1) require a > 0"));
    }
    if e > 1.0 && a > 0.0 {
        return Err(Error::InvalidOrbit("hyperbolic orbits (e>1) require a < 0"));
    }
    if e > 1.0 {
        // Beyond the asymptotes the conic has no physical branch
        let f_max = (-1.0 / e).acos();
        let f_wrapped = f64::atan2(f.sin(), f.cos());
        if f_wrapped.abs() >= f_max {
            return Err(Error::InvalidOrbit(
                "true anomaly beyond the asymptotes of the hyperbola",
            ));
        }
    }
    let mu = G * (primary.m + m);
    if mu <= 0.0 {
        return Err(Error::InvalidOrbit(
            "gravitational parameter of the pair is zero",
        ));
    }

    let r = a * (1.0 - e * e) / (1.0 + e * f.cos());
    let v0 = (mu / a / (1.0 - e * e)).sqrt(); // valid for both branches

    let (c_o, s_o) = (Omega.cos(), Omega.sin());
    let (c_p, s_p) = (omega.cos(), omega.sin());
    let (c_f, s_f) = (f.cos(), f.sin());
    let (c_i, s_i) = (inc.cos(), inc.sin());

    // Murray & Dermott eq. 2.122: periapsis, inclination, node rotations
    // applied to the in-plane position
    let x = NVec3::new(
        r * (c_o * (c_p * c_f - s_p * s_f) - s_o * (s_p * c_f + c_p * s_f) * c_i),
        r * (s_o * (c_p * c_f - s_p * s_f) + c_o * (s_p * c_f + c_p * s_f) * c_i),
        r * (s_p * c_f + c_p * s_f) * s_i,
    );
    // Same rotation applied to the in-plane velocity (M&D eq. 2.36)
    let v = NVec3::new(
        v0 * ((e + c_f) * (-c_i * c_p * s_o - c_o * s_p) - s_f * (c_p * c_o - c_i * s_p * s_o)),
        v0 * ((e + c_f) * (c_i * c_p * c_o - s_o * s_p) - s_f * (c_p * s_o + c_i * s_p * c_o)),
        v0 * ((e + c_f) * c_p * s_i - s_f * s_i * s_p),
    );

    Ok(Particle {
        m,
        radius: 0.0,
        x: primary.x + x,
        v: primary.v + v,
        hash: 0,
        name: None,
    })
}

/// Osculating elements of `p` relative to `primary`.
///
/// Fails with `InvalidOrbit` when no conic is defined: coincident bodies,
/// zero combined mass, or a purely radial trajectory.
#[allow(non_snake_case)]
pub fn orbit_from_particle(G: f64, p: &Particle, primary: &Particle) -> Result<Orbit, Error> {
    let mu = G * (primary.m + p.m);
    if mu <= 0.0 {
        return Err(Error::InvalidOrbit(
            "gravitational parameter of the pair is zero",
        ));
    }
    let dx = p.x - primary.x;
    let dv = p.v - primary.v;
    let d = dx.norm();
    if d == 0.0 {
        return Err(Error::InvalidOrbit("particle coincides with its primary"));
    }

    let v2 = dv.norm_squared();
    let inv_a = 2.0 / d - v2 / mu;
    if inv_a == 0.0 {
        return Err(Error::InvalidOrbit(
            "parabolic trajectory has no semi-major axis",
        ));
    }
    let a = 1.0 / inv_a;

    let h_vec = dx.cross(&dv);
    let h = h_vec.norm();
    if h / (d * v2.sqrt().max(f64::MIN_POSITIVE)) < MIN_REL {
        return Err(Error::InvalidOrbit("radial trajectory has no orbital plane"));
    }

    // Eccentricity vector, points at periapsis
    let vr = dx.dot(&dv) / d;
    let e_vec = (dx * (v2 - mu / d) - dv * (d * vr)) / mu;
    let e = e_vec.norm();

    let inc = (h_vec.z / h).acos();

    // Node vector lies along the intersection of the orbital and reference
    // planes
    let n_vec = NVec3::new(-h_vec.y, h_vec.x, 0.0);
    let n = n_vec.norm();
    let planar = inc < MIN_INC || (std::f64::consts::PI - inc).abs() < MIN_INC;
    let circular = e < MIN_REL;

    let Omega = if planar {
        0.0
    } else {
        mod2pi(f64::atan2(n_vec.y, n_vec.x))
    };

    let omega;
    let f;
    if circular {
        // Periapsis undefined; measure the position angle from the node
        // (or from the x axis when the node is undefined too)
        omega = 0.0;
        f = if planar {
            mod2pi(f64::atan2(dx.y, dx.x))
        } else {
            let mut u = (n_vec.dot(&dx) / (n * d)).clamp(-1.0, 1.0).acos();
            if dx.z < 0.0 {
                u = 2.0 * std::f64::consts::PI - u;
            }
            u
        };
    } else if planar {
        // Node undefined; the periapsis angle absorbs Omega so that
        // pomega = Omega + omega stays continuous across inc -> 0
        omega = mod2pi(f64::atan2(e_vec.y, e_vec.x));
        let mut nu = (e_vec.dot(&dx) / (e * d)).clamp(-1.0, 1.0).acos();
        if vr < 0.0 {
            nu = 2.0 * std::f64::consts::PI - nu;
        }
        f = nu;
    } else {
        let mut w = (n_vec.dot(&e_vec) / (n * e)).clamp(-1.0, 1.0).acos();
        if e_vec.z < 0.0 {
            w = 2.0 * std::f64::consts::PI - w;
        }
        omega = w;
        let mut nu = (e_vec.dot(&dx) / (e * d)).clamp(-1.0, 1.0).acos();
        if vr < 0.0 {
            nu = 2.0 * std::f64::consts::PI - nu;
        }
        f = nu;
    }

    let ecc_anom = true_to_eccentric(f, e);
    let mean_anom = eccentric_to_mean(ecc_anom, e);
    let pomega = mod2pi(Omega + omega);
    let period = if a > 0.0 {
        2.0 * std::f64::consts::PI * (a * a * a / mu).sqrt()
    } else {
        f64::NAN
    };

    Ok(Orbit {
        a,
        e,
        inc,
        Omega,
        omega,
        pomega,
        f,
        E: ecc_anom,
        M: mean_anom,
        lambda: mod2pi(pomega + mean_anom),
        d,
        period,
    })
}
