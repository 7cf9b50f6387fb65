//! Binary snapshots of the simulation state.
//!
//! Layout (all integers and floats little-endian):
//!
//! ```text
//! magic "GSIM" | version u32 |
//! t f64 | dt f64 | G f64 | softening2 f64 | opening_angle f64 |
//! atol f64 | rtol f64 | exit_max_distance f64 | exit_min_distance f64 |
//! integrator u8 | gravity u8 | collision u8 |
//! steps_done u64 | next_key u64 | n u64 |
//! n * (m f64 | radius f64 | x f64 | y f64 | z f64 | vx f64 | vy f64 | vz f64 | hash u64)
//! ```
//!
//! Hash identities round-trip verbatim, and string-derived identities were
//! produced with [`hash_name`](crate::simulation::particle::hash_name), so
//! a snapshot written by one process resolves the same names in another.
//! Names themselves, callbacks and additional forces are not persisted.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::Error;
use crate::simulation::forces::{CollisionKind, GravityKind};
use crate::simulation::integrator::IntegratorKind;
use crate::simulation::particle::{NVec3, Particle};
use crate::simulation::sim::Simulation;

const MAGIC: [u8; 4] = *b"GSIM";
const VERSION: u32 = 1;

impl Simulation {
    /// Write a snapshot to `w`.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(&MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        for scalar in [
            self.t,
            self.dt,
            self.G,
            self.softening2,
            self.opening_angle,
            self.atol,
            self.rtol,
            self.exit_max_distance,
            self.exit_min_distance,
        ] {
            w.write_all(&scalar.to_le_bytes())?;
        }
        w.write_all(&[
            self.integrator.tag(),
            gravity_tag(self.gravity),
            collision_tag(self.collision),
        ])?;
        w.write_all(&self.steps_done.to_le_bytes())?;
        w.write_all(&self.next_key.to_le_bytes())?;
        w.write_all(&(self.particles.len() as u64).to_le_bytes())?;
        for p in &self.particles {
            for scalar in [p.m, p.radius, p.x.x, p.x.y, p.x.z, p.v.x, p.v.y, p.v.z] {
                w.write_all(&scalar.to_le_bytes())?;
            }
            w.write_all(&p.hash().to_le_bytes())?;
        }
        Ok(())
    }

    /// Write a snapshot to the file at `path`.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut w = BufWriter::new(File::create(path)?);
        self.save(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Reconstruct a simulation from a snapshot. The hash-to-index map is
    /// rebuilt; integrator scratch starts fresh.
    pub fn load<R: Read>(r: &mut R) -> Result<Simulation, Error> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::BadSnapshot("wrong magic bytes"));
        }
        if read_u32(r)? != VERSION {
            return Err(Error::BadSnapshot("unsupported snapshot version"));
        }

        let mut sim = Simulation::new();
        sim.t = read_f64(r)?;
        sim.dt = read_f64(r)?;
        sim.G = read_f64(r)?;
        sim.softening2 = read_f64(r)?;
        sim.opening_angle = read_f64(r)?;
        sim.atol = read_f64(r)?;
        sim.rtol = read_f64(r)?;
        sim.exit_max_distance = read_f64(r)?;
        sim.exit_min_distance = read_f64(r)?;

        let mut tags = [0u8; 3];
        r.read_exact(&mut tags)?;
        sim.integrator =
            IntegratorKind::from_tag(tags[0]).ok_or(Error::BadSnapshot("unknown integrator tag"))?;
        sim.gravity = gravity_from_tag(tags[1]).ok_or(Error::BadSnapshot("unknown gravity tag"))?;
        sim.collision =
            collision_from_tag(tags[2]).ok_or(Error::BadSnapshot("unknown collision tag"))?;

        sim.steps_done = read_u64(r)?;
        sim.next_key = read_u64(r)?;
        let n = read_u64(r)? as usize;

        for i in 0..n {
            let m = read_f64(r)?;
            let radius = read_f64(r)?;
            let x = NVec3::new(read_f64(r)?, read_f64(r)?, read_f64(r)?);
            let v = NVec3::new(read_f64(r)?, read_f64(r)?, read_f64(r)?);
            let hash = read_u64(r)?;
            if sim.index.insert(hash, i).is_some() {
                return Err(Error::BadSnapshot("duplicate particle hash"));
            }
            sim.particles.push(Particle {
                m,
                radius,
                x,
                v,
                hash,
                name: None,
            });
        }
        Ok(sim)
    }

    /// Read a snapshot from the file at `path`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Simulation, Error> {
        let mut r = BufReader::new(File::open(path)?);
        Simulation::load(&mut r)
    }
}

fn gravity_tag(g: GravityKind) -> u8 {
    match g {
        GravityKind::None => 0,
        GravityKind::Direct => 1,
        GravityKind::Tree => 2,
    }
}

fn gravity_from_tag(tag: u8) -> Option<GravityKind> {
    match tag {
        0 => Some(GravityKind::None),
        1 => Some(GravityKind::Direct),
        2 => Some(GravityKind::Tree),
        _ => None,
    }
}

fn collision_tag(c: CollisionKind) -> u8 {
    match c {
        CollisionKind::None => 0,
        CollisionKind::Direct => 1,
    }
}

fn collision_from_tag(tag: u8) -> Option<CollisionKind> {
    match tag {
        0 => Some(CollisionKind::None),
        1 => Some(CollisionKind::Direct),
        _ => None,
    }
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
