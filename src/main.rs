use gravsim::{bench_gravity, bench_leapfrog, Error, Scenario, ScenarioConfig};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, default_value = "kepler.yaml")]
    file_name: String,

    /// Run the gravity and integrator benchmarks instead of a scenario
    #[arg(long)]
    bench: bool,
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(file_name);
    let file = File::open(&config_path)?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;
    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.bench {
        bench_gravity();
        bench_leapfrog();
        return Ok(());
    }

    let scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    let Scenario { mut sim, t_end } = Scenario::build(scenario_cfg)?;
    sim.move_to_com()?;
    info!(n = sim.n(), t_end, "scenario loaded");

    // Integrate to t_end, dropping any particle the escape watchdog flags
    loop {
        match sim.integrate(t_end) {
            Ok(()) => break,
            Err(Error::Escape { t }) => {
                let r2_max = sim.exit_max_distance * sim.exit_max_distance;
                let escaped: Vec<u64> = sim
                    .particles()
                    .iter()
                    .filter(|p| p.r2() > r2_max)
                    .map(|p| p.hash())
                    .collect();
                for hash in escaped {
                    let p = sim.remove_by_hash(hash)?;
                    warn!(t, hash, name = p.name.as_deref(), "removed escaped particle");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("{}", sim.status());
    Ok(())
}
