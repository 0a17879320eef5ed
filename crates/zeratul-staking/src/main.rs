//! zeratul-staking - inspect parameters and replay staking scenarios

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeratul_staking::{StakingConfig, TokenId};

mod script;

use script::{Script, Simulation};

#[derive(Parser)]
#[command(name = "zeratul-staking")]
#[command(about = "Delegated staking ledger: parameters and scenario simulation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Print the effective ledger parameters as TOML
    Params {
        /// Parameter file (defaults apply to missing keys)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Replay a JSON script of timed operations against an in-memory ledger
    Simulate {
        /// Script file
        #[arg(short, long)]
        script: PathBuf,

        /// Parameter file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print events as JSON lines instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "zeratul_staking=info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Params { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
        }
        Command::Simulate { script, config, json } => {
            let config = load_config(config.as_ref())?;
            simulate(&script, config, json)?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<StakingConfig> {
    match path {
        Some(path) => {
            tracing::info!("loading parameters from {}", path.display());
            Ok(StakingConfig::load(path)?)
        }
        None => Ok(StakingConfig::default()),
    }
}

fn simulate(path: &PathBuf, config: StakingConfig, json: bool) -> Result<()> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let script: Script = serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;

    tracing::info!("replaying {} steps from t={}", script.steps.len(), script.start);
    let sim = Simulation::new(config, script.start)?;
    let reports = sim.run(&script)?;
    let events = sim.service.drain_events();

    if json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    println!("\n=== Steps ===");
    for report in &reports {
        match &report.result {
            Ok(note) if note.is_empty() => println!("[{:>3}] t={:<10} {}", report.index, report.at, report.label),
            Ok(note) => println!("[{:>3}] t={:<10} {} -> {}", report.index, report.at, report.label, note),
            Err(e) => println!("[{:>3}] t={:<10} {} FAILED ({:?}): {}", report.index, report.at, report.label, e.kind(), e),
        }
    }

    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    let svc = &sim.service;
    println!("\n=== Summary ===");
    println!("Steps: {} ({} failed)", reports.len(), failed);
    println!("Events: {}", events.len());
    println!("Total staked: {}", svc.total_staked()?);
    println!("Total cooling: {}", svc.total_cooling()?);
    println!("Total parked: {}", svc.total_parked()?);
    println!("Total forfeited: {}", svc.total_forfeited()?);

    println!("\n=== Validators ===");
    for v in svc.validators()? {
        let status = if v.slashed { "slashed" } else if v.active { "active" } else { "inactive" };
        let commission = svc.accrued_commission(v.id, TokenId::NATIVE).unwrap_or(0);
        println!(
            "#{:<5} {:<8} delegated={} cooling={} native_commission={}",
            v.id, status, v.delegated, v.cooling, commission
        );
    }
    Ok(())
}
