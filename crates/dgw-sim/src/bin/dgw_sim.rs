use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dgw_sim::{Scenario, SimError, SimLoop};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print the final report
    Run {
        /// Path to a TOML scenario
        #[arg(long, short, env = "DGW_SCENARIO")]
        scenario: PathBuf,
        /// Override the scenario's step count
        #[arg(long)]
        steps: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a scenario without running it
    Check {
        #[arg(long, short, env = "DGW_SCENARIO")]
        scenario: PathBuf,
    },
}

fn run(path: &Path, steps: Option<u64>, json: bool) -> Result<(), SimError> {
    let scenario = Scenario::load(path)?;
    let steps = steps.unwrap_or(scenario.steps);
    let mut sim = SimLoop::new(&scenario)?;
    info!("running {} for {} steps", path.display(), steps);
    let report = sim.run(steps);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

fn main() {
    let filter = std::env::var("DGW_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run {
            scenario,
            steps,
            json,
        } => run(scenario, *steps, *json),
        Commands::Check { scenario } => Scenario::load(scenario).map(|parsed| {
            println!(
                "ok: {} queues, {} groups, {} bindings",
                parsed.queues.len(),
                parsed.groups.len(),
                parsed.bindings.len()
            );
        }),
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}
