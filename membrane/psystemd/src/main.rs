//! `psystemd` CLI/daemon: seeds a P-system from a JSON scenario, drives
//! evolution cycles on an interval and prints statistics or topology as JSON.

mod scenario;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use membrane_core::{CycleReport, TopologyReport};
use membrane_spec::{EvolutionEvent, SystemStatistics};
use membrane_transport::Courier;

use crate::scenario::{Scenario, Seeded};

/// psystemd command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Scenario definition.
    #[arg(
        long,
        env = "PSYSTEM_SCENARIO",
        value_name = "FILE",
        help = "Path to a JSON scenario (config, membranes, connections, messages, rules)"
    )]
    scenario: String,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for psystemd.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Inject scenario messages, then run evolution cycles.
    Run {
        /// Number of cycles.
        #[arg(short, long, default_value = "1")]
        cycles: u64,
        /// Pause between cycles in milliseconds.
        #[arg(short, long, default_value = "0")]
        interval_ms: u64,
        /// Include the audit history in the summary.
        #[arg(long)]
        history: bool,
    },
    /// Print the statistics snapshot of the seeded system.
    Stats,
    /// Print the topology of the seeded system.
    Topology,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    cycles: Vec<CycleReport>,
    statistics: SystemStatistics,
    topology: TopologyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<Vec<EvolutionEvent>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let scenario = Scenario::load(&cli.scenario).await?;
    let seeded = scenario.build()?;

    match cli.command {
        Commands::Run {
            cycles,
            interval_ms,
            history,
        } => run(&scenario, seeded, cycles, interval_ms, history).await?,
        Commands::Stats => print_json(&seeded.system.get_statistics())?,
        Commands::Topology => print_json(&seeded.system.analyze_topology())?,
    }
    Ok(())
}

async fn run(
    scenario: &Scenario,
    seeded: Seeded,
    cycles: u64,
    interval_ms: u64,
    history: bool,
) -> anyhow::Result<()> {
    let Seeded { system, names } = seeded;
    let system = Arc::new(system);
    system.start();
    info!(membranes = system.membrane_count(), "psystemd started");

    let courier = Courier::in_process(system.clone());
    for injection in &scenario.messages {
        let port = names.port(&injection.from, &injection.port)?;
        let report = courier
            .send(&port, injection.outbound(), None)
            .await
            .with_context(|| format!("sending from {port}"))?;
        if !report.is_complete() {
            warn!(port = %port, failed = report.failed.len(), "injected message partially delivered");
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut reports = Vec::new();
    for _ in 0..cycles {
        ticker.tick().await;
        let report = system.execute_evolution_cycle()?;
        info!(
            cycle = report.cycle,
            fired = report.fired,
            failed = report.failed,
            membranes = system.membrane_count(),
            "evolution cycle"
        );
        reports.push(report);
    }
    system.stop();

    print_json(&RunSummary {
        cycles: reports,
        statistics: system.get_statistics(),
        topology: system.analyze_topology(),
        history: history.then(|| system.evolution_history()),
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
