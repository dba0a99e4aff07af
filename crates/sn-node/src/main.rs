//! The `sweepnet` binary.
//!
//! Host mode reads a run configuration, binds the dispatch server,
//! registers and launches workers, and drives the sweep to completion,
//! printing a JSON report.  Client mode is what launch command templates
//! start on the remote machines: it connects back to the host and runs
//! the objective command per candidate.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sn_client::{ClientConfig, ClientRunner, ProcessEvaluator};
use sn_host::{HostCoordinator, RunSummary};
use sn_search::{BestObservation, GridProposer, RandomProposer};
use sn_types::{Candidate, Observation, ParamSet, Proposer};

use crate::config::{HostFileConfig, StrategyProposer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Host,
    Client,
}

#[derive(Debug, Parser)]
#[command(name = "sweepnet", version, about = "Distributed hyperparameter sweeps")]
struct Cli {
    #[arg(long, value_enum, default_value = "host")]
    mode: Mode,

    /// Host mode: path to the run configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Client mode: host dispatch address to connect back to.
    #[arg(long)]
    connect: Option<String>,

    /// Client mode: this worker's address as the host knows it.
    #[arg(long)]
    address: Option<String>,

    /// Client mode: machine category, echoed in the handshake.
    #[arg(long, default_value = "default")]
    category: String,

    /// Client mode: objective command (one JSON candidate line on stdin,
    /// one JSON score line on stdout).
    #[arg(long)]
    exec: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Host => run_host(cli).await,
        Mode::Client => run_client(cli).await,
    }
}

async fn run_host(cli: Cli) -> Result<()> {
    let path = cli
        .config
        .context("--config is required in host mode")?;
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file = HostFileConfig::from_json(&raw)?;

    match file.proposer()? {
        StrategyProposer::Random(p) => drive(file, p).await,
        StrategyProposer::Grid(p) => drive(file, p).await,
    }
}

async fn run_client(cli: Cli) -> Result<()> {
    let connect = cli.connect.context("--connect is required in client mode")?;
    let address = cli.address.context("--address is required in client mode")?;
    let exec = cli.exec.context("--exec is required in client mode")?;

    let config = ClientConfig {
        connect,
        address,
        category: cli.category,
    };
    ClientRunner::new(config, ProcessEvaluator::new(exec))
        .run()
        .await?;
    Ok(())
}

/// Final report printed to stdout after a host run.
#[derive(Serialize)]
struct SweepReport {
    summary: RunSummary,
    best: Option<BestObservation>,
}

/// Built-in proposers that can report their best observation.
trait Reporting: Proposer {
    fn best(&self) -> Option<&BestObservation>;
}

impl Reporting for RandomProposer {
    fn best(&self) -> Option<&BestObservation> {
        RandomProposer::best(self)
    }
}

impl Reporting for GridProposer {
    fn best(&self) -> Option<&BestObservation> {
        GridProposer::best(self)
    }
}

/// Hands the coordinator a proposer while keeping a handle for the report.
struct Shared<P>(Arc<Mutex<P>>);

impl<P: Proposer> Proposer for Shared<P> {
    fn propose(&mut self, batch: usize) -> Vec<ParamSet> {
        self.0.lock().propose(batch)
    }

    fn observe(&mut self, candidate: &Candidate, observation: &Observation) {
        self.0.lock().observe(candidate, observation)
    }

    fn should_stop(&self) -> bool {
        self.0.lock().should_stop()
    }
}

async fn drive<P: Reporting + 'static>(file: HostFileConfig, proposer: P) -> Result<()> {
    let shared = Arc::new(Mutex::new(proposer));
    let coordinator =
        HostCoordinator::bind(file.coordinator_config(), Shared(Arc::clone(&shared))).await?;

    let registry = coordinator.registry();
    for worker in &file.workers {
        registry.register(worker.clone())?;
    }
    info!(
        addr = %coordinator.local_addr(),
        workers = file.workers.len(),
        "host ready"
    );

    let summary = coordinator.run().await?;
    let report = SweepReport {
        summary,
        best: shared.lock().best().cloned(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
