//! Host run configuration, loaded from a JSON file.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use sn_host::CoordinatorConfig;
use sn_search::{
    GridProposer, ObjectiveDirection, RandomProposer, SearchSpace,
};
use sn_types::WorkerDescriptor;

/// Which built-in search strategy drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Random,
    Grid,
}

fn default_listen() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_batch_size() -> usize {
    2
}

fn default_dispatch_timeout_secs() -> u64 {
    600
}

fn default_retry_budget() -> u32 {
    2
}

fn default_float_steps() -> usize {
    5
}

/// One optimization run as described on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostFileConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Address workers connect back to, when it differs from `listen`
    /// (NAT, port forwarding).
    #[serde(default)]
    pub advertise: Option<String>,
    /// Machine category → launch command template.
    #[serde(default)]
    pub categories: HashMap<String, String>,
    /// Workers to launch.  Externally started workers need no entry here;
    /// they are registered when they connect.
    #[serde(default)]
    pub workers: Vec<WorkerDescriptor>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default)]
    pub max_observations: Option<usize>,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Grid points per continuous dimension (grid strategy only).
    #[serde(default = "default_float_steps")]
    pub float_steps: usize,
    #[serde(default)]
    pub direction: ObjectiveDirection,
    pub search: SearchSpace,
}

/// A fully constructed proposer, one variant per built-in strategy.
#[derive(Debug)]
pub enum StrategyProposer {
    Random(RandomProposer),
    Grid(GridProposer),
}

impl HostFileConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("parsing host configuration")?;
        if config.search.is_empty() {
            bail!("search space has no dimensions");
        }
        config.search.validate()?;
        Ok(config)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default()
            .with_listen(self.listen.clone())
            .with_batch_size(self.batch_size)
            .with_dispatch_timeout(Duration::from_secs(self.dispatch_timeout_secs))
            .with_retry_budget(self.retry_budget);
        config.advertise = self.advertise.clone();
        config.categories = self.categories.clone();
        if let Some(n) = self.max_observations {
            config = config.with_max_observations(n);
        }
        if let Some(secs) = self.max_runtime_secs {
            config = config.with_max_runtime(Duration::from_secs(secs));
        }
        config
    }

    /// Build the proposer this configuration asks for.
    pub fn proposer(&self) -> Result<StrategyProposer> {
        match self.strategy {
            Strategy::Random => {
                let budget = self
                    .max_observations
                    .context("the random strategy needs max_observations as its budget")?;
                Ok(StrategyProposer::Random(
                    RandomProposer::new(self.search.clone(), budget)
                        .with_direction(self.direction),
                ))
            }
            Strategy::Grid => Ok(StrategyProposer::Grid(
                GridProposer::new(self.search.clone(), self.float_steps)
                    .with_direction(self.direction),
            )),
        }
    }
}
