//! Coordinator configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::registry::RegistryConfig;

/// Tunables for one optimization run.  Defaults are conservative; the node
/// binary overrides them from its config file.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address the dispatch server binds to.
    pub listen: String,
    /// Address substituted into launch templates so remote workers can
    /// connect back.  Defaults to the actual bound address, which only
    /// works for workers on the same network namespace.
    pub advertise: Option<String>,
    /// Machine category → launch command template.
    pub categories: HashMap<String, String>,
    /// How many candidates to request from the proposer per ask.
    pub batch_size: usize,
    /// Per-dispatch deadline for the observation.
    pub dispatch_timeout: Duration,
    /// Re-dispatch attempts per candidate after the first failure.
    pub retry_budget: u32,
    /// Hard cap on resolved candidates (successes and permanent failures).
    pub max_observations: Option<usize>,
    /// Wall-clock budget for the whole run.
    pub max_runtime: Option<Duration>,
    /// How long to wait for in-flight dispatches once stopping.
    pub drain_timeout: Duration,
    /// How long a worker may sit in LAUNCHING before it is presumed dead.
    pub launch_timeout: Duration,
    /// Cadence of the launch/relaunch maintenance pass.
    pub maintenance_interval: Duration,
    /// Worker failure and relaunch policy.
    pub registry: RegistryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:0".to_string(),
            advertise: None,
            categories: HashMap::new(),
            batch_size: 2,
            dispatch_timeout: Duration::from_secs(600),
            retry_budget: 2,
            max_observations: None,
            max_runtime: None,
            drain_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(60),
            maintenance_interval: Duration::from_millis(500),
            registry: RegistryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    pub fn with_category(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.categories.insert(name.into(), template.into());
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_retry_budget(mut self, retries: u32) -> Self {
        self.retry_budget = retries;
        self
    }

    pub fn with_max_observations(mut self, n: usize) -> Self {
        self.max_observations = Some(n);
        self
    }

    pub fn with_max_runtime(mut self, budget: Duration) -> Self {
        self.max_runtime = Some(budget);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let config = CoordinatorConfig::default()
            .with_listen("0.0.0.0:7070")
            .with_category("gpu-box", "ssh {worker} sweepnet --mode client --connect {host}")
            .with_batch_size(0) // clamped to 1
            .with_dispatch_timeout(Duration::from_secs(5))
            .with_retry_budget(1)
            .with_max_observations(50);

        assert_eq!(config.listen, "0.0.0.0:7070");
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.retry_budget, 1);
        assert_eq!(config.max_observations, Some(50));
        assert!(config.categories.contains_key("gpu-box"));
    }
}
