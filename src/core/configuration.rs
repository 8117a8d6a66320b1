use std::num::NonZeroUsize;

use serde::Deserialize;

/// Simulation options parsed from the configuration file. Every option has a
/// default so that a minimal configuration can be empty.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigOptions {
    /// Number of worker threads that run simulated hosts.
    pub workers: NonZeroUsize,

    /// Upper bound on how many workers run at the same time. The effective
    /// parallelism is `min(parallelism, workers)`.
    pub parallelism: NonZeroUsize,

    /// Whether to count object allocations and deallocations. Disabling
    /// counting can improve performance for simulations that create many
    /// objects.
    pub use_object_counters: bool,

    /// How long the network bootstrap phase lasts, in seconds. During
    /// bootstrapping, packets are never dropped due to path unreliability.
    pub bootstrap_end_time: u64,

    /// The simulated time at which the simulation ends, in seconds.
    pub stop_time: u64,

    /// Seed for the simulation's random sources.
    pub seed: u64,

    /// Use a dynamic runahead that tracks the lowest latency actually used,
    /// instead of the lowest possible latency.
    pub use_dynamic_runahead: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(1).unwrap(),
            parallelism: NonZeroUsize::new(1).unwrap(),
            use_object_counters: true,
            bootstrap_end_time: 0,
            stop_time: 10,
            seed: 1,
            use_dynamic_runahead: false,
        }
    }
}

impl ConfigOptions {
    /// Parse options from a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The number of logical processors to use, bounded by the worker count.
    pub fn num_processors(&self) -> usize {
        std::cmp::min(self.parallelism.get(), self.workers.get())
    }
}
