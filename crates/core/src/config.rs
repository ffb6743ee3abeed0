//! Bridge configuration.

use crate::resolve::Precedence;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration surface of the bridge.
///
/// Loaded from TOML; every field has a default so a partial (or absent) file
/// is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Simulation rate in ticks per second.
    pub ticks_per_second: u32,
    /// How long a single listener callback may run before it is treated as
    /// faulted.
    pub listener_timeout_ms: u64,
    /// Faults (errors, panics, timeouts) an extension may accumulate across
    /// ticks before it is automatically unregistered.
    pub fault_threshold: u32,
    /// Which ecosystem wins a same-priority mutation conflict.
    pub precedence: Precedence,
    /// Size of the listener worker pool; `0` sizes it from the host CPU count.
    pub worker_threads: usize,
    /// How long one persistence request may take before the bridge degrades
    /// to in-memory behaviour.
    pub persistence_timeout_ms: u64,
    /// Capacity of the bundled broadcast channels (state deltas, cache
    /// invalidations).
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 20,
            listener_timeout_ms: 50,
            fault_threshold: 3,
            precedence: Precedence::default(),
            worker_threads: 0,
            persistence_timeout_ms: 250,
            channel_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants a usable configuration must satisfy.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.ticks_per_second > 0, "ticks_per_second must be positive");
        anyhow::ensure!(
            self.listener_timeout_ms > 0,
            "listener_timeout_ms must be positive"
        );
        anyhow::ensure!(self.fault_threshold > 0, "fault_threshold must be positive");
        anyhow::ensure!(
            self.persistence_timeout_ms > 0,
            "persistence_timeout_ms must be positive"
        );
        anyhow::ensure!(self.channel_capacity > 0, "channel_capacity must be positive");
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.ticks_per_second))
    }

    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    /// Worker pool size, resolving `0` to the host CPU count.
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(2)
        } else {
            self.worker_threads
        }
    }
}
