use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable knobs for the registry, health monitor, and scheduler.
///
/// Every field has a serde default so a partial TOML section (or none at
/// all) yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Seconds between health-probe rounds.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Per-probe deadline in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Consecutive failed probes before an agent is marked unreachable.
    #[serde(default = "default_unreachable_threshold")]
    pub unreachable_threshold: u32,
    /// Consecutive failed probes before an agent is removed outright.
    #[serde(default = "default_evict_threshold")]
    pub evict_threshold: u32,
    /// Per-dispatch deadline in seconds.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
    /// Dispatch attempts per task before it fails permanently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Size of the concurrent dispatch pool.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// In-flight task cap per agent; at-capacity agents are skipped by the router.
    #[serde(default = "default_max_per_agent")]
    pub max_tasks_per_agent: u32,
    /// Ledger size limit; submissions beyond it fail with `QueueFull`.
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
    /// Seconds a terminal task is retained before eviction.
    #[serde(default = "default_terminal_ttl")]
    pub terminal_ttl_secs: u64,
}

fn default_probe_interval() -> u64 {
    60
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_unreachable_threshold() -> u32 {
    3
}
fn default_evict_threshold() -> u32 {
    9
}
fn default_dispatch_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_concurrent() -> usize {
    100
}
fn default_max_per_agent() -> u32 {
    10
}
fn default_ledger_capacity() -> usize {
    1000
}
fn default_terminal_ttl() -> u64 {
    300
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            unreachable_threshold: default_unreachable_threshold(),
            evict_threshold: default_evict_threshold(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            max_retries: default_max_retries(),
            max_concurrent_tasks: default_max_concurrent(),
            max_tasks_per_agent: default_max_per_agent(),
            ledger_capacity: default_ledger_capacity(),
            terminal_ttl_secs: default_terminal_ttl(),
        }
    }
}

impl CoreConfig {
    /// Interval between probe rounds.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Per-probe deadline.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Per-dispatch deadline.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Retention window for terminal tasks.
    pub fn terminal_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_ttl_secs)
    }
}
