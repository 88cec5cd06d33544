//! Agent registry and health monitoring for the Peerlink platform.
//!
//! # Main types
//!
//! - [`AgentStore`] — Thread-safe store of registered agents, their declared
//!   capabilities, health, and in-flight load.
//! - [`HealthMonitor`] — Periodic liveness prober that degrades, evicts, and
//!   triggers failover for unresponsive agents.

/// Periodic liveness probing.
pub mod monitor;
/// The agent record store.
pub mod store;

pub use monitor::HealthMonitor;
pub use store::{AgentRecord, AgentStore, RegistryStats};
