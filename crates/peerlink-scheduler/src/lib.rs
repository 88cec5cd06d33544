//! Task scheduling engine: lifecycle ledger, capability routing, and the
//! dispatch supervisor with retries, failover, and cancellation.
//!
//! Entry point is [`Scheduler`]; it owns a [`TaskLedger`] for state and a
//! [`Router`] for candidate selection over the shared agent store.

pub mod ledger;
pub mod router;
pub mod scheduler;

pub use ledger::{LedgerStats, RetryDecision, TaskLedger};
pub use router::Router;
pub use scheduler::{Scheduler, SchedulerStats};
