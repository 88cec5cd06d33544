//! Core types and error definitions for the Peerlink agent platform.
//!
//! This crate provides the foundational types shared across all Peerlink
//! crates: the agent card model, the task lifecycle state machine data,
//! the event bus, and the outbound transport seam.
//!
//! # Main types
//!
//! - [`PeerlinkError`] — Unified error enum for all Peerlink subsystems.
//! - [`PeerlinkResult`] — Convenience alias for `Result<T, PeerlinkError>`.
//! - [`AgentCard`] — Parsed discovery document advertised by an agent.
//! - [`Task`] — A unit of work routed to a capable agent.
//! - [`TaskState`] — The task lifecycle state machine.
//! - [`EventBus`] — Broadcast fan-out of state transitions to subscribers.
//! - [`AgentTransport`] — The seam to the outbound HTTP layer.

/// Agent cards, capabilities, and health status.
pub mod card;
/// Runtime configuration knobs.
pub mod config;
/// State-transition events and the broadcast event bus.
pub mod event;
/// Tasks, message payloads, and the lifecycle state machine.
pub mod task;
/// The outbound transport trait implemented by the HTTP client.
pub mod transport;

use uuid::Uuid;

pub use card::{AgentCard, AgentId, Capability, HealthStatus, Provider};
pub use config::CoreConfig;
pub use event::{Event, EventBus, EventFilter, EventStream};
pub use task::{Message, Part, Role, Task, TaskRequest, TaskState};
pub use transport::AgentTransport;

// --- Error types ---

/// Top-level error type for the Peerlink platform.
///
/// Variants map one-to-one onto the failure conditions of the registry,
/// router, scheduler, and transport layers.
#[derive(Debug, thiserror::Error)]
pub enum PeerlinkError {
    /// An agent with the same normalized endpoint is already registered.
    #[error("agent endpoint already registered: {0}")]
    DuplicateEndpoint(String),

    /// The discovery document failed validation.
    #[error("invalid agent descriptor: {0}")]
    InvalidDescriptor(String),

    /// No agent with the given id exists in the store.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// No task with the given id exists in the ledger.
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// No registered agent declares the required capability set.
    #[error("no capable agent for capabilities: {0:?}")]
    NoCapableAgent(Vec<String>),

    /// Capable agents exist but all were excluded for this attempt
    /// (previously failed, unreachable, or at capacity).
    #[error("all capable agents excluded for this attempt")]
    AllCandidatesExcluded,

    /// The task ledger reached its configured capacity.
    #[error("task ledger full (capacity {0})")]
    QueueFull(usize),

    /// An outbound call exceeded its deadline.
    #[error("timeout talking to {0}")]
    Timeout(String),

    /// The agent endpoint could not be reached.
    #[error("agent unreachable: {0}")]
    Unreachable(String),

    /// The agent reported a non-retryable error for a dispatched task.
    #[error("agent rejected task: {0}")]
    Rejected(String),

    /// The task already reached a terminal state; no further transitions.
    #[error("task {0} is already terminal")]
    AlreadyTerminal(Uuid),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeerlinkError {
    /// Whether the scheduler should retry a dispatch that failed with
    /// this error on another agent.
    ///
    /// Transport-level failures (`Timeout`, `Unreachable`) are transient;
    /// everything else either cannot succeed on retry (`Rejected`,
    /// `InvalidDescriptor`) or is not a dispatch failure at all.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unreachable(_))
    }
}

/// A convenience `Result` alias using [`PeerlinkError`].
pub type PeerlinkResult<T> = Result<T, PeerlinkError>;
