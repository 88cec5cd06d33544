//! Outbound HTTP implementation of [`AgentTransport`](peerlink_core::AgentTransport).
//!
//! Remote agents expose three surfaces this client talks to:
//!
//! - `GET {endpoint}/.well-known/agent.json` — the discovery document
//! - `POST {endpoint}/api/tasks` — task delivery, A2A request envelope
//! - `GET {endpoint}/health` — liveness probe
//!
//! Transport failures map onto `Timeout` and `Unreachable` errors
//! (retryable); an agent answering with an error status for a delivered
//! task maps onto `Rejected` (not retryable).

/// The reqwest-backed transport implementation.
pub mod http;

pub use http::HttpTransport;
