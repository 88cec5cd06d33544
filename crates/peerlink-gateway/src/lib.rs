//! HTTP and WebSocket surface of the platform.
//!
//! The gateway is a thin layer: request parsing, error-to-status mapping,
//! and the live event feed. All semantics live in the registry and
//! scheduler crates it fronts.

/// Error-to-response mapping for the API.
pub mod error;
/// Route table, handlers, and the WebSocket event feed.
pub mod server;

pub use error::ApiError;
pub use server::{build_router, AppState};
