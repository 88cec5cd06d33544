use crate::card::AgentCard;
use crate::task::Task;
use crate::PeerlinkResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Outbound seam to remote agents.
///
/// The scheduler and health monitor depend only on this trait; the HTTP
/// implementation lives in `peerlink-client`. Every method is expected to
/// enforce its own bounded timeout — callers never wait indefinitely.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Fetch and parse the discovery document at the agent's well-known path.
    async fn fetch_card(&self, endpoint: &str) -> PeerlinkResult<AgentCard>;

    /// Deliver a task to an agent and wait for its result payload.
    ///
    /// Fails with `Timeout`/`Unreachable` on transport problems (retryable)
    /// or `Rejected` when the agent refuses the task (not retryable).
    async fn dispatch(&self, endpoint: &str, task: &Task) -> PeerlinkResult<serde_json::Value>;

    /// Liveness probe. `Ok(())` means the agent answered within the deadline.
    async fn probe(&self, endpoint: &str) -> PeerlinkResult<()>;

    /// Best-effort cancel signal for a previously dispatched task.
    ///
    /// Fire-and-forget: failures are logged by the implementation and never
    /// surfaced, since local cancellation has already committed.
    async fn cancel(&self, endpoint: &str, task_id: Uuid);
}
