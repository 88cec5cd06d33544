use peerlink_core::{AgentId, HealthStatus, PeerlinkError, PeerlinkResult};
use peerlink_registry::{AgentRecord, AgentStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Capability-based agent selection.
///
/// The router only reads the store; every call works over a fresh snapshot
/// so concurrent health and load changes influence the next selection, not
/// the current one.
pub struct Router {
    store: Arc<AgentStore>,
}

impl Router {
    /// Create a router over the given store.
    pub fn new(store: Arc<AgentStore>) -> Self {
        Self { store }
    }

    /// Pick the best candidate declaring every tag in `required`.
    ///
    /// Candidates in `excluding` (agents that already failed this task),
    /// unreachable agents, and agents at their in-flight cap are skipped.
    /// The two failure modes are distinct on purpose: `NoCapableAgent`
    /// means no registered agent ever matched the tags (fail the task now),
    /// while `AllCandidatesExcluded` means capacity existed but none was
    /// usable this attempt (the task may wait for capacity to return).
    pub fn select(
        &self,
        required: &[String],
        excluding: &HashSet<AgentId>,
    ) -> PeerlinkResult<AgentRecord> {
        let candidates = self.store.list_by_capability(required);
        if candidates.is_empty() {
            return Err(PeerlinkError::NoCapableAgent(required.to_vec()));
        }

        let cap = self.store.max_tasks_per_agent();
        let selected = candidates.into_iter().find(|r| {
            r.health != HealthStatus::Unreachable
                && r.in_flight < cap
                && !excluding.contains(&r.id)
        });

        match selected {
            Some(record) => {
                debug!(agent_id = %record.id, name = %record.card.name, "Router selected agent");
                Ok(record)
            }
            None => Err(PeerlinkError::AllCandidatesExcluded),
        }
    }
}
