use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use peerlink_core::{
    card::normalize_endpoint, AgentCard, AgentId, Event, EventBus, HealthStatus, PeerlinkError,
    PeerlinkResult,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A registered agent as tracked by the store.
///
/// Snapshots of this record are handed out to callers; the authoritative
/// copy only changes under the store's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Endpoint-derived stable id.
    pub id: AgentId,
    /// The agent's discovery document.
    pub card: AgentCard,
    /// Normalized endpoint URL.
    pub endpoint: String,
    /// Current liveness classification.
    pub health: HealthStatus,
    /// Probe failures since the last success.
    pub consecutive_failures: u32,
    /// Tasks currently dispatched to this agent.
    pub in_flight: u32,
    /// When the agent was last probed.
    pub last_probe: Option<DateTime<Utc>>,
    /// When the agent last completed a probe or dispatch successfully.
    pub last_success: Option<DateTime<Utc>>,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// Aggregate registry statistics for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Total registered agents.
    pub total_agents: usize,
    /// Agents currently classified healthy.
    pub healthy_agents: usize,
    /// Agents currently classified unreachable.
    pub unreachable_agents: usize,
    /// Declared capability name -> number of agents declaring it.
    pub capabilities: HashMap<String, usize>,
}

/// Thread-safe store of registered agents.
///
/// Every mutation is a single read-modify-write under the lock, so readers
/// never observe a partially updated record, and the lock is never held
/// across an await point. Health transitions are published to the event bus
/// in commit order.
pub struct AgentStore {
    agents: RwLock<HashMap<AgentId, AgentRecord>>,
    bus: Arc<EventBus>,
    max_tasks_per_agent: u32,
}

impl AgentStore {
    /// Create an empty store publishing to `bus`.
    pub fn new(bus: Arc<EventBus>, max_tasks_per_agent: u32) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            bus,
            max_tasks_per_agent,
        }
    }

    /// Register an agent from its validated card.
    ///
    /// The id is derived from the normalized endpoint, so re-registering the
    /// same endpoint fails with `DuplicateEndpoint` unless `refresh` is set,
    /// in which case the stored card is replaced and health state is kept.
    pub fn register(&self, card: AgentCard, refresh: bool) -> PeerlinkResult<AgentId> {
        card.validate()?;
        let endpoint = normalize_endpoint(&card.url);
        let id = AgentId::from_endpoint(&endpoint);

        let mut agents = self.agents.write();
        if let Some(existing) = agents.get_mut(&id) {
            if !refresh {
                return Err(PeerlinkError::DuplicateEndpoint(endpoint));
            }
            debug!(agent_id = %id, "Refreshing agent card");
            existing.card = card;
            return Ok(id);
        }

        let name = card.name.clone();
        agents.insert(
            id.clone(),
            AgentRecord {
                id: id.clone(),
                card,
                endpoint: endpoint.clone(),
                health: HealthStatus::Unknown,
                consecutive_failures: 0,
                in_flight: 0,
                last_probe: None,
                last_success: None,
                registered_at: Utc::now(),
            },
        );
        self.bus.publish(Event::AgentRegistered {
            agent_id: id.clone(),
            name: name.clone(),
            timestamp: Utc::now(),
        });
        drop(agents);

        info!(agent_id = %id, name = %name, endpoint = %endpoint, "Agent registered");
        Ok(id)
    }

    /// Remove an agent. Returns the removed record.
    pub fn deregister(&self, id: &AgentId) -> PeerlinkResult<AgentRecord> {
        let mut agents = self.agents.write();
        let record = agents
            .remove(id)
            .ok_or_else(|| PeerlinkError::AgentNotFound(id.clone()))?;
        self.bus.publish(Event::AgentRemoved {
            agent_id: id.clone(),
            timestamp: Utc::now(),
        });
        drop(agents);

        info!(agent_id = %id, name = %record.card.name, "Agent deregistered");
        Ok(record)
    }

    /// Snapshot a single agent.
    pub fn get(&self, id: &AgentId) -> Option<AgentRecord> {
        self.agents.read().get(id).cloned()
    }

    /// Snapshot all agents, registration order.
    pub fn list(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.agents.read().values().cloned().collect();
        records.sort_by_key(|r| r.registered_at);
        records
    }

    /// Agents declaring every capability in `required`, best candidate first.
    ///
    /// Ordering biases routing toward healthy, lightly loaded, recently
    /// successful agents; ties break on id for determinism.
    pub fn list_by_capability(&self, required: &[String]) -> Vec<AgentRecord> {
        let mut candidates: Vec<AgentRecord> = self
            .agents
            .read()
            .values()
            .filter(|r| r.card.declares_all(required))
            .cloned()
            .collect();
        candidates.sort_by(candidate_order);
        candidates
    }

    /// Set an agent's health, publishing a transition event on change.
    /// Returns the previous status.
    pub fn update_health(&self, id: &AgentId, status: HealthStatus) -> Option<HealthStatus> {
        let mut agents = self.agents.write();
        let record = agents.get_mut(id)?;
        let old = record.health;
        if old != status {
            record.health = status;
            self.bus.publish(Event::HealthTransition {
                agent_id: id.clone(),
                from: old,
                to: status,
                timestamp: Utc::now(),
            });
        }
        Some(old)
    }

    /// Record a successful probe: health becomes healthy and the
    /// consecutive-failure counter resets.
    pub fn record_probe_success(&self, id: &AgentId) {
        let mut agents = self.agents.write();
        if let Some(record) = agents.get_mut(id) {
            let now = Utc::now();
            record.last_probe = Some(now);
            record.last_success = Some(now);
            record.consecutive_failures = 0;
            let old = record.health;
            if old != HealthStatus::Healthy {
                record.health = HealthStatus::Healthy;
                self.bus.publish(Event::HealthTransition {
                    agent_id: id.clone(),
                    from: old,
                    to: HealthStatus::Healthy,
                    timestamp: now,
                });
            }
        }
    }

    /// Record a failed probe and return the new consecutive-failure count.
    ///
    /// Threshold policy (unreachable / eviction) belongs to the monitor,
    /// not the store.
    pub fn record_probe_failure(&self, id: &AgentId) -> Option<u32> {
        let mut agents = self.agents.write();
        let record = agents.get_mut(id)?;
        record.last_probe = Some(Utc::now());
        record.consecutive_failures += 1;
        Some(record.consecutive_failures)
    }

    /// Degrade an agent after a dispatch failure.
    ///
    /// This and probe results are the only legitimate sources of health
    /// decay. An agent already unreachable stays unreachable.
    pub fn record_dispatch_failure(&self, id: &AgentId) {
        let mut agents = self.agents.write();
        if let Some(record) = agents.get_mut(id) {
            let old = record.health;
            if old != HealthStatus::Unreachable && old != HealthStatus::Degraded {
                record.health = HealthStatus::Degraded;
                self.bus.publish(Event::HealthTransition {
                    agent_id: id.clone(),
                    from: old,
                    to: HealthStatus::Degraded,
                    timestamp: Utc::now(),
                });
            }
        }
        warn!(agent_id = %id, "Dispatch failure recorded against agent");
    }

    /// Record a successful dispatch for routing recency.
    pub fn record_dispatch_success(&self, id: &AgentId) {
        let mut agents = self.agents.write();
        if let Some(record) = agents.get_mut(id) {
            record.last_success = Some(Utc::now());
        }
    }

    /// Reserve dispatch capacity on an agent.
    ///
    /// Returns false when the agent is missing or already at its in-flight
    /// cap; the router filters at-capacity agents, but the reservation
    /// re-checks under the lock to close the race.
    pub fn try_reserve(&self, id: &AgentId) -> bool {
        let mut agents = self.agents.write();
        match agents.get_mut(id) {
            Some(record) if record.in_flight < self.max_tasks_per_agent => {
                record.in_flight += 1;
                true
            }
            _ => false,
        }
    }

    /// Release previously reserved capacity. Saturates at zero so a
    /// duplicate release can never underflow the counter.
    pub fn release(&self, id: &AgentId) {
        let mut agents = self.agents.write();
        if let Some(record) = agents.get_mut(id) {
            record.in_flight = record.in_flight.saturating_sub(1);
        }
    }

    /// The configured per-agent in-flight cap.
    pub fn max_tasks_per_agent(&self) -> u32 {
        self.max_tasks_per_agent
    }

    /// Aggregate statistics for dashboards.
    pub fn stats(&self) -> RegistryStats {
        let agents = self.agents.read();
        let mut capabilities: HashMap<String, usize> = HashMap::new();
        for record in agents.values() {
            for cap in &record.card.capabilities {
                *capabilities.entry(cap.name.to_lowercase()).or_insert(0) += 1;
            }
        }
        RegistryStats {
            total_agents: agents.len(),
            healthy_agents: agents
                .values()
                .filter(|r| r.health == HealthStatus::Healthy)
                .count(),
            unreachable_agents: agents
                .values()
                .filter(|r| r.health == HealthStatus::Unreachable)
                .count(),
            capabilities,
        }
    }
}

/// Routing order over candidate agents: health rank, then current load
/// ascending, then last success descending, then id.
///
/// Kept as a free function so the comparator is testable without a store.
pub fn candidate_order(a: &AgentRecord, b: &AgentRecord) -> std::cmp::Ordering {
    (a.health.rank(), a.in_flight, Reverse(a.last_success), &a.id).cmp(&(
        b.health.rank(),
        b.in_flight,
        Reverse(b.last_success),
        &b.id,
    ))
}
