use crate::card::{AgentId, HealthStatus};
use crate::task::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A state transition committed by the registry or scheduler.
///
/// Events are emitted in the exact order the transitions committed and
/// carry enough context for a dashboard to render without further lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task moved between lifecycle states.
    TaskTransition {
        /// The task that transitioned.
        task_id: Uuid,
        /// State before the transition.
        from: TaskState,
        /// State after the transition.
        to: TaskState,
        /// Agent assigned at the time of the transition, if any.
        agent_id: Option<AgentId>,
        /// Attempt counter after the transition.
        attempt: u32,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },
    /// An agent's health classification changed.
    HealthTransition {
        /// The agent whose health changed.
        agent_id: AgentId,
        /// Health before.
        from: HealthStatus,
        /// Health after.
        to: HealthStatus,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },
    /// An agent joined the registry.
    AgentRegistered {
        /// Id of the new agent.
        agent_id: AgentId,
        /// Display name from its card.
        name: String,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },
    /// An agent left the registry (deregistration or eviction).
    AgentRemoved {
        /// Id of the removed agent.
        agent_id: AgentId,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },
    /// The subscriber fell behind and `missed` events were dropped.
    Gap {
        /// Number of events lost for this subscriber.
        missed: u64,
    },
}

/// Per-subscriber filter for [`EventBus::subscribe_filtered`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFilter {
    /// Deliver task transitions.
    pub tasks: bool,
    /// Deliver agent registration/health events.
    pub agents: bool,
    /// When set, only deliver transitions for this task.
    pub task_id: Option<Uuid>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            tasks: true,
            agents: true,
            task_id: None,
        }
    }
}

impl EventFilter {
    /// Whether the filter lets `event` through. Gap markers always pass —
    /// a subscriber must learn it lost events even if they were filtered.
    pub fn matches(&self, event: &Event) -> bool {
        match event {
            Event::TaskTransition { task_id, .. } => {
                self.tasks && self.task_id.map_or(true, |want| *task_id == want)
            }
            Event::HealthTransition { .. }
            | Event::AgentRegistered { .. }
            | Event::AgentRemoved { .. } => self.agents,
            Event::Gap { .. } => true,
        }
    }
}

/// Broadcast fan-out of [`Event`]s to external subscribers.
///
/// Publishing never blocks: a slow subscriber loses its oldest backlog and
/// receives a [`Event::Gap`] marker instead of stalling the publisher.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber backlog capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// A bus with no subscribers silently drops the event; publishers must
    /// not care whether anyone is listening.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventStream {
        self.subscribe_filtered(EventFilter::default())
    }

    /// Subscribe with a per-subscriber filter.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A per-subscriber cursor over the event bus.
pub struct EventStream {
    rx: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl EventStream {
    /// Await the next matching event.
    ///
    /// Returns `None` once the bus is dropped. When the subscriber lagged
    /// behind the bus capacity, the dropped span surfaces as a single
    /// [`Event::Gap`] carrying the number of lost events.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Some(Event::Gap { missed });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
