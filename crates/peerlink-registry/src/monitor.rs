use crate::store::AgentStore;
use peerlink_core::{AgentId, AgentTransport, CoreConfig, HealthStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic liveness prober for all registered agents.
///
/// Each round probes every agent concurrently with a per-probe deadline, so
/// one slow endpoint never delays the rest. Crossing the unreachable
/// threshold (and eviction) is reported to the scheduler over a failover
/// channel; the monitor never calls the scheduler directly.
pub struct HealthMonitor {
    store: Arc<AgentStore>,
    transport: Arc<dyn AgentTransport>,
    config: CoreConfig,
    failover_tx: mpsc::UnboundedSender<AgentId>,
}

impl HealthMonitor {
    /// Create a monitor. The returned receiver yields the id of every agent
    /// that became unreachable or was evicted; the scheduler drains it to
    /// fail over in-flight tasks.
    pub fn new(
        store: Arc<AgentStore>,
        transport: Arc<dyn AgentTransport>,
        config: CoreConfig,
    ) -> (Self, mpsc::UnboundedReceiver<AgentId>) {
        let (failover_tx, failover_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                transport,
                config,
                failover_tx,
            },
            failover_rx,
        )
    }

    /// Spawn the probe loop. Abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.probe_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.probe_round().await;
            }
        })
    }

    /// Run one probe round over the current agent set.
    pub async fn probe_round(&self) {
        let agents: Vec<(AgentId, String)> = self
            .store
            .list()
            .into_iter()
            .map(|r| (r.id, r.endpoint))
            .collect();
        if agents.is_empty() {
            return;
        }
        debug!(count = agents.len(), "Probing agents");

        let probes = agents.into_iter().map(|(id, endpoint)| {
            let transport = Arc::clone(&self.transport);
            let deadline = self.config.probe_timeout();
            async move {
                let result = tokio::time::timeout(deadline, transport.probe(&endpoint)).await;
                (id, matches!(result, Ok(Ok(()))))
            }
        });
        let results = futures_util::future::join_all(probes).await;

        for (id, alive) in results {
            if alive {
                self.store.record_probe_success(&id);
            } else {
                self.handle_probe_failure(&id);
            }
        }
    }

    fn handle_probe_failure(&self, id: &AgentId) {
        // Agent may have been deregistered between snapshot and now.
        let Some(failures) = self.store.record_probe_failure(id) else {
            return;
        };

        if failures >= self.config.evict_threshold {
            warn!(agent_id = %id, failures, "Evicting agent after repeated probe failures");
            if self.store.deregister(id).is_ok() {
                let _ = self.failover_tx.send(id.clone());
            }
        } else if failures >= self.config.unreachable_threshold {
            let old = self.store.update_health(id, HealthStatus::Unreachable);
            // Signal failover only on the transition, not on every
            // subsequent failed probe.
            if old.is_some() && old != Some(HealthStatus::Unreachable) {
                info!(agent_id = %id, failures, "Agent marked unreachable");
                let _ = self.failover_tx.send(id.clone());
            }
        } else {
            debug!(agent_id = %id, failures, "Probe failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use peerlink_core::{AgentCard, Capability, EventBus, PeerlinkError, PeerlinkResult, Task};
    use std::collections::HashSet;
    use uuid::Uuid;

    /// Transport whose probes fail for a configurable endpoint set.
    struct ScriptedTransport {
        down: Mutex<HashSet<String>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                down: Mutex::new(HashSet::new()),
            }
        }

        fn set_down(&self, endpoint: &str, down: bool) {
            let mut set = self.down.lock();
            if down {
                set.insert(endpoint.to_string());
            } else {
                set.remove(endpoint);
            }
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn fetch_card(&self, endpoint: &str) -> PeerlinkResult<AgentCard> {
            Ok(AgentCard::new("scripted", endpoint))
        }

        async fn dispatch(&self, _endpoint: &str, _task: &Task) -> PeerlinkResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }

        async fn probe(&self, endpoint: &str) -> PeerlinkResult<()> {
            if self.down.lock().contains(endpoint) {
                Err(PeerlinkError::Unreachable(endpoint.to_string()))
            } else {
                Ok(())
            }
        }

        async fn cancel(&self, _endpoint: &str, _task_id: Uuid) {}
    }

    fn test_config() -> CoreConfig {
        CoreConfig {
            unreachable_threshold: 2,
            evict_threshold: 4,
            probe_timeout_secs: 1,
            ..CoreConfig::default()
        }
    }

    fn setup() -> (Arc<AgentStore>, Arc<ScriptedTransport>, HealthMonitor, mpsc::UnboundedReceiver<AgentId>) {
        let bus = Arc::new(EventBus::new(64));
        let store = Arc::new(AgentStore::new(bus, 10));
        let transport = Arc::new(ScriptedTransport::new());
        let (monitor, failover_rx) = HealthMonitor::new(
            Arc::clone(&store),
            transport.clone() as Arc<dyn AgentTransport>,
            test_config(),
        );
        (store, transport, monitor, failover_rx)
    }

    fn register(store: &AgentStore, url: &str) -> AgentId {
        let card = AgentCard::new("worker", url).with_capability(Capability::new("summarize", ""));
        store.register(card, false).unwrap()
    }

    #[tokio::test]
    async fn successful_probe_marks_healthy() {
        let (store, _transport, monitor, _rx) = setup();
        let id = register(&store, "http://a:1");

        monitor.probe_round().await;

        let record = store.get(&id).unwrap();
        assert_eq!(record.health, HealthStatus::Healthy);
        assert!(record.last_probe.is_some());
        assert_eq!(record.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn threshold_failures_mark_unreachable_and_signal_failover() {
        let (store, transport, monitor, mut failover_rx) = setup();
        let id = register(&store, "http://a:1");
        transport.set_down("http://a:1", true);

        monitor.probe_round().await;
        assert_ne!(store.get(&id).unwrap().health, HealthStatus::Unreachable);

        monitor.probe_round().await;
        assert_eq!(store.get(&id).unwrap().health, HealthStatus::Unreachable);
        assert_eq!(failover_rx.recv().await, Some(id.clone()));

        // A third failed round does not re-signal.
        monitor.probe_round().await;
        assert!(failover_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn recovery_resets_the_failure_counter() {
        let (store, transport, monitor, _rx) = setup();
        let id = register(&store, "http://a:1");
        transport.set_down("http://a:1", true);

        monitor.probe_round().await;
        transport.set_down("http://a:1", false);
        monitor.probe_round().await;

        let record = store.get(&id).unwrap();
        assert_eq!(record.health, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn evicted_after_sustained_failures() {
        let (store, transport, monitor, mut failover_rx) = setup();
        let id = register(&store, "http://a:1");
        transport.set_down("http://a:1", true);

        for _ in 0..4 {
            monitor.probe_round().await;
        }

        assert!(store.get(&id).is_none());
        // One signal for the unreachable transition, one for eviction.
        assert_eq!(failover_rx.recv().await, Some(id.clone()));
        assert_eq!(failover_rx.recv().await, Some(id));
    }

    #[tokio::test]
    async fn one_dead_agent_does_not_block_probing_others() {
        let (store, transport, monitor, _rx) = setup();
        let dead = register(&store, "http://dead:1");
        let alive = register(&store, "http://alive:1");
        transport.set_down("http://dead:1", true);

        monitor.probe_round().await;

        assert_eq!(store.get(&alive).unwrap().health, HealthStatus::Healthy);
        assert_eq!(store.get(&dead).unwrap().consecutive_failures, 1);
    }
}
