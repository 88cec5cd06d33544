use crate::ledger::{LedgerStats, RetryDecision, TaskLedger};
use crate::router::Router;
use parking_lot::Mutex;
use peerlink_core::{
    AgentId, AgentTransport, CoreConfig, PeerlinkError, PeerlinkResult, Task, TaskRequest,
    TaskState,
};
use peerlink_registry::{AgentRecord, AgentStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Delay before a task with no usable candidate is offered for routing
/// again; gives agents time to register or recover.
const REQUEUE_DELAY: Duration = Duration::from_millis(500);

/// Combined scheduler/registry statistics for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Task counts by state.
    pub tasks: LedgerStats,
    /// Dispatch-pool permits currently available.
    pub available_permits: usize,
}

/// Accepts task submissions, routes them to capable agents, and supervises
/// execution with timeouts, retries, failover, and cancellation.
///
/// The scheduler is the only writer of task lifecycle state. Network calls
/// happen outside every lock; when they resolve, the result is applied
/// through the ledger's guarded transitions, so late or duplicate signals
/// against an already-terminal task are no-ops.
pub struct Scheduler {
    store: Arc<AgentStore>,
    ledger: Arc<TaskLedger>,
    router: Router,
    transport: Arc<dyn AgentTransport>,
    config: CoreConfig,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    pool: Arc<Semaphore>,
}

impl Scheduler {
    /// Create a scheduler. Call [`Scheduler::start`] to spawn its loops.
    pub fn new(
        store: Arc<AgentStore>,
        ledger: Arc<TaskLedger>,
        transport: Arc<dyn AgentTransport>,
        config: CoreConfig,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Arc::new(Self {
            router: Router::new(Arc::clone(&store)),
            store,
            ledger,
            transport,
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            pool,
        })
    }

    /// Spawn the dispatch loop, the failover listener, and the terminal
    /// task eviction loop. `failover_rx` is the health monitor's channel of
    /// agents that became unreachable or were evicted.
    pub fn start(
        self: &Arc<Self>,
        failover_rx: mpsc::UnboundedReceiver<AgentId>,
    ) -> Vec<JoinHandle<()>> {
        let dispatch = {
            let this = Arc::clone(self);
            let rx = this
                .queue_rx
                .lock()
                .take()
                .unwrap_or_else(|| mpsc::unbounded_channel().1);
            tokio::spawn(this.dispatch_loop(rx))
        };
        let failover = {
            let this = Arc::clone(self);
            tokio::spawn(this.failover_loop(failover_rx))
        };
        let eviction = {
            let this = Arc::clone(self);
            tokio::spawn(this.eviction_loop())
        };
        vec![dispatch, failover, eviction]
    }

    /// Submit a task for execution. The task enters the ledger as
    /// `Pending` and is queued for dispatch in arrival order.
    pub fn submit(&self, request: TaskRequest) -> PeerlinkResult<Uuid> {
        let mut task = Task::new(request.message, request.required_capabilities);
        task.context_id = request.context_id;
        task.metadata = request.metadata;

        let id = self.ledger.insert(task)?;
        // The receiver lives as long as the scheduler, so this only fails
        // during shutdown; the task then stays pending in the ledger.
        let _ = self.queue_tx.send(id);
        info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Cancel a task. The local terminal transition commits immediately;
    /// if an agent was assigned, a fire-and-forget cancel signal is sent
    /// without waiting for acknowledgement.
    pub fn cancel(&self, id: Uuid) -> PeerlinkResult<()> {
        let snapshot = self.ledger.cancel(id)?;
        info!(task_id = %id, "Task cancelled");

        if let Some(agent_id) = snapshot.assigned_agent {
            if let Some(record) = self.store.get(&agent_id) {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    transport.cancel(&record.endpoint, id).await;
                });
            }
        }
        Ok(())
    }

    /// Snapshot a task.
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.ledger.get(id)
    }

    /// Snapshot tasks, optionally filtered by state.
    pub fn list(&self, state: Option<TaskState>) -> Vec<Task> {
        self.ledger.list(state)
    }

    /// Current scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks: self.ledger.stats(),
            available_permits: self.pool.available_permits(),
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Uuid>) {
        while let Some(task_id) = rx.recv().await {
            // Backpressure: wait for a pool permit before taking the task
            // off the queue; excess submissions stay pending in FIFO order.
            let permit = match Arc::clone(&self.pool).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_attempt(task_id).await;
                drop(permit);
            });
        }
        debug!("Dispatch loop stopped");
    }

    /// Execute one dispatch attempt for a task: route, reserve, deliver,
    /// and apply the outcome through the ledger's guarded transitions.
    async fn run_attempt(self: &Arc<Self>, task_id: Uuid) {
        let Some(task) = self.ledger.get(task_id) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }

        let excluding: HashSet<AgentId> = task.excluded_agents.iter().cloned().collect();
        match self.router.select(&task.required_capabilities, &excluding) {
            Ok(agent) => self.dispatch_to(task_id, agent).await,
            Err(err @ PeerlinkError::NoCapableAgent(_)) => {
                warn!(task_id = %task_id, error = %err, "Routing failed permanently");
                self.ledger.fail(task_id, task.attempts, err.to_string());
            }
            Err(PeerlinkError::AllCandidatesExcluded) => {
                if task.attempts < self.config.max_retries {
                    debug!(task_id = %task_id, "No usable candidate; re-queueing as pending");
                    if self.ledger.requeue(task_id, task.attempts) {
                        self.requeue_later(task_id);
                    }
                } else {
                    self.ledger.fail(
                        task_id,
                        task.attempts,
                        PeerlinkError::AllCandidatesExcluded.to_string(),
                    );
                }
            }
            Err(err) => {
                error!(task_id = %task_id, error = %err, "Unexpected routing error");
                self.ledger.fail(task_id, task.attempts, err.to_string());
            }
        }
    }

    async fn dispatch_to(self: &Arc<Self>, task_id: Uuid, agent: AgentRecord) {
        // Routing saw free capacity, but reservation re-checks under the
        // store lock; losing the race just means another attempt later.
        if !self.store.try_reserve(&agent.id) {
            debug!(task_id = %task_id, agent_id = %agent.id, "Reservation lost, re-queueing");
            let _ = self.queue_tx.send(task_id);
            return;
        }

        // A cancel may have landed while the task sat in the queue.
        let Some(attempt) = self.ledger.assign(task_id, &agent.id) else {
            self.store.release(&agent.id);
            return;
        };
        // The HTTP transport has no separate ack phase, so the running
        // transition is synthetic and immediate.
        self.ledger.mark_running(task_id);

        let Some(snapshot) = self.ledger.get(task_id) else {
            self.store.release(&agent.id);
            return;
        };

        info!(
            task_id = %task_id,
            agent_id = %agent.id,
            agent = %agent.card.name,
            attempt,
            "Dispatching task"
        );

        let outcome = tokio::time::timeout(
            self.config.dispatch_timeout(),
            self.transport.dispatch(&agent.endpoint, &snapshot),
        )
        .await;

        // Reserved capacity is released exactly once, here, whatever the
        // outcome of the attempt.
        self.store.release(&agent.id);

        match outcome {
            Ok(Ok(result)) => {
                self.store.record_dispatch_success(&agent.id);
                if self.ledger.complete(task_id, attempt, result) {
                    info!(task_id = %task_id, agent_id = %agent.id, "Task completed");
                } else {
                    debug!(task_id = %task_id, "Late completion ignored");
                }
            }
            Ok(Err(err)) if err.is_retryable() => {
                self.handle_retryable(task_id, &agent, attempt, err.to_string());
            }
            Ok(Err(err)) => {
                warn!(task_id = %task_id, agent_id = %agent.id, error = %err, "Task rejected by agent");
                if !self.ledger.fail(task_id, attempt, err.to_string()) {
                    debug!(task_id = %task_id, "Late rejection ignored");
                }
            }
            Err(_elapsed) => {
                let err = PeerlinkError::Timeout(agent.endpoint.clone());
                self.handle_retryable(task_id, &agent, attempt, err.to_string());
            }
        }
    }

    fn handle_retryable(
        self: &Arc<Self>,
        task_id: Uuid,
        agent: &AgentRecord,
        attempt: u32,
        err: String,
    ) {
        self.store.record_dispatch_failure(&agent.id);
        match self
            .ledger
            .mark_retry(task_id, &agent.id, attempt, self.config.max_retries)
        {
            RetryDecision::Requeued(attempt) => {
                warn!(
                    task_id = %task_id,
                    agent_id = %agent.id,
                    attempt,
                    error = %err,
                    "Retryable dispatch failure, re-selecting"
                );
                let _ = self.queue_tx.send(task_id);
            }
            RetryDecision::Exhausted => {
                warn!(task_id = %task_id, error = %err, "Retry budget exhausted");
                self.ledger.fail(task_id, attempt, err);
            }
            RetryDecision::Stale => {
                debug!(task_id = %task_id, "Dispatch failure from superseded attempt ignored");
            }
        }
    }

    /// Re-offer a task for routing after a short delay.
    fn requeue_later(self: &Arc<Self>, task_id: Uuid) {
        let tx = self.queue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REQUEUE_DELAY).await;
            let _ = tx.send(task_id);
        });
    }

    async fn failover_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<AgentId>) {
        while let Some(agent_id) = rx.recv().await {
            let orphaned = self.ledger.tasks_assigned_to(&agent_id);
            if orphaned.is_empty() {
                continue;
            }
            warn!(
                agent_id = %agent_id,
                count = orphaned.len(),
                "Failing over tasks from unreachable agent"
            );
            for task_id in orphaned {
                // Snapshot the live attempt so an in-flight resolution that
                // lands first makes this retry stale rather than racing it.
                let Some(task) = self.ledger.get(task_id) else {
                    continue;
                };
                match self
                    .ledger
                    .mark_retry(task_id, &agent_id, task.attempts, self.config.max_retries)
                {
                    RetryDecision::Requeued(_) => {
                        let _ = self.queue_tx.send(task_id);
                    }
                    RetryDecision::Exhausted => {
                        self.ledger.fail(
                            task_id,
                            task.attempts,
                            PeerlinkError::Unreachable(agent_id.to_string()).to_string(),
                        );
                    }
                    RetryDecision::Stale => {}
                }
            }
        }
    }

    async fn eviction_loop(self: Arc<Self>) {
        let ttl = self.config.terminal_ttl();
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.ledger.evict_terminal(ttl);
        }
    }
}
