use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use peerlink_core::{
    AgentId, Event, EventBus, PeerlinkError, PeerlinkResult, Task, TaskState,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a retry request against the ledger.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget remained; the task was moved back to dispatchable state
    /// with the given attempt number and the failed agent excluded.
    Requeued(u32),
    /// Retry budget is exhausted; the caller should fail the task.
    Exhausted,
    /// The task is already terminal (e.g. cancelled mid-flight); nothing
    /// to do.
    Stale,
}

/// Aggregate task counts for dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    /// All tasks currently retained.
    pub total: usize,
    /// Tasks awaiting routing.
    pub pending: usize,
    /// Tasks assigned and awaiting acknowledgement.
    pub dispatched: usize,
    /// Tasks executing on an agent.
    pub running: usize,
    /// Successfully completed tasks still retained.
    pub completed: usize,
    /// Failed tasks still retained.
    pub failed: usize,
    /// Cancelled tasks still retained.
    pub cancelled: usize,
}

/// The authoritative record of every task and its lifecycle state.
///
/// All mutations are single lock-guarded read-modify-writes that enforce
/// the state machine in [`TaskState::can_transition`]; terminal tasks are
/// immutable and duplicate or late signals are ignored rather than errored.
/// Transition events are published in commit order.
pub struct TaskLedger {
    tasks: RwLock<HashMap<Uuid, Task>>,
    capacity: usize,
    bus: Arc<EventBus>,
}

impl TaskLedger {
    /// Create a ledger bounded at `capacity` tasks.
    pub fn new(bus: Arc<EventBus>, capacity: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            capacity,
            bus,
        }
    }

    /// Admit a new task. Fails with `QueueFull` at capacity.
    pub fn insert(&self, task: Task) -> PeerlinkResult<Uuid> {
        let mut tasks = self.tasks.write();
        if tasks.len() >= self.capacity {
            return Err(PeerlinkError::QueueFull(self.capacity));
        }
        let id = task.id;
        tasks.insert(id, task);
        Ok(id)
    }

    /// Assign an agent and move the task to `Dispatched`.
    ///
    /// Covers both the first dispatch (`Pending -> Dispatched`) and
    /// re-selection after a retry (`Dispatched -> Dispatched`). Returns the
    /// attempt number the dispatch runs under, or `None` when the task
    /// vanished or already reached a terminal state (cancel races here).
    pub fn assign(&self, id: Uuid, agent: &AgentId) -> Option<u32> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id)?;
        if !task.state.can_transition(TaskState::Dispatched) {
            return None;
        }
        task.assigned_agent = Some(agent.clone());
        Self::commit(&self.bus, task, TaskState::Dispatched);
        Some(task.attempts)
    }

    /// Acknowledge execution start: `Dispatched -> Running`.
    pub fn mark_running(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        if task.state != TaskState::Dispatched {
            return false;
        }
        Self::commit(&self.bus, task, TaskState::Running);
        true
    }

    /// Attach a result and complete the task.
    ///
    /// Guarded by the attempt number: a late result from a superseded
    /// attempt, or any signal against a terminal task, is a no-op and
    /// returns false.
    pub fn complete(&self, id: Uuid, attempt: u32, result: serde_json::Value) -> bool {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        if task.state.is_terminal() || task.attempts != attempt {
            debug!(task_id = %id, attempt, "Ignoring stale or duplicate completion");
            return false;
        }
        if !task.state.can_transition(TaskState::Completed) {
            return false;
        }
        task.result = Some(result);
        Self::commit(&self.bus, task, TaskState::Completed);
        true
    }

    /// Fail the task permanently, recording the final error.
    ///
    /// Guarded like [`TaskLedger::complete`]: the signal carries the
    /// attempt that produced it, and a failure from a superseded attempt,
    /// or against a terminal task, is a no-op returning false.
    pub fn fail(&self, id: Uuid, attempt: u32, error: impl Into<String>) -> bool {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        if task.state.is_terminal() || task.attempts != attempt {
            debug!(task_id = %id, attempt, "Ignoring stale or duplicate failure");
            return false;
        }
        if !task.state.can_transition(TaskState::Failed) {
            return false;
        }
        task.error = Some(error.into());
        Self::commit(&self.bus, task, TaskState::Failed);
        true
    }

    /// Record a retryable dispatch failure for the given attempt.
    ///
    /// With budget left this consumes one attempt, excludes the failed
    /// agent from re-selection, clears the assignment, and keeps the task
    /// dispatchable; otherwise the caller fails the task with the last
    /// error. A failure from a superseded attempt is `Stale`: it must not
    /// burn budget or clobber the live attempt's assignment.
    pub fn mark_retry(
        &self,
        id: Uuid,
        failed_agent: &AgentId,
        attempt: u32,
        max_retries: u32,
    ) -> RetryDecision {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&id) else {
            return RetryDecision::Stale;
        };
        if task.state.is_terminal() || task.attempts != attempt {
            return RetryDecision::Stale;
        }
        if task.attempts >= max_retries {
            return RetryDecision::Exhausted;
        }
        task.attempts += 1;
        if !task.excluded_agents.contains(failed_agent) {
            task.excluded_agents.push(failed_agent.clone());
        }
        task.assigned_agent = None;
        if task.state.can_transition(TaskState::Dispatched) {
            Self::commit(&self.bus, task, TaskState::Dispatched);
        }
        RetryDecision::Requeued(task.attempts)
    }

    /// Move a dispatchable task back to `Pending` (no candidate was
    /// available this attempt; capacity may arrive later). Attempt-guarded
    /// so a superseded routing pass cannot unassign a live attempt.
    pub fn requeue(&self, id: Uuid, attempt: u32) -> bool {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        if task.attempts != attempt {
            return false;
        }
        match task.state {
            TaskState::Pending => true,
            state if state.can_transition(TaskState::Pending) => {
                task.assigned_agent = None;
                Self::commit(&self.bus, task, TaskState::Pending);
                true
            }
            _ => false,
        }
    }

    /// Cancel a task. The local transition commits immediately regardless
    /// of any in-flight dispatch; the returned snapshot carries the
    /// assigned agent so the caller can send a best-effort remote cancel.
    pub fn cancel(&self, id: Uuid) -> PeerlinkResult<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or(PeerlinkError::TaskNotFound(id))?;
        if task.state.is_terminal() {
            return Err(PeerlinkError::AlreadyTerminal(id));
        }
        Self::commit(&self.bus, task, TaskState::Cancelled);
        Ok(task.clone())
    }

    /// Snapshot a task.
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().get(&id).cloned()
    }

    /// Snapshot tasks, optionally filtered by state, in submission order.
    pub fn list(&self, state: Option<TaskState>) -> Vec<Task> {
        let tasks = self.tasks.read();
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| state.map_or(true, |s| t.state == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    /// Ids of non-terminal tasks currently assigned to `agent`.
    pub fn tasks_assigned_to(&self, agent: &AgentId) -> Vec<Uuid> {
        self.tasks
            .read()
            .values()
            .filter(|t| !t.state.is_terminal() && t.assigned_agent.as_ref() == Some(agent))
            .map(|t| t.id)
            .collect()
    }

    /// Number of retained tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether the ledger holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Aggregate counts by state.
    pub fn stats(&self) -> LedgerStats {
        let tasks = self.tasks.read();
        let mut stats = LedgerStats {
            total: tasks.len(),
            ..LedgerStats::default()
        };
        for task in tasks.values() {
            match task.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Dispatched => stats.dispatched += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Drop terminal tasks older than `ttl`. Returns how many were evicted.
    pub fn evict_terminal(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(300));
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, t| !(t.state.is_terminal() && t.updated_at < cutoff));
        let evicted = before - tasks.len();
        if evicted > 0 {
            debug!(evicted, "Evicted terminal tasks");
        }
        evicted
    }

    /// Commit a transition: mutate state under the lock and publish the
    /// event before the lock drops, so subscribers observe commit order.
    fn commit(bus: &EventBus, task: &mut Task, to: TaskState) {
        let from = task.state;
        task.state = to;
        task.updated_at = Utc::now();
        bus.publish(Event::TaskTransition {
            task_id: task.id,
            from,
            to,
            agent_id: task.assigned_agent.clone(),
            attempt: task.attempts,
            timestamp: task.updated_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_core::{Message, Role};

    fn ledger(capacity: usize) -> TaskLedger {
        TaskLedger::new(Arc::new(EventBus::new(256)), capacity)
    }

    fn task() -> Task {
        Task::new(
            Message::text(Role::User, "summarize this"),
            vec!["summarize".to_string()],
        )
    }

    fn agent(n: u16) -> AgentId {
        AgentId::from_endpoint(&format!("http://agent-{n}:1"))
    }

    #[test]
    fn insert_enforces_capacity() {
        let ledger = ledger(2);
        ledger.insert(task()).unwrap();
        ledger.insert(task()).unwrap();
        let err = ledger.insert(task()).unwrap_err();
        assert!(matches!(err, PeerlinkError::QueueFull(2)));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn happy_path_transitions() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let a = agent(1);

        let attempt = ledger.assign(id, &a).unwrap();
        assert_eq!(attempt, 0);
        assert_eq!(ledger.get(id).unwrap().state, TaskState::Dispatched);
        assert_eq!(ledger.get(id).unwrap().assigned_agent, Some(a.clone()));

        assert!(ledger.mark_running(id));
        assert!(ledger.complete(id, attempt, serde_json::json!({"ok": true})));

        let done = ledger.get(id).unwrap();
        assert_eq!(done.state, TaskState::Completed);
        assert!(done.result.is_some());
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let attempt = ledger.assign(id, &agent(1)).unwrap();
        ledger.mark_running(id);

        assert!(ledger.complete(id, attempt, serde_json::json!(1)));
        assert!(!ledger.complete(id, attempt, serde_json::json!(2)));
        assert!(!ledger.fail(id, attempt, "late error"));

        // First result wins.
        assert_eq!(ledger.get(id).unwrap().result, Some(serde_json::json!(1)));
    }

    #[test]
    fn stale_attempt_result_is_ignored() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let a = agent(1);
        let first_attempt = ledger.assign(id, &a).unwrap();
        ledger.mark_running(id);

        // Failover supersedes the first attempt.
        assert_eq!(
            ledger.mark_retry(id, &a, first_attempt, 3),
            RetryDecision::Requeued(1)
        );

        // The superseded attempt's late result must not complete the task.
        assert!(!ledger.complete(id, first_attempt, serde_json::json!("late")));
        let current = ledger.get(id).unwrap();
        assert_eq!(current.state, TaskState::Dispatched);
        assert!(current.result.is_none());
        assert!(current.excluded_agents.contains(&a));
        assert!(current.assigned_agent.is_none());
    }

    #[test]
    fn stale_attempt_failure_is_ignored() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let a = agent(1);
        let first_attempt = ledger.assign(id, &a).unwrap();
        ledger.mark_running(id);

        // Failover grants a retry; attempt 0 is now superseded.
        assert_eq!(
            ledger.mark_retry(id, &a, first_attempt, 3),
            RetryDecision::Requeued(1)
        );

        // The superseded attempt's late rejection must not fail the task,
        // and its late transport error must not consume more budget.
        assert!(!ledger.fail(id, first_attempt, "late rejection"));
        assert_eq!(
            ledger.mark_retry(id, &a, first_attempt, 3),
            RetryDecision::Stale
        );

        let current = ledger.get(id).unwrap();
        assert_eq!(current.state, TaskState::Dispatched);
        assert_eq!(current.attempts, 1);
        assert!(current.error.is_none());
    }

    #[test]
    fn retry_budget_exhausts() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let a = agent(1);
        ledger.assign(id, &a).unwrap();

        assert_eq!(ledger.mark_retry(id, &agent(2), 0, 2), RetryDecision::Requeued(1));
        assert_eq!(ledger.mark_retry(id, &agent(3), 1, 2), RetryDecision::Requeued(2));
        assert_eq!(ledger.mark_retry(id, &agent(4), 2, 2), RetryDecision::Exhausted);

        assert!(ledger.fail(id, 2, "unreachable"));
        assert_eq!(ledger.get(id).unwrap().state, TaskState::Failed);
        assert_eq!(ledger.get(id).unwrap().error.as_deref(), Some("unreachable"));
    }

    #[test]
    fn cancel_pending_never_assigns_an_agent() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();

        let snapshot = ledger.cancel(id).unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.assigned_agent.is_none());

        // Terminal now: assign and cancel are both rejected.
        assert!(ledger.assign(id, &agent(1)).is_none());
        assert!(matches!(
            ledger.cancel(id),
            Err(PeerlinkError::AlreadyTerminal(_))
        ));
    }

    #[test]
    fn cancel_missing_task_is_not_found() {
        let ledger = ledger(10);
        assert!(matches!(
            ledger.cancel(Uuid::new_v4()),
            Err(PeerlinkError::TaskNotFound(_))
        ));
    }

    #[test]
    fn cancelled_mid_flight_makes_retry_stale() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let a = agent(1);
        let attempt = ledger.assign(id, &a).unwrap();
        ledger.cancel(id).unwrap();

        assert_eq!(ledger.mark_retry(id, &a, attempt, 3), RetryDecision::Stale);
        assert!(!ledger.complete(id, attempt, serde_json::json!({})));
        assert_eq!(ledger.get(id).unwrap().state, TaskState::Cancelled);
    }

    #[test]
    fn requeue_returns_task_to_pending() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        ledger.assign(id, &agent(1)).unwrap();

        assert!(ledger.requeue(id, 0));
        let t = ledger.get(id).unwrap();
        assert_eq!(t.state, TaskState::Pending);
        assert!(t.assigned_agent.is_none());

        // Requeueing an already-pending task is fine.
        assert!(ledger.requeue(id, 0));
    }

    #[test]
    fn tasks_assigned_to_skips_terminal() {
        let ledger = ledger(10);
        let a = agent(1);

        let running = ledger.insert(task()).unwrap();
        ledger.assign(running, &a).unwrap();
        ledger.mark_running(running);

        let done = ledger.insert(task()).unwrap();
        let attempt = ledger.assign(done, &a).unwrap();
        ledger.mark_running(done);
        ledger.complete(done, attempt, serde_json::json!({}));

        assert_eq!(ledger.tasks_assigned_to(&a), vec![running]);
    }

    #[test]
    fn list_filters_by_state_in_fifo_order() {
        let ledger = ledger(10);
        let first = ledger.insert(task()).unwrap();
        let second = ledger.insert(task()).unwrap();
        ledger.assign(second, &agent(1)).unwrap();

        let pending = ledger.list(Some(TaskState::Pending));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first);

        let all = ledger.list(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first);
        assert_eq!(all[1].id, second);
    }

    #[test]
    fn evict_terminal_respects_ttl() {
        let ledger = ledger(10);
        let id = ledger.insert(task()).unwrap();
        let attempt = ledger.assign(id, &agent(1)).unwrap();
        ledger.mark_running(id);
        ledger.complete(id, attempt, serde_json::json!({}));
        let live = ledger.insert(task()).unwrap();

        // Fresh terminal task is inside the ttl window.
        assert_eq!(ledger.evict_terminal(Duration::from_secs(60)), 0);
        // Zero ttl evicts it but never touches non-terminal tasks.
        assert_eq!(ledger.evict_terminal(Duration::from_secs(0)), 1);
        assert!(ledger.get(live).is_some());
        assert!(ledger.get(id).is_none());
    }

    #[test]
    fn stats_reflect_states() {
        let ledger = ledger(10);
        ledger.insert(task()).unwrap();
        let d = ledger.insert(task()).unwrap();
        ledger.assign(d, &agent(1)).unwrap();
        let c = ledger.insert(task()).unwrap();
        ledger.cancel(c).unwrap();

        let stats = ledger.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.cancelled, 1);
    }
}
