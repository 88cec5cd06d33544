use crate::card::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The author of a task [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// A remote agent.
    Agent,
    /// A system-level instruction.
    System,
}

/// One part of a message payload. The core never interprets part content;
/// it is carried verbatim to the executing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    /// Plain text content.
    Text {
        /// The text itself.
        text: String,
    },
    /// Structured JSON content.
    Data {
        /// Arbitrary JSON payload.
        data: serde_json::Value,
    },
    /// A file reference or inline file content.
    File {
        /// Original file name.
        name: String,
        /// Base64-encoded bytes or a fetchable URI, agent-defined.
        content: String,
    },
}

/// The payload of a task: a multi-part message in the peer-agent protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// Ordered message parts.
    pub parts: Vec<Part>,
    /// Correlation id linking messages of one conversation.
    #[serde(default)]
    pub context_id: Option<String>,
}

impl Message {
    /// A single-part text message from the given role.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
            context_id: None,
        }
    }
}

/// Lifecycle state of a task.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal; once reached, a
/// task is immutable and every further transition attempt is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted, not yet routed to an agent.
    Pending,
    /// Assigned to an agent, awaiting acknowledgement.
    Dispatched,
    /// The agent acknowledged and is executing.
    Running,
    /// The agent reported success.
    Completed,
    /// Retries exhausted or a non-retryable error was reported.
    Failed,
    /// Explicitly cancelled by the caller.
    Cancelled,
}

impl TaskState {
    /// Whether this state permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether the lifecycle state machine permits moving to `to`.
    ///
    /// The `Dispatched -> Dispatched` self-edge covers re-selection after a
    /// retryable failure; `Dispatched -> Pending` covers re-queueing when
    /// every candidate was excluded but retry budget remains.
    pub fn can_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Pending, Dispatched) | (Pending, Cancelled) | (Pending, Failed) => true,
            (Dispatched, Running)
            | (Dispatched, Dispatched)
            | (Dispatched, Pending)
            | (Dispatched, Completed)
            | (Dispatched, Failed)
            | (Dispatched, Cancelled) => true,
            (Running, Completed)
            | (Running, Dispatched)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Dispatched => write!(f, "dispatched"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work submitted for execution by some capable agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id assigned at submission.
    pub id: Uuid,
    /// Opaque payload delivered to the executing agent.
    pub message: Message,
    /// Capability tags the executing agent must declare.
    pub required_capabilities: Vec<String>,
    /// The agent currently assigned, if any. At most one at any instant.
    pub assigned_agent: Option<AgentId>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Dispatch attempts consumed so far.
    pub attempts: u32,
    /// Agents that failed this task; excluded from re-selection.
    #[serde(default)]
    pub excluded_agents: Vec<AgentId>,
    /// Session/conversation correlation id.
    #[serde(default)]
    pub context_id: Option<String>,
    /// Arbitrary metadata forwarded to the executing agent.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Result payload attached on completion; opaque to the core.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Last error recorded for this task.
    #[serde(default)]
    pub error: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Time of the most recent state change.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task for the given payload and capability tags.
    pub fn new(message: Message, required_capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            message,
            required_capabilities,
            assigned_agent: None,
            state: TaskState::Pending,
            attempts: 0,
            excluded_agents: Vec::new(),
            context_id: None,
            metadata: HashMap::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a conversation correlation id, builder-style.
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }
}

/// The raw task-submission payload accepted at the intake boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The message to execute.
    pub message: Message,
    /// Capability tags the executing agent must declare.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Session/conversation correlation id.
    #[serde(default)]
    pub context_id: Option<String>,
    /// Arbitrary metadata forwarded to the agent.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
