use attestor_agents::AgentId;
use attestor_core::{AttestorError, ErrorKind, ExecutionContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Dispatch priority of a queued task. Higher runs first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Status of a task in the queue.
///
/// `Queued` tasks have every dependency satisfied; `Waiting` tasks are
/// blocked on at least one dependency that has not succeeded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Waiting,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Optional knobs for `AgentRegistry::queue_task`.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Priority,
    pub dependencies: Vec<Uuid>,
    pub context: Option<ExecutionContext>,
    pub timeout: Option<Duration>,
    /// Pre-assigned task id; generated when absent.
    pub id: Option<Uuid>,
}

impl TaskOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// A fully specified task ready to be enqueued.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub input: Value,
    pub context: ExecutionContext,
    pub priority: Priority,
    pub dependencies: Vec<Uuid>,
    pub timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(agent_id: impl Into<AgentId>, input: Value, options: TaskOptions) -> Self {
        Self {
            id: options.id.unwrap_or_else(Uuid::new_v4),
            agent_id: agent_id.into(),
            input,
            context: options.context.unwrap_or_default(),
            priority: options.priority,
            dependencies: options.dependencies,
            timeout: options.timeout,
        }
    }
}

/// A unit of work targeting one agent, tracked by the queue.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub input: Value,
    pub context: ExecutionContext,
    pub priority: Priority,
    pub dependencies: Vec<Uuid>,
    pub timeout: Option<Duration>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<AttestorError>,
    /// Monotonic enqueue order; breaks priority ties FIFO.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn from_spec(spec: TaskSpec, sequence: u64) -> Self {
        Self {
            id: spec.id,
            agent_id: spec.agent_id,
            input: spec.input,
            context: spec.context,
            priority: spec.priority,
            dependencies: spec.dependencies,
            timeout: spec.timeout,
            status: TaskStatus::Waiting,
            result: None,
            error: None,
            sequence,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            agent_id: self.agent_id.clone(),
            priority: self.priority,
            status: self.status,
            dependencies: self.dependencies.clone(),
            result: self.result.clone(),
            error: self.error.as_ref().map(ToString::to_string),
            error_kind: self.error.as_ref().map(AttestorError::kind),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Serializable view of a task handed out to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub priority: Priority,
    pub status: TaskStatus,
    pub dependencies: Vec<Uuid>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Metrics tracked per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub invocations: u64,
    pub errors: u64,
    pub retries: u64,
    pub duration_ms: u64,
}

/// Real-time snapshot of an agent's activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub current_task: Option<Uuid>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}
