use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Operation tag attached to errors raised by a direct agent invocation.
pub const AGENT_EXECUTION: &str = "agent_execution";

/// Operation tag attached to errors raised by a queued task.
pub const TASK_EXECUTION: &str = "task_execution";

/// A convenience `Result` alias using [`AttestorError`].
pub type AttestorResult<T> = Result<T, AttestorError>;

/// Top-level error type for the orchestration core.
///
/// Errors are `Clone` because they are stored on tasks and workflow
/// executions and handed out in snapshots.
#[derive(Error, Debug, Clone)]
pub enum AttestorError {
    /// A malformed task, workflow, or agent specification.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The factory has no template for the requested agent type.
    #[error("Unsupported agent type: {0}")]
    UnsupportedType(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The agent is already executing; only one invocation per agent may be in flight.
    #[error("Agent {agent_id} is busy")]
    AgentBusy { agent_id: String },

    /// The agent exists but is not in a state that accepts work.
    #[error("Agent {agent_id} is not available (status: {status})")]
    AgentUnhealthy { agent_id: String, status: String },

    #[error("No agent with capability '{capability}' available for project '{project_id}'")]
    NoAgentAvailable {
        capability: String,
        project_id: String,
    },

    #[error("Step '{step_id}' timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Cyclic dependency detected involving task {0}")]
    CyclicDependency(Uuid),

    #[error("Unknown dependency: task {0} is not known to the queue")]
    UnknownDependency(Uuid),

    /// A task was cancelled because one of its dependencies did not succeed.
    #[error("Task {task_id} cancelled: dependency {dependency} did not succeed")]
    DependencyFailed { task_id: Uuid, dependency: Uuid },

    /// Raised by agent implementations for their own logic failures.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A failure annotated with the agent and operation it happened in.
    #[error("Agent {agent_id} failed during {operation}: {source}")]
    Execution {
        agent_id: String,
        operation: &'static str,
        #[source]
        source: Box<AttestorError>,
    },

    #[error("Agent {agent_id} was forcibly shut down")]
    ForcedShutdown { agent_id: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A fail-fast workflow aborted at a step.
    #[error("Workflow execution {execution_id} failed at step '{step_id}': {source}")]
    WorkflowExecution {
        execution_id: Uuid,
        step_id: String,
        #[source]
        source: Box<AttestorError>,
    },

    #[error("Execution {execution_id} is already {status}")]
    AlreadyTerminal { execution_id: Uuid, status: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    /// The orchestration context is shut down or not accepting work.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),
}

impl From<serde_json::Error> for AttestorError {
    fn from(err: serde_json::Error) -> Self {
        AttestorError::Json(err.to_string())
    }
}

impl From<std::io::Error> for AttestorError {
    fn from(err: std::io::Error) -> Self {
        AttestorError::Io(err.to_string())
    }
}

/// Coarse classification of an [`AttestorError`], used by callers that need
/// to map failures onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Busy,
    Timeout,
    Dependency,
    Execution,
    ForcedShutdown,
    Cancelled,
    Unavailable,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Busy => "busy",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Execution => "execution",
            ErrorKind::ForcedShutdown => "forced_shutdown",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl AttestorError {
    /// Classify this error.
    ///
    /// Wrapped errors report the kind of the error they carry, so an
    /// `Execution` wrapping a timeout is still a timeout.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttestorError::Validation(_)
            | AttestorError::UnsupportedType(_)
            | AttestorError::Config(_)
            | AttestorError::Json(_) => ErrorKind::Validation,
            AttestorError::AgentNotFound(_)
            | AttestorError::TaskNotFound(_)
            | AttestorError::WorkflowNotFound(_)
            | AttestorError::ExecutionNotFound(_) => ErrorKind::NotFound,
            AttestorError::AgentBusy { .. } => ErrorKind::Busy,
            AttestorError::StepTimeout { .. } | AttestorError::Timeout { .. } => {
                ErrorKind::Timeout
            }
            AttestorError::CyclicDependency(_)
            | AttestorError::UnknownDependency(_)
            | AttestorError::DependencyFailed { .. } => ErrorKind::Dependency,
            AttestorError::Agent(_) => ErrorKind::Execution,
            AttestorError::Execution { source, .. }
            | AttestorError::WorkflowExecution { source, .. } => source.kind(),
            AttestorError::ForcedShutdown { .. } => ErrorKind::ForcedShutdown,
            AttestorError::Cancelled(_) => ErrorKind::Cancelled,
            AttestorError::AgentUnhealthy { .. }
            | AttestorError::NoAgentAvailable { .. }
            | AttestorError::Orchestrator(_) => ErrorKind::Unavailable,
            AttestorError::AlreadyTerminal { .. } => ErrorKind::Validation,
            AttestorError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Busy | ErrorKind::Timeout)
    }

    /// Whether this is (or wraps) an `AgentBusy` error.
    pub fn is_busy(&self) -> bool {
        self.kind() == ErrorKind::Busy
    }

    /// Attach the originating agent and operation to a failure.
    pub fn in_agent(self, agent_id: impl Into<String>, operation: &'static str) -> Self {
        AttestorError::Execution {
            agent_id: agent_id.into(),
            operation,
            source: Box::new(self),
        }
    }

    /// The operation tag of an `Execution` error, looking through workflow
    /// wrapping.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            AttestorError::Execution { operation, .. } => Some(*operation),
            AttestorError::WorkflowExecution { source, .. } => source.operation(),
            _ => None,
        }
    }

    /// The agent id carried by this error, if any.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            AttestorError::AgentNotFound(id) => Some(id),
            AttestorError::AgentBusy { agent_id }
            | AttestorError::AgentUnhealthy { agent_id, .. }
            | AttestorError::Execution { agent_id, .. }
            | AttestorError::ForcedShutdown { agent_id } => Some(agent_id),
            AttestorError::WorkflowExecution { source, .. } => source.agent_id(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_error_keeps_kind_when_tagged() {
        let err = AttestorError::AgentBusy {
            agent_id: "grader-1".into(),
        }
        .in_agent("grader-1", AGENT_EXECUTION);
        assert!(err.is_busy());
        assert!(err.is_retryable());
        assert_eq!(err.operation(), Some(AGENT_EXECUTION));
        assert_eq!(AttestorError::Agent("x".into()).operation(), None);
    }

    #[test]
    fn test_execution_error_keeps_agent_and_operation() {
        let err = AttestorError::Agent("model refused".into()).in_agent("grader-1", AGENT_EXECUTION);
        assert_eq!(err.agent_id(), Some("grader-1"));
        assert_eq!(err.operation(), Some(AGENT_EXECUTION));
        assert_eq!(err.kind(), ErrorKind::Execution);
        let msg = err.to_string();
        assert!(msg.contains("grader-1"));
        assert!(msg.contains("agent_execution"));
        assert!(msg.contains("model refused"));
    }

    #[test]
    fn test_kind_passes_through_wrappers() {
        let err = AttestorError::AgentBusy {
            agent_id: "a".into(),
        }
        .in_agent("a", TASK_EXECUTION);
        assert!(err.is_busy());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_dependency_errors_are_not_retryable() {
        let err = AttestorError::CyclicDependency(Uuid::new_v4());
        assert_eq!(err.kind(), ErrorKind::Dependency);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_json_error_converts() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AttestorError = parse.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::ForcedShutdown.to_string(), "forced_shutdown");
    }
}
