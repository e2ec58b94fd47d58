use attestor_core::{AttestorError, AttestorResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Retry behaviour for transient step failures.
///
/// Only `AgentBusy` is retried by default; timeouts are retried when
/// `retry_on_timeout` is set. Backoff grows linearly with the attempt number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay added per attempt, in milliseconds.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    #[serde(default)]
    pub retry_on_timeout: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_step_ms() -> u64 {
    250
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(u64::from(attempt)))
    }

    /// Whether a failure on attempt `attempt` (0-based) should be retried.
    pub fn should_retry(&self, err: &AttestorError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        match err.kind() {
            ErrorKind::Busy => true,
            ErrorKind::Timeout => self.retry_on_timeout,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long `unregister` waits for a busy agent before forcing removal.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Bound on a single agent health check.
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_health_check_timeout_ms() -> u64 {
    2_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
        }
    }
}

impl RegistryConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Applied to queued tasks that do not set their own timeout.
    #[serde(default)]
    pub default_task_timeout_ms: Option<u64>,
    /// Finished tasks kept for status lookups; older ones are pruned.
    #[serde(default = "default_finished_task_retention")]
    pub finished_task_retention: usize,
}

fn default_finished_task_retention() -> usize {
    1_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: None,
            finished_task_retention: default_finished_task_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Used by steps that do not declare a timeout.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    /// Maximum number of finished executions kept in the history listing.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_history_limit() -> usize {
    500
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_step_timeout_ms: default_step_timeout_ms(),
            history_limit: default_history_limit(),
        }
    }
}

/// Top-level configuration of an orchestration context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl OrchestratorConfig {
    /// Parse a TOML document; missing sections and fields take defaults.
    pub fn from_toml_str(raw: &str) -> AttestorResult<Self> {
        let config: OrchestratorConfig = toml::from_str(raw)
            .map_err(|e| AttestorError::Config(format!("invalid orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> AttestorResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AttestorError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> AttestorResult<()> {
        if self.workflow.default_step_timeout_ms == 0 {
            return Err(AttestorError::Config(
                "workflow.default_step_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.workflow.history_limit == 0 {
            return Err(AttestorError::Config(
                "workflow.history_limit must be greater than zero".into(),
            ));
        }
        if self.queue.finished_task_retention == 0 {
            return Err(AttestorError::Config(
                "queue.finished_task_retention must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
