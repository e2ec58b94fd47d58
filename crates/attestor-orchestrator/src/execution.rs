use crate::workflow::WorkflowDefinition;
use attestor_agents::AgentId;
use attestor_core::{AttestorError, ErrorKind, ExecutionContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not run because a dependency did not succeed.
    Skipped,
    /// Not run because the execution was cancelled or aborted.
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One failed attempt of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub step_id: String,
    pub agent_id: Option<AgentId>,
    pub kind: ErrorKind,
    pub message: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

impl StepError {
    pub fn new(step_id: &str, err: &AttestorError, attempt: u32) -> Self {
        Self {
            step_id: step_id.to_string(),
            agent_id: err.agent_id().map(str::to_string),
            kind: err.kind(),
            message: err.to_string(),
            attempt,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub steps_total: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub steps_cancelled: usize,
    pub retries: u32,
    pub step_durations_ms: BTreeMap<String, u64>,
}

/// Mutable record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub project_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub step_status: BTreeMap<String, StepStatus>,
    pub step_agents: BTreeMap<String, AgentId>,
    pub step_errors: BTreeMap<String, Vec<StepError>>,
    pub results: BTreeMap<String, Value>,
    pub metrics: ExecutionMetrics,
    /// Carries the shared state steps read from and write to.
    pub context: ExecutionContext,
    pub initial_input: Value,
    pub recovery_count: u32,
}

impl WorkflowExecution {
    pub fn new(
        definition: &WorkflowDefinition,
        context: ExecutionContext,
        initial_input: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: definition.id.clone(),
            project_id: context.project_id.clone(),
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            step_status: definition
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepStatus::Pending))
                .collect(),
            step_agents: BTreeMap::new(),
            step_errors: BTreeMap::new(),
            results: BTreeMap::new(),
            metrics: ExecutionMetrics {
                steps_total: definition.steps.len(),
                ..ExecutionMetrics::default()
            },
            context,
            initial_input,
            recovery_count: 0,
        }
    }

    pub fn shared_state(&self) -> &serde_json::Map<String, Value> {
        &self.context.shared_state
    }

    pub fn step(&self, step_id: &str) -> Option<StepStatus> {
        self.step_status.get(step_id).copied()
    }

    /// Mark a step as dispatched. Refused once the execution is terminal or
    /// the step was already closed.
    pub fn start_step(&mut self, step_id: &str, agent_id: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if !matches!(
            self.step(step_id),
            Some(StepStatus::Pending | StepStatus::Running)
        ) {
            return false;
        }
        self.step_status
            .insert(step_id.to_string(), StepStatus::Running);
        self.step_agents
            .insert(step_id.to_string(), agent_id.to_string());
        true
    }

    pub fn record_error(&mut self, error: StepError) {
        self.step_errors
            .entry(error.step_id.clone())
            .or_default()
            .push(error);
    }

    /// Record a finished step.
    ///
    /// After the execution turned terminal only a step that was still
    /// running may report. Its output is dropped and a late success is
    /// recorded as cancelled, so counts agree with `results`. Returns whether
    /// the output was accepted.
    pub fn finish_step(
        &mut self,
        step_id: &str,
        outcome: Result<Value, StepError>,
        duration_ms: u64,
    ) -> bool {
        let was_running = self.step(step_id) == Some(StepStatus::Running);
        if self.status.is_terminal() && !was_running {
            return false;
        }
        self.metrics
            .step_durations_ms
            .insert(step_id.to_string(), duration_ms);
        let accept = !self.status.is_terminal();
        match outcome {
            Ok(output) if accept => {
                self.step_status
                    .insert(step_id.to_string(), StepStatus::Succeeded);
                self.context.merge_output(step_id, &output);
                self.results.insert(step_id.to_string(), output);
            }
            Ok(_) => {
                self.step_status
                    .insert(step_id.to_string(), StepStatus::Cancelled);
            }
            Err(error) => {
                self.step_status
                    .insert(step_id.to_string(), StepStatus::Failed);
                self.record_error(error);
            }
        }
        if !accept {
            self.refresh_counts();
        }
        accept
    }

    /// Mark a not-yet-started step as skipped or cancelled.
    pub fn close_step(&mut self, step_id: &str, status: StepStatus) {
        if let Some(current) = self.step_status.get_mut(step_id) {
            if *current == StepStatus::Pending {
                *current = status;
            }
        }
    }

    /// Cancel every step that has not been dispatched.
    pub fn cancel_pending_steps(&mut self) {
        for status in self.step_status.values_mut() {
            if *status == StepStatus::Pending {
                *status = StepStatus::Cancelled;
            }
        }
    }

    /// Settle the final status: failed when any required step did not
    /// succeed. A cancelled execution stays cancelled.
    pub fn finalize(&mut self, definition: &WorkflowDefinition) {
        if self.status != ExecutionStatus::Cancelled {
            self.cancel_pending_steps();
            // a step whose task was lost never reported
            for status in self.step_status.values_mut() {
                if *status == StepStatus::Running {
                    *status = StepStatus::Failed;
                }
            }
            let failed = definition
                .steps
                .iter()
                .filter(|s| s.required)
                .any(|s| self.step(&s.id) != Some(StepStatus::Succeeded));
            self.status = if failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Succeeded
            };
        }
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        self.refresh_counts();
    }

    fn refresh_counts(&mut self) {
        let count = |wanted: StepStatus| self.step_status.values().filter(|s| **s == wanted).count();
        self.metrics.steps_succeeded = count(StepStatus::Succeeded);
        self.metrics.steps_failed = count(StepStatus::Failed);
        self.metrics.steps_skipped = count(StepStatus::Skipped);
        self.metrics.steps_cancelled = count(StepStatus::Cancelled);
    }

    /// Reopen a failed execution for recovery. Failed and skipped steps go
    /// back to pending, as do steps a fail-fast abort never dispatched;
    /// returns their ids.
    pub fn reopen(&mut self) -> Vec<String> {
        let rerun: Vec<String> = self
            .step_status
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s,
                    StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
                )
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &rerun {
            self.step_status.insert(id.clone(), StepStatus::Pending);
        }
        self.status = ExecutionStatus::Running;
        self.end_time = None;
        self.recovery_count += 1;
        rerun
    }

    pub fn total_time_ms(&self) -> u64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        u64::try_from((end - self.start_time).num_milliseconds()).unwrap_or(0)
    }

    /// Every recorded step error, oldest first.
    pub fn errors(&self) -> Vec<StepError> {
        let mut errors: Vec<StepError> = self.step_errors.values().flatten().cloned().collect();
        errors.sort_by_key(|e| e.at);
        errors
    }

    pub fn to_result(&self) -> WorkflowResult {
        let executed = self.metrics.steps_succeeded + self.metrics.steps_failed;
        let success_rate = if executed == 0 {
            0.0
        } else {
            self.metrics.steps_succeeded as f64 / executed as f64
        };
        WorkflowResult {
            execution_id: self.id,
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            results: self.results.clone(),
            summary: ResultSummary {
                total_time_ms: self.total_time_ms(),
                steps_executed: executed,
                success_rate,
            },
            metrics: self.metrics.clone(),
            errors: self.errors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub total_time_ms: u64,
    /// Steps that ran to success or failure.
    pub steps_executed: usize,
    pub success_rate: f64,
}

/// What `execute_workflow` and `recover_workflow` hand back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub results: BTreeMap<String, Value>,
    pub summary: ResultSummary,
    pub metrics: ExecutionMetrics,
    pub errors: Vec<StepError>,
}

/// Aggregates over every execution since the orchestrator started.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMetrics {
    pub total_executions: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Succeeded over finished executions.
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub total_recoveries: u64,
    pub total_retries: u64,
    /// Step error counts by kind.
    pub error_patterns: BTreeMap<ErrorKind, u64>,
}

impl OrchestratorMetrics {
    pub fn from_executions<'a>(executions: impl IntoIterator<Item = &'a WorkflowExecution>) -> Self {
        let mut metrics = OrchestratorMetrics::default();
        let mut total_duration = 0u64;
        for exec in executions {
            metrics.total_executions += 1;
            match exec.status {
                ExecutionStatus::Pending | ExecutionStatus::Running => metrics.running += 1,
                ExecutionStatus::Succeeded => metrics.succeeded += 1,
                ExecutionStatus::Failed => metrics.failed += 1,
                ExecutionStatus::Cancelled => metrics.cancelled += 1,
            }
            if exec.status.is_terminal() {
                total_duration += exec.total_time_ms();
            }
            metrics.total_recoveries += u64::from(exec.recovery_count);
            metrics.total_retries += u64::from(exec.metrics.retries);
            for error in exec.step_errors.values().flatten() {
                *metrics.error_patterns.entry(error.kind).or_default() += 1;
            }
        }
        let finished = metrics.succeeded + metrics.failed + metrics.cancelled;
        if finished > 0 {
            metrics.success_rate = metrics.succeeded as f64 / finished as f64;
            metrics.average_duration_ms = total_duration as f64 / finished as f64;
        }
        metrics
    }
}
