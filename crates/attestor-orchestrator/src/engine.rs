use crate::config::WorkflowConfig;
use crate::execution::{
    ExecutionStatus, OrchestratorMetrics, StepError, StepStatus, WorkflowExecution, WorkflowResult,
};
use crate::registry::{AgentRegistry, DiscoveryQuery};
use crate::workflow::{ErrorHandling, ExecutionMode, StepDefinition, WorkflowDefinition, WorkflowSummary};
use async_trait::async_trait;
use attestor_agents::{AgentId, CapabilityName};
use attestor_core::{
    AttestorError, AttestorResult, ExecutionContext, HealthCheckable, HealthReport,
};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Options for `WorkflowOrchestrator::recover_workflow`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOptions {
    /// Re-run failed, skipped, and never-dispatched steps. When false the
    /// execution is returned unchanged.
    pub retry_failed_steps: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            retry_failed_steps: true,
        }
    }
}

/// Result of one step, as seen by the driver that launched it.
struct StepOutcome {
    output: AttestorResult<Value>,
    agent_id: Option<AgentId>,
    attempts: u32,
    duration_ms: u64,
    /// The step was closed before it could be dispatched.
    refused: bool,
}

/// First required step failure of a fail-fast workflow.
struct Abort {
    step_id: String,
    error: AttestorError,
}

enum DependencyState {
    Ready,
    Waiting,
    Blocked,
}

/// Runs workflow definitions over the agents of an `AgentRegistry`.
///
/// Steps are routed by capability to agents tagged with the execution's
/// project id. Every execution is kept in memory and can be inspected,
/// cancelled, or recovered by id.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    registry: AgentRegistry,
    workflows: Arc<RwLock<HashMap<String, Arc<WorkflowDefinition>>>>,
    executions: Arc<RwLock<HashMap<Uuid, WorkflowExecution>>>,
    /// Finished execution ids, most recent first.
    history: Arc<Mutex<VecDeque<Uuid>>>,
    config: WorkflowConfig,
    accepting: Arc<AtomicBool>,
}

impl WorkflowOrchestrator {
    pub fn new(registry: AgentRegistry, config: WorkflowConfig) -> Self {
        Self {
            registry,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            config,
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn ensure_accepting(&self) -> AttestorResult<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AttestorError::Orchestrator(
                "workflow orchestrator is shut down".into(),
            ))
        }
    }

    // --- definitions ------------------------------------------------------

    /// Validate and register a workflow. Definitions are immutable once
    /// registered; a second registration under the same id is rejected.
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> AttestorResult<()> {
        definition.validate()?;
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&definition.id) {
            return Err(AttestorError::Validation(format!(
                "workflow '{}' is already registered",
                definition.id
            )));
        }
        info!(
            workflow_id = %definition.id,
            steps = definition.steps.len(),
            mode = %definition.execution_mode,
            "Workflow registered"
        );
        workflows.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.workflows
            .read()
            .get(workflow_id)
            .map(|def| def.as_ref().clone())
    }

    /// Registered workflows, sorted by id.
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .workflows
            .read()
            .values()
            .map(|def| WorkflowSummary::from(def.as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    fn definition(&self, workflow_id: &str) -> AttestorResult<Arc<WorkflowDefinition>> {
        self.workflows
            .read()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| AttestorError::WorkflowNotFound(workflow_id.to_string()))
    }

    // --- execution --------------------------------------------------------

    /// Run a registered workflow for a project and wait for it to finish.
    ///
    /// The context's project id is replaced by `project_id`. A fail-fast
    /// workflow whose required step fails returns `WorkflowExecution` naming
    /// the step; every other outcome, including cancellation, returns the
    /// result with its final status.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        project_id: &str,
        context: ExecutionContext,
        initial_input: Value,
    ) -> AttestorResult<WorkflowResult> {
        self.ensure_accepting()?;
        let definition = self.definition(workflow_id)?;

        let mut context = context;
        context.project_id = project_id.to_string();
        let mut execution = WorkflowExecution::new(&definition, context, initial_input);
        execution.status = ExecutionStatus::Running;
        let execution_id = execution.id;
        self.executions.write().insert(execution_id, execution);

        info!(
            execution_id = %execution_id,
            workflow_id = %workflow_id,
            project_id = %project_id,
            mode = %definition.execution_mode,
            "Workflow execution started"
        );

        let outcome = self.drive(execution_id, &definition, None).await;
        self.conclude(execution_id, &definition, outcome)
    }

    async fn drive(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        only: Option<&HashSet<String>>,
    ) -> Result<(), Abort> {
        match (definition.execution_mode, only) {
            (ExecutionMode::Sequential, _) => {
                self.run_sequential(execution_id, definition, only).await
            }
            (ExecutionMode::Parallel, None) => self.run_parallel(execution_id, definition).await,
            _ => self.run_tiered(execution_id, definition, only).await,
        }
    }

    fn conclude(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        outcome: Result<(), Abort>,
    ) -> AttestorResult<WorkflowResult> {
        let result = self
            .with_execution(execution_id, |exec| {
                exec.finalize(definition);
                exec.to_result()
            })
            .ok_or(AttestorError::ExecutionNotFound(execution_id))?;
        self.archive(execution_id);

        match result.status {
            ExecutionStatus::Succeeded => info!(
                execution_id = %execution_id,
                workflow_id = %definition.id,
                duration_ms = result.summary.total_time_ms,
                steps = result.summary.steps_executed,
                "Workflow execution succeeded"
            ),
            ExecutionStatus::Cancelled => info!(
                execution_id = %execution_id,
                workflow_id = %definition.id,
                "Workflow execution cancelled"
            ),
            status => warn!(
                execution_id = %execution_id,
                workflow_id = %definition.id,
                status = %status,
                errors = result.errors.len(),
                "Workflow execution did not succeed"
            ),
        }

        match outcome {
            Err(abort) if result.status == ExecutionStatus::Failed => {
                Err(AttestorError::WorkflowExecution {
                    execution_id,
                    step_id: abort.step_id,
                    source: Box::new(abort.error),
                })
            }
            _ => Ok(result),
        }
    }

    /// One step at a time in declared order. A step whose dependency did
    /// not succeed is skipped.
    async fn run_sequential(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        only: Option<&HashSet<String>>,
    ) -> Result<(), Abort> {
        for step in &definition.steps {
            if only.is_some_and(|set| !set.contains(&step.id)) {
                continue;
            }
            if self.is_cancelled(execution_id) {
                break;
            }
            if !matches!(
                self.dependency_state(execution_id, step),
                DependencyState::Ready
            ) {
                self.skip(execution_id, step);
                continue;
            }
            let Some((context, input)) = self.step_inputs(execution_id, step) else {
                break;
            };
            let outcome = self
                .clone()
                .run_step(execution_id, step.clone(), context, input)
                .await;
            if let Some(abort) = self.apply_outcome(execution_id, definition, step, outcome) {
                self.abort_pending(execution_id, &abort);
                return Err(abort);
            }
        }
        Ok(())
    }

    /// Every step starts as soon as all its dependencies have succeeded.
    async fn run_parallel(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<(), Abort> {
        let mut pending: Vec<usize> = (0..definition.steps.len()).collect();
        let mut running: JoinSet<(usize, StepOutcome)> = JoinSet::new();
        let mut abort: Option<Abort> = None;

        loop {
            if abort.is_none() && !self.is_cancelled(execution_id) {
                // skipping a step can block its dependents, so settle until stable
                loop {
                    let mut progressed = false;
                    let mut still_waiting = Vec::new();
                    for index in pending.drain(..) {
                        let step = &definition.steps[index];
                        match self.dependency_state(execution_id, step) {
                            DependencyState::Ready => {
                                self.launch(&mut running, execution_id, index, step);
                                progressed = true;
                            }
                            DependencyState::Blocked => {
                                self.skip(execution_id, step);
                                progressed = true;
                            }
                            DependencyState::Waiting => still_waiting.push(index),
                        }
                    }
                    pending = still_waiting;
                    if !progressed {
                        break;
                    }
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    error!(execution_id = %execution_id, error = %join_err, "Step task lost");
                    continue;
                }
            };
            let step = &definition.steps[index];
            if let Some(failure) = self.apply_outcome(execution_id, definition, step, outcome) {
                if abort.is_none() {
                    self.abort_pending(execution_id, &failure);
                    abort = Some(failure);
                }
            }
        }

        abort.map_or(Ok(()), Err)
    }

    /// Tier by tier. Steps of a tier run concurrently and their outputs are
    /// merged in declared order once the whole tier is done.
    async fn run_tiered(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        only: Option<&HashSet<String>>,
    ) -> Result<(), Abort> {
        let tiers = definition.tiers().map_err(|err| Abort {
            step_id: String::new(),
            error: err,
        })?;

        for (level, tier) in tiers.iter().enumerate() {
            if self.is_cancelled(execution_id) {
                break;
            }
            let mut running: JoinSet<(usize, StepOutcome)> = JoinSet::new();
            for &index in tier {
                let step = &definition.steps[index];
                if only.is_some_and(|set| !set.contains(&step.id)) {
                    continue;
                }
                match self.dependency_state(execution_id, step) {
                    DependencyState::Ready => self.launch(&mut running, execution_id, index, step),
                    _ => self.skip(execution_id, step),
                }
            }
            debug!(execution_id = %execution_id, tier = level, steps = running.len(), "Tier dispatched");

            let mut finished = Vec::with_capacity(running.len());
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok(done) => finished.push(done),
                    Err(join_err) => {
                        error!(execution_id = %execution_id, error = %join_err, "Step task lost");
                    }
                }
            }
            finished.sort_by_key(|(index, _)| *index);

            let mut abort = None;
            for (index, outcome) in finished {
                let step = &definition.steps[index];
                if let Some(failure) = self.apply_outcome(execution_id, definition, step, outcome) {
                    abort.get_or_insert(failure);
                }
            }
            if let Some(abort) = abort {
                self.abort_pending(execution_id, &abort);
                return Err(abort);
            }
        }
        Ok(())
    }

    fn launch(
        &self,
        running: &mut JoinSet<(usize, StepOutcome)>,
        execution_id: Uuid,
        index: usize,
        step: &StepDefinition,
    ) {
        let Some((context, input)) = self.step_inputs(execution_id, step) else {
            return;
        };
        let step = step.clone();
        let step_id = step.id.clone();
        let orchestrator = self.clone();
        running.spawn(async move {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(orchestrator.run_step(execution_id, step, context, input))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    StepOutcome {
                        output: Err(AttestorError::Agent(format!(
                            "step '{step_id}' panicked: {message}"
                        ))),
                        agent_id: None,
                        attempts: 1,
                        duration_ms: millis(started.elapsed()),
                        refused: false,
                    }
                });
            (index, outcome)
        });
    }

    /// Resolve an agent, invoke it under the step timeout, and retry
    /// according to the workflow retry policy.
    async fn run_step(
        self,
        execution_id: Uuid,
        step: StepDefinition,
        context: ExecutionContext,
        input: Value,
    ) -> StepOutcome {
        let started = Instant::now();
        let timeout_ms = step.timeout_ms.unwrap_or(self.config.default_step_timeout_ms);
        let mut attempt = 0u32;
        let mut agent_id = None;

        loop {
            let chosen = match self.select_agent(&context.project_id, step.required_capability) {
                Ok(id) => id,
                Err(err) => {
                    return StepOutcome {
                        output: Err(err),
                        agent_id,
                        attempts: attempt + 1,
                        duration_ms: millis(started.elapsed()),
                        refused: false,
                    }
                }
            };
            let admitted = self
                .with_execution(execution_id, |exec| exec.start_step(&step.id, &chosen))
                .unwrap_or(false);
            if !admitted {
                return StepOutcome {
                    output: Err(AttestorError::Cancelled(format!(
                        "step '{}' was closed before dispatch",
                        step.id
                    ))),
                    agent_id,
                    attempts: attempt,
                    duration_ms: millis(started.elapsed()),
                    refused: attempt == 0,
                };
            }
            agent_id = Some(chosen.clone());

            debug!(
                execution_id = %execution_id,
                step_id = %step.id,
                agent_id = %chosen,
                attempt,
                "Dispatching step"
            );
            let call = self.registry.execute_agent(&chosen, input.clone(), &context);
            let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
                Ok(result) => result,
                Err(_) => Err(AttestorError::StepTimeout {
                    step_id: step.id.clone(),
                    timeout_ms,
                }),
            };

            match result {
                Err(err)
                    if self.config.retry.should_retry(&err, attempt)
                        && !self.is_cancelled(execution_id) =>
                {
                    let mut record = StepError::new(&step.id, &err, attempt);
                    record.agent_id.get_or_insert_with(|| chosen.clone());
                    self.with_execution(execution_id, |exec| {
                        exec.record_error(record);
                        exec.metrics.retries += 1;
                    });
                    self.registry.monitor().record_retry(&chosen);
                    attempt += 1;
                    warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        error = %err,
                        "Retrying step"
                    );
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                output => {
                    return StepOutcome {
                        output,
                        agent_id,
                        attempts: attempt + 1,
                        duration_ms: millis(started.elapsed()),
                        refused: false,
                    }
                }
            }
        }
    }

    /// The first matching agent that accepts work, else the first match.
    fn select_agent(&self, project_id: &str, capability: CapabilityName) -> AttestorResult<AgentId> {
        let candidates = self.registry.discover(
            &DiscoveryQuery::new()
                .with_project(project_id)
                .with_capability(capability),
        );
        candidates
            .iter()
            .find(|handle| handle.status.accepts_work())
            .or_else(|| candidates.first())
            .map(|handle| handle.id.clone())
            .ok_or_else(|| AttestorError::NoAgentAvailable {
                capability: capability.to_string(),
                project_id: project_id.to_string(),
            })
    }

    /// Record a step outcome. Returns the abort when a required step failed
    /// in a fail-fast workflow.
    fn apply_outcome(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        step: &StepDefinition,
        outcome: StepOutcome,
    ) -> Option<Abort> {
        if outcome.refused {
            return None;
        }
        let duration_ms = outcome.duration_ms;
        match outcome.output {
            Ok(output) => {
                let accepted = self
                    .with_execution(execution_id, |exec| {
                        exec.finish_step(&step.id, Ok(output), duration_ms)
                    })
                    .unwrap_or(false);
                info!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    agent_id = outcome.agent_id.as_deref().unwrap_or(""),
                    duration_ms,
                    accepted,
                    "Step succeeded"
                );
                None
            }
            Err(err) => {
                let mut record = StepError::new(&step.id, &err, outcome.attempts.saturating_sub(1));
                if record.agent_id.is_none() {
                    record.agent_id = outcome.agent_id.clone();
                }
                self.with_execution(execution_id, |exec| {
                    exec.finish_step(&step.id, Err(record), duration_ms)
                });
                error!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    required = step.required,
                    error = %err,
                    "Step failed"
                );
                (definition.error_handling == ErrorHandling::FailFast && step.required).then(|| {
                    Abort {
                        step_id: step.id.clone(),
                        error: err,
                    }
                })
            }
        }
    }

    fn abort_pending(&self, execution_id: Uuid, abort: &Abort) {
        warn!(
            execution_id = %execution_id,
            step_id = %abort.step_id,
            "Fail-fast abort; cancelling undispatched steps"
        );
        self.with_execution(execution_id, WorkflowExecution::cancel_pending_steps);
    }

    fn skip(&self, execution_id: Uuid, step: &StepDefinition) {
        debug!(execution_id = %execution_id, step_id = %step.id, "Skipping step");
        self.with_execution(execution_id, |exec| {
            exec.close_step(&step.id, StepStatus::Skipped)
        });
    }

    fn dependency_state(&self, execution_id: Uuid, step: &StepDefinition) -> DependencyState {
        let executions = self.executions.read();
        let Some(exec) = executions.get(&execution_id) else {
            return DependencyState::Blocked;
        };
        let mut state = DependencyState::Ready;
        for dep in &step.depends_on {
            match exec.step(dep) {
                Some(StepStatus::Succeeded) => {}
                Some(StepStatus::Pending | StepStatus::Running) => state = DependencyState::Waiting,
                _ => return DependencyState::Blocked,
            }
        }
        state
    }

    /// Context snapshot and agent input for a step about to launch.
    fn step_inputs(
        &self,
        execution_id: Uuid,
        step: &StepDefinition,
    ) -> Option<(ExecutionContext, Value)> {
        self.executions
            .read()
            .get(&execution_id)
            .map(|exec| (exec.context.clone(), step.build_input(&exec.initial_input)))
    }

    fn is_cancelled(&self, execution_id: Uuid) -> bool {
        self.executions
            .read()
            .get(&execution_id)
            .map_or(true, |exec| exec.status == ExecutionStatus::Cancelled)
    }

    fn with_execution<R>(
        &self,
        execution_id: Uuid,
        f: impl FnOnce(&mut WorkflowExecution) -> R,
    ) -> Option<R> {
        self.executions.write().get_mut(&execution_id).map(f)
    }

    fn archive(&self, execution_id: Uuid) {
        let mut history = self.history.lock();
        history.retain(|id| *id != execution_id);
        history.push_front(execution_id);
        history.truncate(self.config.history_limit);
    }

    // --- control ----------------------------------------------------------

    pub fn get_execution_status(&self, execution_id: Uuid) -> AttestorResult<WorkflowExecution> {
        self.executions
            .read()
            .get(&execution_id)
            .cloned()
            .ok_or(AttestorError::ExecutionNotFound(execution_id))
    }

    /// Cancel a running execution. Steps not yet dispatched are cancelled;
    /// steps already running finish but their outputs are dropped.
    pub fn cancel_workflow(&self, execution_id: Uuid) -> AttestorResult<WorkflowExecution> {
        let snapshot = {
            let mut executions = self.executions.write();
            let exec = executions
                .get_mut(&execution_id)
                .ok_or(AttestorError::ExecutionNotFound(execution_id))?;
            if exec.status.is_terminal() {
                return Err(AttestorError::AlreadyTerminal {
                    execution_id,
                    status: exec.status.to_string(),
                });
            }
            exec.status = ExecutionStatus::Cancelled;
            exec.end_time = Some(chrono::Utc::now());
            exec.cancel_pending_steps();
            exec.clone()
        };
        self.archive(execution_id);
        info!(
            execution_id = %execution_id,
            workflow_id = %snapshot.workflow_id,
            "Workflow execution cancel requested"
        );
        Ok(snapshot)
    }

    /// Re-run the failed, skipped, and never-dispatched steps of a failed
    /// execution. Steps that succeeded keep their results.
    pub async fn recover_workflow(
        &self,
        execution_id: Uuid,
        options: RecoveryOptions,
    ) -> AttestorResult<WorkflowResult> {
        self.ensure_accepting()?;
        let (definition, rerun) = {
            let mut executions = self.executions.write();
            let exec = executions
                .get_mut(&execution_id)
                .ok_or(AttestorError::ExecutionNotFound(execution_id))?;
            if exec.status != ExecutionStatus::Failed {
                return Err(AttestorError::Validation(format!(
                    "execution {execution_id} is {}; only failed executions can be recovered",
                    exec.status
                )));
            }
            if !options.retry_failed_steps {
                return Ok(exec.to_result());
            }
            let definition = self.definition(&exec.workflow_id)?;
            (definition, exec.reopen())
        };

        info!(
            execution_id = %execution_id,
            workflow_id = %definition.id,
            steps = rerun.len(),
            "Recovering workflow execution"
        );
        let only: HashSet<String> = rerun.into_iter().collect();
        let outcome = self.drive(execution_id, &definition, Some(&only)).await;
        self.conclude(execution_id, &definition, outcome)
    }

    /// Every execution the orchestrator knows about, oldest first,
    /// optionally filtered by status.
    pub fn list_executions(&self, status: Option<ExecutionStatus>) -> Vec<WorkflowExecution> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .read()
            .values()
            .filter(|exec| status.map_or(true, |wanted| exec.status == wanted))
            .cloned()
            .collect();
        executions.sort_by_key(|exec| exec.start_time);
        executions
    }

    /// Finished executions, most recent first.
    pub fn get_execution_history(&self, limit: Option<usize>) -> Vec<WorkflowExecution> {
        let ids: Vec<Uuid> = {
            let history = self.history.lock();
            history
                .iter()
                .take(limit.unwrap_or(usize::MAX))
                .copied()
                .collect()
        };
        let executions = self.executions.read();
        ids.iter()
            .filter_map(|id| executions.get(id).cloned())
            .collect()
    }

    pub fn get_metrics(&self) -> OrchestratorMetrics {
        OrchestratorMetrics::from_executions(self.executions.read().values())
    }

    /// Stop accepting executions and cancel those still running.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let running: Vec<Uuid> = self
            .executions
            .read()
            .values()
            .filter(|exec| !exec.status.is_terminal())
            .map(|exec| exec.id)
            .collect();
        for id in &running {
            if let Err(err) = self.cancel_workflow(*id) {
                debug!(execution_id = %id, error = %err, "Execution finished during shutdown");
            }
        }
        info!(cancelled = running.len(), "Workflow orchestrator shut down");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl HealthCheckable for WorkflowOrchestrator {
    fn component(&self) -> String {
        "workflow-orchestrator".into()
    }

    async fn health_check(&self) -> HealthReport {
        if self.ensure_accepting().is_err() {
            return HealthReport::unhealthy("workflow orchestrator is shut down");
        }
        let metrics = self.get_metrics();
        HealthReport::new(
            attestor_core::HealthStatus::Healthy,
            Some(format!(
                "{} workflows, {} running executions",
                self.workflows.read().len(),
                metrics.running
            )),
        )
    }
}
