use crate::config::{QueueConfig, RegistryConfig, RetryPolicy};
use crate::monitor::AgentMonitor;
use crate::task_queue::TaskQueue;
use crate::types::{AgentMetrics, TaskOptions, TaskSnapshot, TaskSpec, TaskStatus};
use async_trait::async_trait;
use attestor_agents::{Agent, AgentId, AgentKind, AgentMetadata, AgentStatus, CapabilityName};
use attestor_core::{
    AttestorError, AttestorResult, ExecutionContext, HealthCheckable, HealthReport, HealthStatus,
    AGENT_EXECUTION, TASK_EXECUTION,
};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tag marking agents that `clear_all_test_agents` may remove.
pub const TEST_AGENT_TAG: &str = "test";

/// Prefix of the tag that binds an agent to a project.
pub const PROJECT_TAG_PREFIX: &str = "project:";

/// The tag binding an agent to `project_id`.
///
/// Project tags carry their own prefix so that a project id never matches a
/// kind tag such as `grader` or a marker such as `team`.
pub fn project_tag(project_id: &str) -> String {
    format!("{PROJECT_TAG_PREFIX}{project_id}")
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct AgentSlot {
    agent: Arc<dyn Agent>,
    status: watch::Sender<AgentStatus>,
    /// Status to restore when the in-flight invocation ends.
    resting: AgentStatus,
    sequence: u64,
    /// Set by `unregister`; no new work is admitted.
    draining: bool,
    current_task: Option<Uuid>,
    last_health: Option<HealthReport>,
}

impl AgentSlot {
    fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    fn set_status(&self, next: AgentStatus) {
        self.status.send_replace(next);
    }

    fn handle(&self) -> AgentHandle {
        let meta = self.agent.metadata();
        AgentHandle {
            id: meta.id.clone(),
            name: meta.name.clone(),
            kind: meta.kind,
            capabilities: meta.capabilities.iter().map(|c| c.name).collect(),
            tags: meta.tags.clone(),
            status: self.status(),
            current_task: self.current_task,
            last_health: self.last_health.clone(),
        }
    }
}

/// Read-only view of a registered agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHandle {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentKind,
    pub capabilities: Vec<CapabilityName>,
    pub tags: BTreeSet<String>,
    pub status: AgentStatus,
    pub current_task: Option<Uuid>,
    pub last_health: Option<HealthReport>,
}

/// Filter for `AgentRegistry::discover`. An agent matches when it carries
/// every tag and every capability listed; an empty query matches all agents.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryQuery {
    pub tags: Vec<String>,
    pub capabilities: Vec<CapabilityName>,
}

impl DiscoveryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Restrict to agents bound to `project_id`.
    pub fn with_project(self, project_id: &str) -> Self {
        self.with_tag(project_tag(project_id))
    }

    pub fn with_capability(mut self, capability: CapabilityName) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn matches(&self, metadata: &AgentMetadata) -> bool {
        metadata.has_all_tags(&self.tags) && metadata.has_all_capabilities(&self.capabilities)
    }
}

/// Counts reported by `AgentRegistry::get_system_status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStatus {
    pub total_agents: usize,
    pub initializing: usize,
    pub ready: usize,
    pub busy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub queued_tasks: usize,
    pub waiting_tasks: usize,
    pub running_tasks: usize,
    pub succeeded_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub metrics: AgentMetrics,
}

struct RegistryInner {
    agents: RwLock<HashMap<AgentId, AgentSlot>>,
    queue: Mutex<TaskQueue>,
    monitor: AgentMonitor,
    config: RegistryConfig,
    queue_config: QueueConfig,
    next_sequence: AtomicU64,
    accepting: AtomicBool,
    wake: Arc<Notify>,
    /// Bumped on every task state change; waiters re-read the queue.
    task_events: watch::Sender<u64>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

/// Exclusive right to run one invocation on an agent.
///
/// Dropping the lease returns the agent to its resting status and wakes the
/// dispatcher.
struct Lease {
    registry: AgentRegistry,
    agent: Arc<dyn Agent>,
    agent_id: AgentId,
    sequence: u64,
    status_rx: watch::Receiver<AgentStatus>,
    started: Instant,
    success: bool,
}

impl Lease {
    /// Run the agent until it returns or the agent is forcibly stopped.
    async fn run(&mut self, input: Value, ctx: &ExecutionContext) -> AttestorResult<Value> {
        let agent = Arc::clone(&self.agent);
        let agent_id = self.agent_id.clone();
        let result = tokio::select! {
            result = agent.execute(input, ctx) => result,
            _ = wait_status(&mut self.status_rx, |s| s == AgentStatus::Stopped) => {
                Err(AttestorError::ForcedShutdown { agent_id })
            }
        };
        self.success = result.is_ok();
        result
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.inner.monitor.finish(
            &self.agent_id,
            millis(self.started.elapsed()),
            self.success,
        );
        self.registry.release(&self.agent_id, self.sequence);
    }
}

/// Resolve once the watched status satisfies `done` or the slot is gone.
async fn wait_status(
    rx: &mut watch::Receiver<AgentStatus>,
    done: impl Fn(AgentStatus) -> bool,
) {
    loop {
        if done(*rx.borrow_and_update()) {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct TaskWork {
    input: Value,
    context: ExecutionContext,
    timeout: Option<Duration>,
}

/// Owns every live agent and the task queue that feeds them.
///
/// At most one invocation runs per agent at any time. Direct calls fail fast
/// with `AgentBusy`; queued tasks wait for the agent to become free.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    pub fn new(config: RegistryConfig, queue_config: QueueConfig) -> Self {
        let (task_events, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(RegistryInner {
                agents: RwLock::new(HashMap::new()),
                queue: Mutex::new(TaskQueue::new()),
                monitor: AgentMonitor::new(),
                config,
                queue_config,
                next_sequence: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
                wake: Arc::new(Notify::new()),
                task_events,
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn monitor(&self) -> &AgentMonitor {
        &self.inner.monitor
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_accepting(&self) -> AttestorResult<()> {
        if self.inner.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AttestorError::Orchestrator(
                "agent registry is shut down".into(),
            ))
        }
    }

    /// Start the background dispatcher. Returns false outside a Tokio runtime.
    ///
    /// Queueing a task starts the dispatcher on demand, so calling this is
    /// only needed to pick up tasks queued before a runtime existed.
    pub fn start(&self) -> bool {
        let started = self.ensure_dispatcher();
        self.inner.wake.notify_one();
        started
    }

    fn ensure_dispatcher(&self) -> bool {
        let mut slot = self.inner.dispatcher.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; queued tasks will wait until the registry is started");
            return false;
        };
        let weak = Arc::downgrade(&self.inner);
        let wake = Arc::clone(&self.inner.wake);
        *slot = Some(runtime.spawn(dispatch_loop(weak, wake)));
        debug!("Task dispatcher started");
        true
    }

    fn notify_task_change(&self) {
        self.inner
            .task_events
            .send_modify(|n| *n = n.wrapping_add(1));
    }

    // --- registration -----------------------------------------------------

    /// Register an agent and run its initial health check.
    ///
    /// The agent starts `Initializing` and moves to the status implied by the
    /// check (healthy agents become `Ready`).
    pub async fn register(&self, agent: Arc<dyn Agent>) -> AttestorResult<AgentId> {
        self.ensure_accepting()?;
        let metadata = agent.metadata();
        metadata.validate()?;
        let id = metadata.id.clone();
        let kind = metadata.kind;
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst);
        {
            let mut agents = self.inner.agents.write();
            if agents.contains_key(&id) {
                return Err(AttestorError::Validation(format!(
                    "agent {id} is already registered"
                )));
            }
            let (status, _) = watch::channel(AgentStatus::Initializing);
            agents.insert(
                id.clone(),
                AgentSlot {
                    agent: Arc::clone(&agent),
                    status,
                    resting: AgentStatus::Initializing,
                    sequence,
                    draining: false,
                    current_task: None,
                    last_health: None,
                },
            );
        }
        self.inner.monitor.register(&id);

        let report = self.probe(agent).await;
        self.apply_health(&id, &report);
        let status = self.get(&id).map_or(AgentStatus::Stopped, |h| h.status);
        info!(agent_id = %id, kind = %kind, status = %status, "Agent registered");
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Remove an agent, waiting up to the shutdown timeout for its in-flight
    /// invocation. On timeout the agent is removed anyway and the in-flight
    /// task fails with `ForcedShutdown`. Unstarted tasks targeting the agent
    /// fail with `AgentNotFound`.
    pub async fn unregister(&self, agent_id: &str) -> AttestorResult<()> {
        let mut status_rx = {
            let mut agents = self.inner.agents.write();
            let slot = agents
                .get_mut(agent_id)
                .ok_or_else(|| AttestorError::AgentNotFound(agent_id.to_string()))?;
            slot.draining = true;
            slot.status.subscribe()
        };

        let limit = self.inner.config.shutdown_timeout();
        let drained = tokio::time::timeout(
            limit,
            wait_status(&mut status_rx, |s| s != AgentStatus::Busy),
        )
        .await
        .is_ok();
        if !drained {
            warn!(
                agent_id = %agent_id,
                timeout_ms = millis(limit),
                "Agent still busy after shutdown timeout; forcing removal"
            );
        }

        let removed = self.inner.agents.write().remove(agent_id);
        if let Some(slot) = removed {
            self.finish_removal(agent_id, slot);
        }
        Ok(())
    }

    fn finish_removal(&self, agent_id: &str, slot: AgentSlot) {
        let in_flight = if slot.status() == AgentStatus::Busy {
            slot.current_task
        } else {
            None
        };
        slot.set_status(AgentStatus::Stopped);
        drop(slot);
        self.inner.monitor.remove(agent_id);

        let touched = {
            let mut queue = self.inner.queue.lock();
            let mut touched = Vec::new();
            if let Some(task_id) = in_flight {
                touched.push(task_id);
                touched.extend(queue.fail(
                    task_id,
                    AttestorError::ForcedShutdown {
                        agent_id: agent_id.to_string(),
                    },
                ));
            }
            touched.extend(
                queue.fail_for_agent(agent_id, &AttestorError::AgentNotFound(agent_id.to_string())),
            );
            touched
        };
        if !touched.is_empty() {
            self.notify_task_change();
        }
        info!(
            agent_id = %agent_id,
            forced_task = ?in_flight,
            failed_tasks = touched.len(),
            "Agent unregistered"
        );
        self.inner.wake.notify_one();
    }

    /// Force-remove every agent tagged `test`. Returns how many were removed.
    pub fn clear_all_test_agents(&self) -> usize {
        let removed: Vec<(AgentId, AgentSlot)> = {
            let mut agents = self.inner.agents.write();
            let ids: Vec<AgentId> = agents
                .iter()
                .filter(|(_, slot)| slot.agent.metadata().tags.contains(TEST_AGENT_TAG))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| agents.remove(&id).map(|slot| (id, slot)))
                .collect()
        };
        let count = removed.len();
        for (id, slot) in removed {
            self.finish_removal(&id, slot);
        }
        info!(count, "Test agents cleared");
        count
    }

    // --- lookup -----------------------------------------------------------

    pub fn get(&self, agent_id: &str) -> Option<AgentHandle> {
        self.inner.agents.read().get(agent_id).map(AgentSlot::handle)
    }

    /// Agents matching `query`, in registration order.
    pub fn discover(&self, query: &DiscoveryQuery) -> Vec<AgentHandle> {
        let agents = self.inner.agents.read();
        let mut found: Vec<(u64, AgentHandle)> = agents
            .values()
            .filter(|slot| query.matches(slot.agent.metadata()))
            .map(|slot| (slot.sequence, slot.handle()))
            .collect();
        found.sort_by_key(|(sequence, _)| *sequence);
        found.into_iter().map(|(_, handle)| handle).collect()
    }

    // --- execution --------------------------------------------------------

    fn try_acquire(&self, agent_id: &str, task_id: Option<Uuid>) -> AttestorResult<Lease> {
        let (agent, sequence, status_rx) = {
            let mut agents = self.inner.agents.write();
            let slot = agents
                .get_mut(agent_id)
                .ok_or_else(|| AttestorError::AgentNotFound(agent_id.to_string()))?;
            let status = slot.status();
            if status == AgentStatus::Busy {
                return Err(AttestorError::AgentBusy {
                    agent_id: agent_id.to_string(),
                });
            }
            if slot.draining {
                return Err(AttestorError::AgentUnhealthy {
                    agent_id: agent_id.to_string(),
                    status: "draining".into(),
                });
            }
            if !status.accepts_work() {
                return Err(AttestorError::AgentUnhealthy {
                    agent_id: agent_id.to_string(),
                    status: status.to_string(),
                });
            }
            slot.resting = status;
            slot.current_task = task_id;
            slot.set_status(AgentStatus::Busy);
            (Arc::clone(&slot.agent), slot.sequence, slot.status.subscribe())
        };
        self.inner.monitor.start(agent_id, task_id);
        Ok(Lease {
            registry: self.clone(),
            agent,
            agent_id: agent_id.to_string(),
            sequence,
            status_rx,
            started: Instant::now(),
            success: false,
        })
    }

    fn release(&self, agent_id: &str, sequence: u64) {
        {
            let mut agents = self.inner.agents.write();
            if let Some(slot) = agents.get_mut(agent_id) {
                if slot.sequence == sequence && slot.status() == AgentStatus::Busy {
                    slot.current_task = None;
                    slot.set_status(slot.resting);
                }
            }
        }
        self.inner.wake.notify_one();
    }

    /// Invoke an agent directly.
    ///
    /// Fails with `AgentBusy` when the agent is already executing. Every
    /// failure, including busy, missing, and unavailable agents, is wrapped
    /// with the agent id and `agent_execution`.
    pub async fn execute_agent(
        &self,
        agent_id: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> AttestorResult<Value> {
        let mut lease = self
            .try_acquire(agent_id, None)
            .map_err(|err| err.in_agent(agent_id, AGENT_EXECUTION))?;
        debug!(agent_id = %agent_id, "Executing agent");
        let result = lease.run(input, ctx).await;
        drop(lease);
        result.map_err(|err| {
            warn!(agent_id = %agent_id, error = %err, "Agent execution failed");
            err.in_agent(agent_id, AGENT_EXECUTION)
        })
    }

    /// `execute_agent`, retrying busy (and optionally timed out) attempts
    /// with linear backoff.
    pub async fn execute_agent_with_retry(
        &self,
        agent_id: &str,
        input: Value,
        ctx: &ExecutionContext,
        policy: &RetryPolicy,
    ) -> AttestorResult<Value> {
        let mut attempt = 0;
        loop {
            match self.execute_agent(agent_id, input.clone(), ctx).await {
                Err(err) if policy.should_retry(&err, attempt) => {
                    attempt += 1;
                    self.inner.monitor.record_retry(agent_id);
                    debug!(agent_id = %agent_id, attempt, error = %err, "Retrying agent execution");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    // --- task queue -------------------------------------------------------

    /// Queue a task for an agent. Returns immediately with the task id.
    ///
    /// The task runs once all its dependencies have succeeded and the agent
    /// is free. Unknown dependencies and cycles are rejected here.
    pub fn queue_task(
        &self,
        agent_id: &str,
        input: Value,
        options: TaskOptions,
    ) -> AttestorResult<Uuid> {
        let ids = self.queue_batch(vec![TaskSpec::new(agent_id, input, options)])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| AttestorError::Orchestrator("task batch was empty".into()))
    }

    /// Queue several tasks atomically. Tasks may reference each other's
    /// pre-assigned ids as dependencies.
    pub fn queue_batch(&self, mut specs: Vec<TaskSpec>) -> AttestorResult<Vec<Uuid>> {
        self.ensure_accepting()?;
        {
            let agents = self.inner.agents.read();
            if let Some(missing) = specs.iter().find(|s| !agents.contains_key(&s.agent_id)) {
                return Err(AttestorError::AgentNotFound(missing.agent_id.clone()));
            }
        }
        if let Some(ms) = self.inner.queue_config.default_task_timeout_ms {
            for spec in specs.iter_mut().filter(|s| s.timeout.is_none()) {
                spec.timeout = Some(Duration::from_millis(ms));
            }
        }

        let ids = self.inner.queue.lock().enqueue_batch(specs)?;
        for id in &ids {
            debug!(task_id = %id, "Task queued");
        }
        self.notify_task_change();
        self.ensure_dispatcher();
        self.inner.wake.notify_one();
        Ok(ids)
    }

    /// Cancel a task that has not started, and its dependents.
    pub fn cancel_task(&self, task_id: Uuid) -> AttestorResult<Vec<Uuid>> {
        let cancelled = self
            .inner
            .queue
            .lock()
            .cancel(task_id, "cancelled by caller")?;
        info!(task_id = %task_id, cancelled = cancelled.len(), "Task cancelled");
        self.prune_finished_tasks();
        self.notify_task_change();
        Ok(cancelled)
    }

    pub fn get_task_status(&self, task_id: Uuid) -> AttestorResult<TaskSnapshot> {
        self.inner
            .queue
            .lock()
            .snapshot(task_id)
            .ok_or(AttestorError::TaskNotFound(task_id))
    }

    /// All tasks in enqueue order.
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.inner
            .queue
            .lock()
            .all_tasks()
            .into_iter()
            .map(|t| t.snapshot())
            .collect()
    }

    /// Wait until a task reaches a terminal status.
    pub async fn wait_for_task(&self, task_id: Uuid, limit: Duration) -> AttestorResult<TaskSnapshot> {
        let mut events = self.inner.task_events.subscribe();
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let snapshot = self.get_task_status(task_id)?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            match tokio::time::timeout_at(deadline, events.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(AttestorError::Orchestrator(
                        "task event channel closed".into(),
                    ))
                }
                Err(_) => {
                    return Err(AttestorError::Timeout {
                        operation: format!("waiting for task {task_id}"),
                        timeout_ms: millis(limit),
                    })
                }
            }
        }
    }

    /// Start every dispatchable task whose agent is free.
    fn dispatch_ready(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut changed = false;
        let mut queue = self.inner.queue.lock();
        let candidates: Vec<(Uuid, AgentId)> = queue
            .dispatchable()
            .iter()
            .map(|t| (t.id, t.agent_id.clone()))
            .collect();

        for (task_id, agent_id) in candidates {
            match self.try_acquire(&agent_id, Some(task_id)) {
                Ok(lease) => {
                    let Some(task) = queue.mark_running(task_id) else {
                        continue;
                    };
                    let work = TaskWork {
                        input: task.input.clone(),
                        context: task.context.clone(),
                        timeout: task.timeout,
                    };
                    info!(
                        task_id = %task_id,
                        agent_id = %agent_id,
                        priority = %task.priority,
                        "Task dispatched"
                    );
                    changed = true;
                    runtime.spawn(self.clone().run_task(task_id, lease, work));
                }
                Err(AttestorError::AgentNotFound(_)) => {
                    queue.fail(task_id, AttestorError::AgentNotFound(agent_id.clone()));
                    changed = true;
                }
                // Busy or not accepting work: stays queued.
                Err(_) => {}
            }
        }
        drop(queue);
        if changed {
            self.notify_task_change();
        }
    }

    async fn run_task(self, task_id: Uuid, mut lease: Lease, work: TaskWork) {
        let agent_id = lease.agent_id.clone();
        let started = Instant::now();
        let outcome = match work.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, lease.run(work.input, &work.context)).await {
                    Ok(result) => result,
                    Err(_) => Err(AttestorError::Timeout {
                        operation: format!("task {task_id}"),
                        timeout_ms: millis(limit),
                    }),
                }
            }
            None => lease.run(work.input, &work.context).await,
        };
        let outcome = outcome.map_err(|err| err.in_agent(agent_id.clone(), TASK_EXECUTION));
        match &outcome {
            Ok(_) => info!(
                task_id = %task_id,
                agent_id = %agent_id,
                duration_ms = millis(started.elapsed()),
                "Task succeeded"
            ),
            Err(err) => error!(task_id = %task_id, agent_id = %agent_id, error = %err, "Task failed"),
        }

        let cancelled = self.inner.queue.lock().complete(task_id, outcome);
        if !cancelled.is_empty() {
            warn!(task_id = %task_id, cancelled = cancelled.len(), "Dependent tasks cancelled");
        }
        drop(lease);
        self.prune_finished_tasks();
        self.notify_task_change();
    }

    /// Drop the oldest finished tasks beyond the configured retention.
    /// Returns how many were removed.
    pub fn prune_finished_tasks(&self) -> usize {
        let keep = self.inner.queue_config.finished_task_retention;
        let removed = self.inner.queue.lock().prune_finished(keep);
        if !removed.is_empty() {
            debug!(removed = removed.len(), keep, "Finished tasks pruned");
        }
        removed.len()
    }

    // --- health & status --------------------------------------------------

    async fn probe(&self, agent: Arc<dyn Agent>) -> HealthReport {
        let limit = self.inner.config.health_check_timeout();
        let check = tokio::spawn(async move { agent.health_check().await });
        let abort = check.abort_handle();
        match tokio::time::timeout(limit, check).await {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => HealthReport::unhealthy(format!("health check panicked: {err}")),
            Err(_) => {
                abort.abort();
                HealthReport::unhealthy(format!(
                    "health check timed out after {}ms",
                    millis(limit)
                ))
            }
        }
    }

    fn apply_health(&self, agent_id: &str, report: &HealthReport) {
        let mut agents = self.inner.agents.write();
        let Some(slot) = agents.get_mut(agent_id) else {
            return;
        };
        let next = AgentStatus::from(report.status);
        slot.last_health = Some(report.clone());
        slot.resting = next;
        let current = slot.status();
        if current != AgentStatus::Busy && current != next && current.can_transition_to(next) {
            slot.set_status(next);
            if next.accepts_work() {
                debug!(agent_id = %agent_id, from = %current, to = %next, "Agent accepts work again");
                self.inner.wake.notify_one();
            }
        }
    }

    /// Check one agent, or all of them concurrently.
    ///
    /// Every check is bounded by the health check timeout; a timeout or panic
    /// counts as unhealthy and never stops the other checks.
    pub async fn health_check(
        &self,
        agent_id: Option<&str>,
    ) -> AttestorResult<HashMap<AgentId, HealthReport>> {
        let targets: Vec<(AgentId, Arc<dyn Agent>)> = {
            let agents = self.inner.agents.read();
            match agent_id {
                Some(id) => {
                    let slot = agents
                        .get(id)
                        .ok_or_else(|| AttestorError::AgentNotFound(id.to_string()))?;
                    vec![(id.to_string(), Arc::clone(&slot.agent))]
                }
                None => agents
                    .iter()
                    .map(|(id, slot)| (id.clone(), Arc::clone(&slot.agent)))
                    .collect(),
            }
        };

        let checks = targets.into_iter().map(|(id, agent)| async move {
            let report = self.probe(agent).await;
            (id, report)
        });
        let reports = join_all(checks).await;

        for (id, report) in &reports {
            self.apply_health(id, report);
            if report.status != HealthStatus::Healthy {
                warn!(
                    agent_id = %id,
                    status = %report.status,
                    detail = report.detail.as_deref().unwrap_or(""),
                    "Agent health check not healthy"
                );
            }
        }
        Ok(reports.into_iter().collect())
    }

    pub fn get_system_status(&self) -> SystemStatus {
        let mut status = SystemStatus::default();
        {
            let agents = self.inner.agents.read();
            status.total_agents = agents.len();
            for slot in agents.values() {
                match slot.status() {
                    AgentStatus::Initializing => status.initializing += 1,
                    AgentStatus::Ready => status.ready += 1,
                    AgentStatus::Busy => status.busy += 1,
                    AgentStatus::Degraded => status.degraded += 1,
                    AgentStatus::Unhealthy => status.unhealthy += 1,
                    AgentStatus::Stopped => {}
                }
            }
        }
        {
            let queue = self.inner.queue.lock();
            status.queued_tasks = queue.count(TaskStatus::Queued);
            status.waiting_tasks = queue.count(TaskStatus::Waiting);
            status.running_tasks = queue.count(TaskStatus::Running);
            status.succeeded_tasks = queue.count(TaskStatus::Succeeded);
            status.failed_tasks = queue.count(TaskStatus::Failed);
            status.cancelled_tasks = queue.count(TaskStatus::Cancelled);
        }
        status.metrics = self.inner.monitor.aggregate_metrics();
        status
    }

    /// Stop accepting work, cancel unstarted tasks, and unregister every
    /// agent.
    pub async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let cancelled = self
            .inner
            .queue
            .lock()
            .cancel_pending("agent registry shutting down");
        if !cancelled.is_empty() {
            self.notify_task_change();
        }

        let ids: Vec<AgentId> = self.inner.agents.read().keys().cloned().collect();
        let results = join_all(ids.iter().map(|id| self.unregister(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(err) = result {
                debug!(agent_id = %id, error = %err, "Agent already gone during shutdown");
            }
        }

        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
        info!(
            agents = ids.len(),
            cancelled_tasks = cancelled.len(),
            "Agent registry shut down"
        );
    }
}

async fn dispatch_loop(registry: Weak<RegistryInner>, wake: Arc<Notify>) {
    loop {
        wake.notified().await;
        let Some(inner) = registry.upgrade() else {
            break;
        };
        AgentRegistry { inner }.dispatch_ready();
    }
}

#[async_trait]
impl HealthCheckable for AgentRegistry {
    fn component(&self) -> String {
        "agent-registry".into()
    }

    async fn health_check(&self) -> HealthReport {
        if self.ensure_accepting().is_err() {
            return HealthReport::unhealthy("agent registry is shut down");
        }
        match AgentRegistry::health_check(self, None).await {
            Ok(reports) if reports.is_empty() => {
                HealthReport::new(HealthStatus::Healthy, Some("no agents registered".into()))
            }
            Ok(reports) => HealthReport::worst_of(reports.values()),
            Err(err) => HealthReport::unhealthy(err.to_string()),
        }
    }
}
