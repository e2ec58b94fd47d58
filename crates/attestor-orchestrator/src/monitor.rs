use crate::types::{AgentMetrics, AgentState, WorkerStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Tracks activity and metrics for every registered agent.
///
/// Updates are synchronous so they can run from drop guards.
#[derive(Clone)]
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start tracking an agent.
    pub fn register(&self, agent_id: &str) {
        self.states
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState {
                agent_id: agent_id.to_string(),
                current_task: None,
                status: WorkerStatus::Idle,
                metrics: AgentMetrics::default(),
            });
    }

    pub fn remove(&self, agent_id: &str) {
        self.states.write().remove(agent_id);
    }

    /// Mark an agent as working, optionally on a queued task.
    pub fn start(&self, agent_id: &str, task_id: Option<Uuid>) {
        if let Some(state) = self.states.write().get_mut(agent_id) {
            state.current_task = task_id;
            state.status = WorkerStatus::Working;
        }
    }

    /// Record the end of an invocation.
    pub fn finish(&self, agent_id: &str, duration_ms: u64, success: bool) {
        if let Some(state) = self.states.write().get_mut(agent_id) {
            state.current_task = None;
            state.metrics.invocations += 1;
            state.metrics.duration_ms += duration_ms;
            if success {
                state.status = WorkerStatus::Idle;
            } else {
                state.metrics.errors += 1;
                state.status = WorkerStatus::Error;
            }
        }
    }

    pub fn record_retry(&self, agent_id: &str) {
        if let Some(state) = self.states.write().get_mut(agent_id) {
            state.metrics.retries += 1;
        }
    }

    /// Get a snapshot of all agent states, sorted by agent id.
    pub fn snapshot(&self) -> Vec<AgentState> {
        let mut states: Vec<AgentState> = self.states.read().values().cloned().collect();
        states.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        states
    }

    pub fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.states.read().get(agent_id).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read();
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.invocations += state.metrics.invocations;
            total.errors += state.metrics.errors;
            total.retries += state.metrics.retries;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.snapshot(),
            "aggregate": self.aggregate_metrics(),
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
