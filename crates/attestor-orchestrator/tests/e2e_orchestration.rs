//! End-to-end orchestration tests.
//!
//! Drives complete workflows through an `OrchestrationContext`: the built-in
//! compliance team on a realistic project, plus scripted agents for the
//! parallel, cancellation, and recovery paths.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use attestor_agents::{Agent, AgentKind, AgentMetadata, Capability, CapabilityName};
use attestor_core::{AttestorError, AttestorResult, ExecutionContext, HealthStatus};
use attestor_orchestrator::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Scripted agent: one capability, optional delay, fails its first N calls
// ---------------------------------------------------------------------------

struct ScriptedAgent {
    metadata: AgentMetadata,
    delay: Duration,
    fail_first: u32,
    calls: AtomicU32,
}

impl ScriptedAgent {
    fn new(id: &str, project: &str, capability: CapabilityName) -> Self {
        Self {
            metadata: AgentMetadata {
                capabilities: vec![Capability::new(capability)],
                ..AgentMetadata::new(id, id, AgentKind::Grader)
            }
            .with_tags([project_tag(project), TEST_AGENT_TAG.to_string()]),
            delay: Duration::ZERO,
            fail_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    fn delayed(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    fn fail_first(mut self, times: u32) -> Self {
        self.fail_first = times;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn execute(&self, _input: Value, _ctx: &ExecutionContext) -> AttestorResult<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if call <= self.fail_first {
            return Err(AttestorError::Agent(format!(
                "{} failed on call {call}",
                self.metadata.id
            )));
        }
        Ok(json!({ format!("{}Call", self.metadata.id): call }))
    }
}

fn context() -> OrchestrationContext {
    let mut config = OrchestratorConfig::default();
    config.workflow.retry.backoff_step_ms = 5;
    OrchestrationContext::init(config).unwrap()
}

async fn register_all(ctx: &OrchestrationContext, agents: &[Arc<ScriptedAgent>]) {
    for agent in agents {
        ctx.registry()
            .register(Arc::clone(agent) as Arc<dyn Agent>)
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// 1. Project team lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_proj_42_team_create_discover_destroy() {
    let ctx = context();
    let ids = ctx
        .factory()
        .create_project_agent_team("proj-42")
        .await
        .unwrap();
    assert_eq!(ids.len(), 4);

    let query = DiscoveryQuery::new().with_project("proj-42");
    let handles = ctx.registry().discover(&query);
    assert_eq!(handles.len(), 4);
    let mut kinds: Vec<AgentKind> = handles.iter().map(|h| h.kind).collect();
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(
        kinds,
        vec![
            AgentKind::Classification,
            AgentKind::Grader,
            AgentKind::Ideation,
            AgentKind::Improvement
        ]
    );

    let health = ctx.registry().health_check(None).await.unwrap();
    assert!(health.values().all(|r| r.status == HealthStatus::Healthy));

    assert_eq!(
        ctx.factory()
            .destroy_project_agent_team("proj-42")
            .await
            .unwrap(),
        4
    );
    assert!(ctx.registry().discover(&query).is_empty());
    ctx.shutdown().await;
}

// ---------------------------------------------------------------------------
// 2. Built-in compliance assessment, end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_compliance_assessment_with_builtin_team() {
    let ctx = context();
    ctx.factory()
        .create_project_agent_team("proj-hr")
        .await
        .unwrap();

    let input = json!({
        "projectDescription": "CV screening model that ranks candidates for hiring decisions",
        "documentContent": "We keep an audit trail of every ranking. A recruiter reviews each \
                            shortlist before any decision is made.",
    });
    let result = ctx
        .orchestrator()
        .execute_workflow(
            "compliance-assessment",
            "proj-hr",
            ExecutionContext::new("proj-hr").with_user("auditor"),
            input,
        )
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert_eq!(result.summary.steps_executed, 4);
    assert_eq!(result.results["classify"]["riskLevel"], "high");
    assert!(!result.results["ideate"]["requirements"]
        .as_array()
        .unwrap()
        .is_empty());
    assert!(result.results["grade"]["score"].is_number());
    assert!(result.results["improve"]["suggestions"].is_array());

    let exec = ctx
        .orchestrator()
        .get_execution_status(result.execution_id)
        .unwrap();
    assert_eq!(exec.context.user_id.as_deref(), Some("auditor"));
    assert_eq!(exec.shared_state()["riskLevel"], "high");
    assert_eq!(exec.step_agents.len(), 4);

    let metrics = ctx.orchestrator().get_metrics();
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.success_rate, 1.0);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_missing_input_fails_fast_with_step_name() {
    let ctx = context();
    ctx.factory()
        .create_project_agent_team("proj-empty")
        .await
        .unwrap();

    let err = ctx
        .orchestrator()
        .execute_workflow(
            "compliance-assessment",
            "proj-empty",
            ExecutionContext::new("proj-empty"),
            json!({}),
        )
        .await
        .unwrap_err();
    match err {
        AttestorError::WorkflowExecution {
            step_id, source, ..
        } => {
            assert_eq!(step_id, "classify");
            assert!(source.to_string().contains("projectDescription"));
        }
        other => panic!("unexpected error: {other}"),
    }
    ctx.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. Parallel workflow collects every result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_parallel_independent_steps_both_complete() {
    let ctx = context();
    let slow = Arc::new(ScriptedAgent::new("slow", "proj-p", CapabilityName::Grading).delayed(60));
    let quick = Arc::new(ScriptedAgent::new("quick", "proj-p", CapabilityName::Ideation));
    register_all(&ctx, &[slow, quick]).await;

    ctx.orchestrator()
        .register_workflow(
            WorkflowDefinition::new("pair", "Pair", ExecutionMode::Parallel)
                .with_step(StepDefinition::new("grade", CapabilityName::Grading))
                .with_step(StepDefinition::new("ideate", CapabilityName::Ideation)),
        )
        .unwrap();

    let result = ctx
        .orchestrator()
        .execute_workflow("pair", "proj-p", ExecutionContext::new("proj-p"), json!({}))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert_eq!(result.results["grade"]["slowCall"], 1);
    assert_eq!(result.results["ideate"]["quickCall"], 1);
    ctx.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Cancellation stops undispatched steps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_stops_steps_not_yet_dispatched() {
    let ctx = context();
    let first = Arc::new(
        ScriptedAgent::new("first", "proj-c", CapabilityName::Classification).delayed(120),
    );
    let second = Arc::new(ScriptedAgent::new("second", "proj-c", CapabilityName::Grading));
    let third = Arc::new(ScriptedAgent::new("third", "proj-c", CapabilityName::Improvement));
    register_all(&ctx, &[first.clone(), second.clone(), third.clone()]).await;

    ctx.orchestrator()
        .register_workflow(
            WorkflowDefinition::new("tiers", "Tiers", ExecutionMode::Hybrid)
                .with_step(StepDefinition::new("first", CapabilityName::Classification))
                .with_step(StepDefinition::new("second", CapabilityName::Grading).depends_on(["first"]))
                .with_step(
                    StepDefinition::new("third", CapabilityName::Improvement).depends_on(["second"]),
                ),
        )
        .unwrap();

    let orchestrator = ctx.orchestrator().clone();
    let run = tokio::spawn(async move {
        orchestrator
            .execute_workflow("tiers", "proj-c", ExecutionContext::new("proj-c"), json!({}))
            .await
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    let active = ctx.orchestrator().list_executions(Some(ExecutionStatus::Running));
    assert_eq!(active.len(), 1);
    let execution_id = active[0].id;
    ctx.orchestrator().cancel_workflow(execution_id).unwrap();

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.status, ExecutionStatus::Cancelled);

    let exec = ctx
        .orchestrator()
        .get_execution_status(execution_id)
        .unwrap();
    // the dispatched step still reports, its output is dropped
    assert_eq!(exec.step("first"), Some(StepStatus::Cancelled));
    assert!(exec.results.is_empty());
    let summary = exec.to_result().summary;
    assert_eq!(summary.steps_executed, 0);
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(exec.step("second"), Some(StepStatus::Cancelled));
    assert_eq!(exec.step("third"), Some(StepStatus::Cancelled));
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
    assert_eq!(third.calls(), 0);
    ctx.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. Recovery re-runs only failed steps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_recovery_reruns_only_failed_steps() {
    let ctx = context();
    let project = "proj-r";
    let agents: HashMap<&str, Arc<ScriptedAgent>> = [
        ("a", CapabilityName::Classification, 0),
        ("b", CapabilityName::Ideation, 0),
        ("c", CapabilityName::Grading, 0),
        ("d", CapabilityName::Improvement, 1),
        ("e", CapabilityName::EvidenceReview, 1),
    ]
    .into_iter()
    .map(|(id, cap, fails)| {
        (
            id,
            Arc::new(ScriptedAgent::new(id, project, cap).fail_first(fails)),
        )
    })
    .collect();
    let all: Vec<Arc<ScriptedAgent>> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| Arc::clone(&agents[id]))
        .collect();
    register_all(&ctx, &all).await;

    let mut workflow = WorkflowDefinition::new("five", "Five", ExecutionMode::Parallel);
    for (id, cap) in [
        ("a", CapabilityName::Classification),
        ("b", CapabilityName::Ideation),
        ("c", CapabilityName::Grading),
        ("d", CapabilityName::Improvement),
        ("e", CapabilityName::EvidenceReview),
    ] {
        workflow = workflow.with_step(StepDefinition::new(id, cap));
    }
    ctx.orchestrator().register_workflow(workflow).unwrap();

    let first = ctx
        .orchestrator()
        .execute_workflow("five", project, ExecutionContext::new(project), json!({}))
        .await
        .unwrap();
    assert_eq!(first.status, ExecutionStatus::Failed);
    assert_eq!(first.metrics.steps_succeeded, 3);
    assert_eq!(first.metrics.steps_failed, 2);
    let kept: Vec<Value> = ["a", "b", "c"]
        .iter()
        .map(|s| first.results[*s].clone())
        .collect();

    let recovered = ctx
        .orchestrator()
        .recover_workflow(first.execution_id, RecoveryOptions::default())
        .await
        .unwrap();
    assert_eq!(recovered.status, ExecutionStatus::Succeeded);
    assert_eq!(recovered.execution_id, first.execution_id);

    for id in ["a", "b", "c"] {
        assert_eq!(agents[id].calls(), 1, "step {id} should not re-run");
    }
    for id in ["d", "e"] {
        assert_eq!(agents[id].calls(), 2, "step {id} should re-run once");
    }
    for (step, before) in ["a", "b", "c"].iter().zip(kept) {
        assert_eq!(recovered.results[*step], before);
    }
    assert_eq!(recovered.results["d"]["dCall"], 2);
    // both failures of the first run are still on record
    assert_eq!(recovered.errors.len(), 2);
    assert_eq!(ctx.orchestrator().get_metrics().total_recoveries, 1);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_recovery_of_unknown_or_succeeded_execution_is_rejected() {
    let ctx = context();
    let only = Arc::new(ScriptedAgent::new("only", "proj-ok", CapabilityName::Grading));
    register_all(&ctx, &[only]).await;
    ctx.orchestrator()
        .register_workflow(
            WorkflowDefinition::new("one", "One", ExecutionMode::Sequential)
                .with_step(StepDefinition::new("grade", CapabilityName::Grading)),
        )
        .unwrap();

    let done = ctx
        .orchestrator()
        .execute_workflow("one", "proj-ok", ExecutionContext::new("proj-ok"), json!({}))
        .await
        .unwrap();
    assert!(matches!(
        ctx.orchestrator()
            .recover_workflow(done.execution_id, RecoveryOptions::default())
            .await,
        Err(AttestorError::Validation(_))
    ));
    assert!(matches!(
        ctx.orchestrator()
            .recover_workflow(uuid::Uuid::new_v4(), RecoveryOptions::default())
            .await,
        Err(AttestorError::ExecutionNotFound(_))
    ));
    ctx.shutdown().await;
}
