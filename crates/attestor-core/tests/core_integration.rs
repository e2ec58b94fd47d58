#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use attestor_core::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// 1. ExecutionContext serialization roundtrip
// ---------------------------------------------------------------------------

#[test]
fn test_execution_context_roundtrip() {
    let mut ctx = ExecutionContext::new("proj-7")
        .with_user("auditor")
        .with_preference("language", json!("en"));
    ctx.conversation_history
        .push(ConversationTurn::user("Is our hiring model high risk?"));
    ctx.merge_output("classify", &json!({"riskLevel": "high"}));

    let text = serde_json::to_string(&ctx).unwrap();
    let parsed: ExecutionContext = serde_json::from_str(&text).unwrap();

    assert_eq!(parsed.project_id, "proj-7");
    assert_eq!(parsed.user_id.as_deref(), Some("auditor"));
    assert_eq!(parsed.session_id, ctx.session_id);
    assert_eq!(parsed.conversation_history.len(), 1);
    assert_eq!(parsed.state_str("riskLevel"), Some("high"));
    assert_eq!(parsed.preferences["language"], json!("en"));
}

#[test]
fn test_execution_context_accepts_minimal_json() {
    let parsed: ExecutionContext = serde_json::from_value(json!({
        "projectId": "p",
        "sessionId": "00000000-0000-0000-0000-000000000000"
    }))
    .unwrap();
    assert!(parsed.shared_state.is_empty());
    assert!(parsed.user_id.is_none());
}

// ---------------------------------------------------------------------------
// 2. Error classification as seen by an outer layer
// ---------------------------------------------------------------------------

#[test]
fn test_error_kinds_map_to_caller_categories() {
    let cases = vec![
        (AttestorError::Validation("bad".into()), ErrorKind::Validation),
        (AttestorError::AgentNotFound("x".into()), ErrorKind::NotFound),
        (
            AttestorError::AgentBusy {
                agent_id: "x".into(),
            },
            ErrorKind::Busy,
        ),
        (
            AttestorError::StepTimeout {
                step_id: "s".into(),
                timeout_ms: 5,
            },
            ErrorKind::Timeout,
        ),
        (
            AttestorError::ForcedShutdown {
                agent_id: "x".into(),
            },
            ErrorKind::ForcedShutdown,
        ),
        (
            AttestorError::Agent("boom".into()).in_agent("x", AGENT_EXECUTION),
            ErrorKind::Execution,
        ),
    ];
    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "unexpected kind for {err}");
    }
}

#[test]
fn test_workflow_error_exposes_inner_agent() {
    let inner = AttestorError::Agent("bad rubric".into()).in_agent("grader-9", AGENT_EXECUTION);
    let err = AttestorError::WorkflowExecution {
        execution_id: uuid::Uuid::new_v4(),
        step_id: "grade".into(),
        source: Box::new(inner),
    };
    assert_eq!(err.agent_id(), Some("grader-9"));
    assert!(std::error::Error::source(&err).is_some());
}

// ---------------------------------------------------------------------------
// 3. HealthCheckable trait objects aggregate uniformly
// ---------------------------------------------------------------------------

struct Fixed(&'static str, HealthReport);

#[async_trait]
impl HealthCheckable for Fixed {
    fn component(&self) -> String {
        self.0.to_string()
    }

    async fn health_check(&self) -> HealthReport {
        self.1.clone()
    }
}

#[tokio::test]
async fn test_heterogeneous_components_aggregate() {
    let components: Vec<Box<dyn HealthCheckable>> = vec![
        Box::new(Fixed("registry", HealthReport::healthy())),
        Box::new(Fixed("document-store", HealthReport::degraded("high latency"))),
    ];
    let mut reports = Vec::new();
    for c in &components {
        reports.push(c.health_check().await);
    }
    let overall = HealthReport::worst_of(&reports);
    assert_eq!(overall.status, HealthStatus::Degraded);
    assert_eq!(overall.detail.as_deref(), Some("high latency"));
}
