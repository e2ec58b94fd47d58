//! Rule-based implementations of the four compliance agents.
//!
//! They are deterministic so the orchestration core can run end to end
//! without a model provider. Each agent keeps a small amount of state
//! (invocation and failure counters) that feeds its health report.

mod catalog;
mod classification;
mod grader;
mod ideation;
mod improvement;

pub use catalog::{requirements_for, Requirement, RiskLevel};
pub use classification::ClassificationAgent;
pub use grader::GraderAgent;
pub use ideation::IdeationAgent;
pub use improvement::ImprovementAgent;

use crate::agent::{Agent, AgentKind, AgentMetadata};
use attestor_core::{AttestorResult, ExecutionContext, HealthReport};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Consecutive failures after which an agent reports itself degraded.
const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Build the built-in agent for `kind` from finished metadata.
pub fn build(kind: AgentKind, metadata: AgentMetadata) -> Arc<dyn Agent> {
    match kind {
        AgentKind::Classification => Arc::new(ClassificationAgent::new(metadata)),
        AgentKind::Ideation => Arc::new(IdeationAgent::new(metadata)),
        AgentKind::Grader => Arc::new(GraderAgent::new(metadata)),
        AgentKind::Improvement => Arc::new(ImprovementAgent::new(metadata)),
    }
}

/// Invocation counters shared by the built-in agents.
#[derive(Debug, Default)]
pub struct AgentStats {
    invocations: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl AgentStats {
    /// Record the outcome of one invocation and pass it through.
    pub fn record<T>(&self, result: AttestorResult<T>) -> AttestorResult<T> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(_) => self.consecutive_failures.store(0, Ordering::Relaxed),
            Err(_) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> HealthReport {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures >= DEGRADED_AFTER_FAILURES {
            HealthReport::degraded(format!("{failures} consecutive failed invocations"))
        } else {
            HealthReport::healthy()
        }
    }
}

/// Look up a string field in the call input first, then in shared state.
pub(crate) fn text_field<'a>(
    input: &'a Value,
    ctx: &'a ExecutionContext,
    key: &str,
) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .or_else(|| ctx.state_str(key))
        .filter(|s| !s.trim().is_empty())
}

/// Look up an arbitrary field in the call input first, then in shared state.
pub(crate) fn value_field<'a>(
    input: &'a Value,
    ctx: &'a ExecutionContext,
    key: &str,
) -> Option<&'a Value> {
    input.get(key).or_else(|| ctx.shared_state.get(key))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use attestor_core::{AttestorError, HealthStatus};
    use serde_json::json;

    #[test]
    fn test_stats_degrade_after_repeated_failures() {
        let stats = AgentStats::default();
        for _ in 0..DEGRADED_AFTER_FAILURES {
            let _ = stats.record::<()>(Err(AttestorError::Agent("x".into())));
        }
        assert_eq!(stats.health().status, HealthStatus::Degraded);
        let _ = stats.record(Ok(()));
        assert!(stats.health().is_healthy());
        assert_eq!(stats.invocations(), u64::from(DEGRADED_AFTER_FAILURES) + 1);
    }

    #[test]
    fn test_text_field_prefers_input() {
        let ctx = ExecutionContext::new("p").with_state("riskLevel", json!("limited"));
        let input = json!({"riskLevel": "high"});
        assert_eq!(text_field(&input, &ctx, "riskLevel"), Some("high"));
        assert_eq!(text_field(&json!({}), &ctx, "riskLevel"), Some("limited"));
        assert_eq!(text_field(&json!({"riskLevel": " "}), &ExecutionContext::new("p"), "riskLevel"), None);
    }

    #[test]
    fn test_build_matches_kind() {
        for kind in AgentKind::ALL {
            let agent = build(kind, AgentMetadata::new(format!("{kind}-1"), "x", kind));
            assert_eq!(agent.metadata().kind, kind);
        }
    }
}
