use super::{text_field, AgentStats, RiskLevel};
use crate::agent::{Agent, AgentMetadata};
use async_trait::async_trait;
use attestor_core::{AttestorError, AttestorResult, ExecutionContext, HealthReport};
use serde_json::{json, Value};
use tracing::debug;

const UNACCEPTABLE: &[&str] = &[
    "social scoring",
    "subliminal",
    "exploit vulnerabilities",
    "real-time remote biometric",
];

const HIGH: &[&str] = &[
    "hiring",
    "recruitment",
    "employment",
    "credit scoring",
    "creditworthiness",
    "medical",
    "law enforcement",
    "border control",
    "education",
    "exam",
    "critical infrastructure",
    "biometric",
];

const LIMITED: &[&str] = &[
    "chatbot",
    "conversational",
    "deepfake",
    "emotion recognition",
    "generated content",
];

/// Assigns a risk level to a project from its description.
pub struct ClassificationAgent {
    metadata: AgentMetadata,
    stats: AgentStats,
}

impl ClassificationAgent {
    pub fn new(metadata: AgentMetadata) -> Self {
        Self {
            metadata,
            stats: AgentStats::default(),
        }
    }

    fn classify(description: &str) -> (RiskLevel, Vec<&'static str>) {
        let text = description.to_lowercase();
        for (level, indicators) in [
            (RiskLevel::Unacceptable, UNACCEPTABLE),
            (RiskLevel::High, HIGH),
            (RiskLevel::Limited, LIMITED),
        ] {
            let matched: Vec<&'static str> = indicators
                .iter()
                .copied()
                .filter(|i| text.contains(i))
                .collect();
            if !matched.is_empty() {
                return (level, matched);
            }
        }
        (RiskLevel::Minimal, Vec::new())
    }

    fn run(&self, input: &Value, ctx: &ExecutionContext) -> AttestorResult<Value> {
        let description = text_field(input, ctx, "projectDescription").ok_or_else(|| {
            AttestorError::Agent("classification requires a projectDescription".into())
        })?;
        let (level, matched) = Self::classify(description);
        // More matched indicators means a more confident call.
        let confidence = if matched.is_empty() {
            0.6
        } else {
            (0.7 + 0.1 * matched.len() as f64).min(0.95)
        };
        debug!(agent_id = %self.metadata.id, risk = level.as_str(), "Project classified");
        Ok(json!({
            "riskLevel": level.as_str(),
            "matchedIndicators": matched,
            "confidence": confidence,
        }))
    }
}

#[async_trait]
impl Agent for ClassificationAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> AttestorResult<Value> {
        self.stats.record(self.run(&input, ctx))
    }

    async fn health_check(&self) -> HealthReport {
        self.stats.health()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;

    fn agent() -> ClassificationAgent {
        ClassificationAgent::new(AgentMetadata::new(
            "classification-1",
            "Classifier",
            AgentKind::Classification,
        ))
    }

    #[tokio::test]
    async fn test_hiring_system_is_high_risk() {
        let out = agent()
            .execute(
                json!({"projectDescription": "CV screening for hiring decisions"}),
                &ExecutionContext::new("p1"),
            )
            .await
            .unwrap();
        assert_eq!(out["riskLevel"], "high");
        assert_eq!(out["matchedIndicators"][0], "hiring");
    }

    #[tokio::test]
    async fn test_chatbot_is_limited_and_reads_shared_state() {
        let ctx = ExecutionContext::new("p1")
            .with_state("projectDescription", json!("A customer support chatbot"));
        let out = agent().execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out["riskLevel"], "limited");
    }

    #[tokio::test]
    async fn test_plain_tool_is_minimal() {
        let out = agent()
            .execute(
                json!({"projectDescription": "Spam filter for a mailbox"}),
                &ExecutionContext::new("p1"),
            )
            .await
            .unwrap();
        assert_eq!(out["riskLevel"], "minimal");
    }

    #[tokio::test]
    async fn test_missing_description_fails() {
        let err = agent()
            .execute(json!({}), &ExecutionContext::new("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttestorError::Agent(_)));
    }
}
