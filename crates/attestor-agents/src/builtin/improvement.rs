use super::{requirements_for, text_field, value_field, AgentStats, RiskLevel};
use crate::agent::{Agent, AgentMetadata};
use async_trait::async_trait;
use attestor_core::{AttestorResult, ExecutionContext, HealthReport};
use serde_json::{json, Value};

/// Turns grading gaps into an ordered remediation plan.
pub struct ImprovementAgent {
    metadata: AgentMetadata,
    stats: AgentStats,
}

impl ImprovementAgent {
    pub fn new(metadata: AgentMetadata) -> Self {
        Self {
            metadata,
            stats: AgentStats::default(),
        }
    }

    fn run(&self, input: &Value, ctx: &ExecutionContext) -> AttestorResult<Value> {
        let gaps: Vec<String> = match value_field(input, ctx, "gaps") {
            Some(raw) => serde_json::from_value(raw.clone())?,
            None => Vec::new(),
        };
        let level = match text_field(input, ctx, "riskLevel") {
            Some(raw) => raw.parse::<RiskLevel>()?,
            None => RiskLevel::Limited,
        };
        let priority = if level >= RiskLevel::High {
            "high"
        } else {
            "medium"
        };

        let catalog = requirements_for(level);
        let suggestions: Vec<Value> = gaps
            .iter()
            .map(|gap| {
                let title = catalog
                    .iter()
                    .find(|r| &r.id == gap)
                    .map(|r| r.title.clone())
                    .unwrap_or_else(|| gap.replace('-', " "));
                json!({
                    "requirement": gap,
                    "action": format!("Produce evidence for: {title}"),
                    "priority": priority,
                })
            })
            .collect();

        let summary = if suggestions.is_empty() {
            "No gaps found; keep evidence current.".to_string()
        } else {
            format!("{} remediation actions identified", suggestions.len())
        };

        Ok(json!({
            "suggestions": suggestions,
            "summary": summary,
        }))
    }
}

#[async_trait]
impl Agent for ImprovementAgent {
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

    fn agent() -> ImprovementAgent {
        ImprovementAgent::new(AgentMetadata::new("imp1", "Improver", AgentKind::Improvement))
    }

    #[tokio::test]
    async fn test_gaps_become_suggestions() {
        let ctx = ExecutionContext::new("p")
            .with_state("gaps", json!(["human-oversight", "custom-gap"]))
            .with_state("riskLevel", json!("high"));
        let out = agent().execute(json!({}), &ctx).await.unwrap();
        let suggestions = out["suggestions"].as_array().unwrap();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0]["priority"], "high");
        assert!(suggestions[0]["action"]
            .as_str()
            .unwrap()
            .contains("human oversight"));
        assert!(suggestions[1]["action"].as_str().unwrap().contains("custom gap"));
    }

    #[tokio::test]
    async fn test_no_gaps_is_a_clean_result() {
        let out = agent()
            .execute(json!({}), &ExecutionContext::new("p"))
            .await
            .unwrap();
        assert!(out["suggestions"].as_array().unwrap().is_empty());
    }
}
