use super::{requirements_for, text_field, AgentStats, RiskLevel};
use crate::agent::{Agent, AgentMetadata};
use async_trait::async_trait;
use attestor_core::{AttestorResult, ExecutionContext, HealthReport};
use serde_json::{json, Value};

/// Derives the requirement set and first implementation ideas for a project.
pub struct IdeationAgent {
    metadata: AgentMetadata,
    stats: AgentStats,
}

impl IdeationAgent {
    pub fn new(metadata: AgentMetadata) -> Self {
        Self {
            metadata,
            stats: AgentStats::default(),
        }
    }

    fn run(&self, input: &Value, ctx: &ExecutionContext) -> AttestorResult<Value> {
        // Without a classification the agent plans for the strictest tier
        // short of prohibition.
        let level = match text_field(input, ctx, "riskLevel") {
            Some(raw) => raw.parse::<RiskLevel>()?,
            None => RiskLevel::High,
        };
        let max_ideas = self.metadata.config_u64("maxIdeas").unwrap_or(10) as usize;

        let requirements = requirements_for(level);
        let ideas: Vec<Value> = requirements
            .iter()
            .take(max_ideas)
            .map(|r| {
                json!({
                    "requirement": r.id,
                    "idea": format!("{} by documenting {}", r.title, r.keywords.join(" / ")),
                })
            })
            .collect();

        Ok(json!({
            "riskLevel": level.as_str(),
            "requirements": requirements,
            "ideas": ideas,
        }))
    }
}

#[async_trait]
impl Agent for IdeationAgent {
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

    #[tokio::test]
    async fn test_requirements_follow_shared_risk_level() {
        let agent = IdeationAgent::new(AgentMetadata::new("i1", "Ideation", AgentKind::Ideation));
        let ctx = ExecutionContext::new("p").with_state("riskLevel", json!("limited"));
        let out = agent.execute(json!({}), &ctx).await.unwrap();
        let reqs = out["requirements"].as_array().unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(out["ideas"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_max_ideas_config_caps_output() {
        let mut config = serde_json::Map::new();
        config.insert("maxIdeas".into(), json!(3));
        let agent = IdeationAgent::new(
            AgentMetadata::new("i1", "Ideation", AgentKind::Ideation).with_config(config),
        );
        let out = agent
            .execute(json!({"riskLevel": "high"}), &ExecutionContext::new("p"))
            .await
            .unwrap();
        assert_eq!(out["ideas"].as_array().unwrap().len(), 3);
        assert!(out["requirements"].as_array().unwrap().len() > 3);
    }

    #[tokio::test]
    async fn test_bad_risk_level_is_an_error() {
        let agent = IdeationAgent::new(AgentMetadata::new("i1", "Ideation", AgentKind::Ideation));
        let result = agent
            .execute(json!({"riskLevel": "spicy"}), &ExecutionContext::new("p"))
            .await;
        assert!(result.is_err());
    }
}
