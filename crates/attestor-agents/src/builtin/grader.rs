use super::{requirements_for, text_field, value_field, AgentStats, Requirement, RiskLevel};
use crate::agent::{Agent, AgentMetadata};
use async_trait::async_trait;
use attestor_core::{AttestorError, AttestorResult, ExecutionContext, HealthReport};
use serde_json::{json, Value};

const DEFAULT_PASS_THRESHOLD: f64 = 70.0;

/// Scores documentation against the applicable requirements.
///
/// A requirement counts as covered when the document mentions any of its
/// evidence keywords.
pub struct GraderAgent {
    metadata: AgentMetadata,
    stats: AgentStats,
}

impl GraderAgent {
    pub fn new(metadata: AgentMetadata) -> Self {
        Self {
            metadata,
            stats: AgentStats::default(),
        }
    }

    fn letter(score: f64) -> &'static str {
        match score {
            s if s >= 90.0 => "A",
            s if s >= 80.0 => "B",
            s if s >= 70.0 => "C",
            s if s >= 50.0 => "D",
            _ => "F",
        }
    }

    fn requirements(input: &Value, ctx: &ExecutionContext) -> AttestorResult<Vec<Requirement>> {
        if let Some(raw) = value_field(input, ctx, "requirements") {
            return serde_json::from_value(raw.clone()).map_err(AttestorError::from);
        }
        let level = match text_field(input, ctx, "riskLevel") {
            Some(raw) => raw.parse::<RiskLevel>()?,
            None => RiskLevel::High,
        };
        Ok(requirements_for(level))
    }

    fn run(&self, input: &Value, ctx: &ExecutionContext) -> AttestorResult<Value> {
        let document = text_field(input, ctx, "documentContent")
            .ok_or_else(|| AttestorError::Agent("grading requires documentContent".into()))?
            .to_lowercase();
        let requirements = Self::requirements(input, ctx)?;
        if requirements.is_empty() {
            return Err(AttestorError::Agent("no requirements to grade against".into()));
        }

        let mut findings = Vec::with_capacity(requirements.len());
        let mut gaps = Vec::new();
        for req in &requirements {
            let evidence: Vec<&String> = req
                .keywords
                .iter()
                .filter(|k| document.contains(&k.to_lowercase()))
                .collect();
            let covered = !evidence.is_empty();
            if !covered {
                gaps.push(req.id.clone());
            }
            findings.push(json!({
                "requirement": req.id,
                "covered": covered,
                "evidence": evidence,
            }));
        }

        let covered = requirements.len() - gaps.len();
        let score = (covered as f64 / requirements.len() as f64 * 1000.0).round() / 10.0;
        let threshold = self
            .metadata
            .config_f64("passThreshold")
            .unwrap_or(DEFAULT_PASS_THRESHOLD);

        Ok(json!({
            "score": score,
            "grade": Self::letter(score),
            "passed": score >= threshold,
            "findings": findings,
            "gaps": gaps,
        }))
    }
}

#[async_trait]
impl Agent for GraderAgent {
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
