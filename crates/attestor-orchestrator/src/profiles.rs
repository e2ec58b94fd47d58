use attestor_agents::builtin;
use attestor_agents::{Agent, AgentKind, AgentMetadata, Capability};
use attestor_core::AttestorResult;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Builds an agent from finished metadata.
pub type AgentBuilder = Arc<dyn Fn(AgentMetadata) -> AttestorResult<Arc<dyn Agent>> + Send + Sync>;

/// Recipe the factory uses to create one kind of agent.
#[derive(Clone)]
pub struct AgentTemplate {
    pub kind: AgentKind,
    pub display_name: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
    pub default_tags: Vec<String>,
    pub default_config: Map<String, Value>,
    pub builder: AgentBuilder,
}

impl AgentTemplate {
    /// Replace the builder, keeping everything else.
    pub fn with_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(AgentMetadata) -> AttestorResult<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        self.builder = Arc::new(builder);
        self
    }

    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            kind: self.kind,
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            capabilities: self.capabilities.iter().map(|c| c.name.to_string()).collect(),
            default_config: self.default_config.clone(),
        }
    }
}

impl std::fmt::Debug for AgentTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTemplate")
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Serializable summary of a template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub kind: AgentKind,
    pub display_name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub default_config: Map<String, Value>,
}

/// Templates for the built-in compliance agents.
pub fn default_templates() -> Vec<AgentTemplate> {
    vec![
        classification_template(),
        ideation_template(),
        grader_template(),
        improvement_template(),
    ]
}

fn builtin_builder(kind: AgentKind) -> AgentBuilder {
    Arc::new(move |metadata| Ok(builtin::build(kind, metadata)))
}

fn config(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn template(kind: AgentKind, display_name: &str, description: &str, defaults: Value) -> AgentTemplate {
    AgentTemplate {
        kind,
        display_name: display_name.to_string(),
        description: description.to_string(),
        capabilities: kind
            .default_capabilities()
            .into_iter()
            .map(Capability::new)
            .collect(),
        default_tags: vec![kind.as_str().to_string()],
        default_config: config(defaults),
        builder: builtin_builder(kind),
    }
}

fn classification_template() -> AgentTemplate {
    template(
        AgentKind::Classification,
        "Risk Classifier",
        CLASSIFICATION_DESCRIPTION,
        json!({ "confidenceFloor": 0.5 }),
    )
}

fn ideation_template() -> AgentTemplate {
    template(
        AgentKind::Ideation,
        "Requirement Ideator",
        IDEATION_DESCRIPTION,
        json!({ "maxIdeas": 10 }),
    )
}

fn grader_template() -> AgentTemplate {
    template(
        AgentKind::Grader,
        "Evidence Grader",
        GRADER_DESCRIPTION,
        json!({ "passThreshold": 70.0 }),
    )
}

fn improvement_template() -> AgentTemplate {
    template(
        AgentKind::Improvement,
        "Remediation Planner",
        IMPROVEMENT_DESCRIPTION,
        json!({}),
    )
}

const CLASSIFICATION_DESCRIPTION: &str = "\
Classifies an AI system into a regulatory risk tier (minimal, limited, high, \
unacceptable) from its project description.";

const IDEATION_DESCRIPTION: &str = "\
Proposes the obligations and concrete evidence ideas that apply to the \
classified risk tier.";

const GRADER_DESCRIPTION: &str = "\
Scores project documentation against the applicable requirements and lists \
the gaps.";

const IMPROVEMENT_DESCRIPTION: &str = "\
Turns grading gaps into a prioritised remediation plan.";
