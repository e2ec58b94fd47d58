use crate::capability::{Capability, CapabilityName};
use async_trait::async_trait;
use attestor_core::{AttestorError, AttestorResult, ExecutionContext, HealthReport, HealthStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Identifier of a registered agent.
pub type AgentId = String;

/// The agent templates the core knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Assigns a regulatory risk level to a project.
    Classification,
    /// Derives the compliance requirements a project has to meet.
    Ideation,
    /// Scores project documentation against the requirements.
    Grader,
    /// Turns grading gaps into remediation suggestions.
    Improvement,
}

impl AgentKind {
    /// Every kind, in the order a project team is assembled.
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Classification,
        AgentKind::Ideation,
        AgentKind::Grader,
        AgentKind::Improvement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Classification => "classification",
            AgentKind::Ideation => "ideation",
            AgentKind::Grader => "grader",
            AgentKind::Improvement => "improvement",
        }
    }

    /// Capabilities an agent of this kind always declares.
    pub fn default_capabilities(&self) -> Vec<CapabilityName> {
        match self {
            AgentKind::Classification => vec![
                CapabilityName::Classification,
                CapabilityName::RiskAssessment,
            ],
            AgentKind::Ideation => vec![
                CapabilityName::Ideation,
                CapabilityName::RequirementMapping,
            ],
            AgentKind::Grader => vec![CapabilityName::Grading, CapabilityName::EvidenceReview],
            AgentKind::Improvement => vec![
                CapabilityName::Improvement,
                CapabilityName::RemediationPlanning,
            ],
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AttestorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classification" | "classifier" => Ok(AgentKind::Classification),
            "ideation" => Ok(AgentKind::Ideation),
            "grader" | "grading" => Ok(AgentKind::Grader),
            "improvement" => Ok(AgentKind::Improvement),
            _ => Err(AttestorError::UnsupportedType(s.to_string())),
        }
    }
}

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Initializing,
    Ready,
    Busy,
    Degraded,
    Unhealthy,
    Stopped,
}

impl AgentStatus {
    /// `initializing → ready ⇄ busy`; anything may fall to
    /// degraded/unhealthy/stopped; `stopped` is terminal.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (*self, next) {
            (Stopped, _) => false,
            (_, Degraded | Unhealthy | Stopped) => true,
            (Initializing, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            // A degraded agent still serves work and may recover.
            (Degraded, Busy | Ready) => true,
            (Unhealthy, Ready) => true,
            _ => false,
        }
    }

    /// Whether a new invocation may start in this state.
    pub fn accepts_work(&self) -> bool {
        matches!(self, AgentStatus::Ready | AgentStatus::Degraded)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Ready => "ready",
            AgentStatus::Busy => "busy",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Unhealthy => "unhealthy",
            AgentStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl From<HealthStatus> for AgentStatus {
    fn from(health: HealthStatus) -> Self {
        match health {
            HealthStatus::Healthy => AgentStatus::Ready,
            HealthStatus::Degraded => AgentStatus::Degraded,
            HealthStatus::Unhealthy => AgentStatus::Unhealthy,
        }
    }
}

/// Identity and declared abilities of an agent. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentKind,
    pub capabilities: Vec<Capability>,
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AgentMetadata {
    /// Metadata with the default capabilities of `kind` and no tags.
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            capabilities: kind
                .default_capabilities()
                .into_iter()
                .map(Capability::new)
                .collect(),
            tags: BTreeSet::new(),
            config: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.has_capability(capability.name) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config.extend(config);
        self
    }

    pub fn has_capability(&self, name: CapabilityName) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }

    /// True when every requested tag is present.
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// True when every requested capability is declared.
    pub fn has_all_capabilities(&self, names: &[CapabilityName]) -> bool {
        names.iter().all(|n| self.has_capability(*n))
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }

    pub fn validate(&self) -> AttestorResult<()> {
        if self.id.trim().is_empty() {
            return Err(AttestorError::Validation("agent id must not be empty".into()));
        }
        if self.capabilities.is_empty() {
            return Err(AttestorError::Validation(format!(
                "agent {} declares no capabilities",
                self.id
            )));
        }
        Ok(())
    }
}

/// A stateful worker implementing one capability set.
///
/// Agents are owned by the registry; callers reach them only by id. The
/// registry guarantees that `execute` is never called concurrently on the
/// same instance.
#[async_trait]
pub trait Agent: Send + Sync {
    fn metadata(&self) -> &AgentMetadata;

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> AttestorResult<Value>;

    async fn health_check(&self) -> HealthReport {
        HealthReport::healthy()
    }
}
