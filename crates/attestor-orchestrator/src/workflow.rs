use attestor_agents::CapabilityName;
use attestor_core::{AttestorError, AttestorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// How the steps of a workflow are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One step at a time, in declared order.
    Sequential,
    /// Every step starts as soon as its dependencies have succeeded.
    Parallel,
    /// Steps run tier by tier; a tier starts when the previous one is done.
    Hybrid,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// What happens to the rest of a workflow when a required step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Stop dispatching; cancel everything not yet started.
    FailFast,
    /// Skip dependents of the failed step and keep going elsewhere.
    #[default]
    BestEffort,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,
    pub required_capability: CapabilityName,
    /// Falls back to the workflow default step timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional steps may fail without failing the execution.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Extra input merged over the execution's initial input.
    #[serde(default)]
    pub input: Option<Value>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, capability: CapabilityName) -> Self {
        Self {
            id: id.into(),
            required_capability: capability,
            timeout_ms: None,
            depends_on: Vec::new(),
            required: true,
            input: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// The input handed to the agent: the initial input with the step's own
    /// input fields laid over it.
    pub fn build_input(&self, initial: &Value) -> Value {
        match (initial, &self.input) {
            (_, None) => initial.clone(),
            (Value::Object(base), Some(Value::Object(extra))) => {
                let mut merged = base.clone();
                for (k, v) in extra {
                    merged.insert(k.clone(), v.clone());
                }
                Value::Object(merged)
            }
            (_, Some(extra)) => extra.clone(),
        }
    }
}

/// A named, validated graph of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            execution_mode: mode,
            error_handling: ErrorHandling::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.error_handling = handling;
        self
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Reject empty workflows, duplicate or unknown step ids, cycles, and
    /// sequential steps that depend on later steps.
    pub fn validate(&self) -> AttestorResult<()> {
        if self.id.trim().is_empty() {
            return Err(AttestorError::Validation("workflow id must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(AttestorError::Validation(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(AttestorError::Validation(format!(
                    "workflow '{}' has a step with an empty id",
                    self.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(AttestorError::Validation(format!(
                    "workflow '{}' declares step '{}' twice",
                    self.id, step.id
                )));
            }
            if step.timeout_ms == Some(0) {
                return Err(AttestorError::Validation(format!(
                    "step '{}' has a zero timeout",
                    step.id
                )));
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let Some(dep_index) = self.step_index(dep) else {
                    return Err(AttestorError::Validation(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                };
                if self.execution_mode == ExecutionMode::Sequential && dep_index >= index {
                    return Err(AttestorError::Validation(format!(
                        "sequential step '{}' depends on later step '{dep}'",
                        step.id
                    )));
                }
            }
        }

        self.tiers().map(|_| ())
    }

    /// Group step indices into dependency tiers: tier 0 has no dependencies
    /// and every step sits one tier after its deepest dependency. Steps keep
    /// their declared order within a tier.
    pub fn tiers(&self) -> AttestorResult<Vec<Vec<usize>>> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut depth: Vec<Option<usize>> = vec![None; self.steps.len()];
        let mut remaining = self.steps.len();

        while remaining > 0 {
            let mut progressed = false;
            for (i, step) in self.steps.iter().enumerate() {
                if depth[i].is_some() {
                    continue;
                }
                let mut level = 0;
                let mut resolved = true;
                for dep in &step.depends_on {
                    match index.get(dep.as_str()).and_then(|&d| depth[d]) {
                        Some(d) => level = level.max(d + 1),
                        None => {
                            resolved = false;
                            break;
                        }
                    }
                }
                if resolved {
                    depth[i] = Some(level);
                    remaining -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                let stuck = self
                    .steps
                    .iter()
                    .zip(&depth)
                    .find(|(_, d)| d.is_none())
                    .map(|(s, _)| s.id.clone())
                    .unwrap_or_default();
                return Err(AttestorError::Validation(format!(
                    "workflow '{}' has a dependency cycle through step '{stuck}'",
                    self.id
                )));
            }
        }

        let levels = depth.iter().flatten().max().map_or(0, |m| m + 1);
        let mut tiers = vec![Vec::new(); levels];
        for (i, d) in depth.into_iter().enumerate() {
            if let Some(d) = d {
                tiers[d].push(i);
            }
        }
        Ok(tiers)
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub execution_mode: ExecutionMode,
    pub error_handling: ErrorHandling,
    pub step_count: usize,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(def: &WorkflowDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            execution_mode: def.execution_mode,
            error_handling: def.error_handling,
            step_count: def.steps.len(),
        }
    }
}

/// Workflows registered on every orchestration context.
pub fn default_workflows() -> Vec<WorkflowDefinition> {
    vec![
        compliance_assessment(),
        document_review(),
        risk_screening(),
    ]
}

/// Classify, derive requirements, grade the documentation, plan fixes.
pub fn compliance_assessment() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "compliance-assessment",
        "Compliance Assessment",
        ExecutionMode::Sequential,
    )
    .with_description("Full assessment: risk tier, requirements, documentation grade, remediation plan.")
    .with_error_handling(ErrorHandling::FailFast)
    .with_step(StepDefinition::new("classify", CapabilityName::Classification))
    .with_step(StepDefinition::new("ideate", CapabilityName::Ideation).depends_on(["classify"]))
    .with_step(StepDefinition::new("grade", CapabilityName::Grading).depends_on(["ideate"]))
    .with_step(StepDefinition::new("improve", CapabilityName::Improvement).depends_on(["grade"]))
}

/// Grade documentation against the classified tier and plan fixes.
pub fn document_review() -> WorkflowDefinition {
    WorkflowDefinition::new("document-review", "Document Review", ExecutionMode::Hybrid)
        .with_description("Classify and grade side by side, then plan remediation.")
        .with_step(StepDefinition::new("classify", CapabilityName::Classification))
        .with_step(StepDefinition::new("grade", CapabilityName::Grading))
        .with_step(StepDefinition::new("improve", CapabilityName::Improvement).depends_on(["grade"]))
}

/// Quick tier check with requirement ideas; ideation is optional.
pub fn risk_screening() -> WorkflowDefinition {
    WorkflowDefinition::new("risk-screening", "Risk Screening", ExecutionMode::Parallel)
        .with_description("Classify a project and sketch the obligations that follow.")
        .with_step(StepDefinition::new("classify", CapabilityName::RiskAssessment))
        .with_step(
            StepDefinition::new("ideate", CapabilityName::RequirementMapping)
                .depends_on(["classify"])
                .optional(),
        )
}
