use attestor_core::AttestorError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The fixed vocabulary of abilities an agent can declare.
///
/// Discovery queries are expressed in these names, so a misspelt capability
/// is a compile error rather than an empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityName {
    Classification,
    RiskAssessment,
    Ideation,
    RequirementMapping,
    Grading,
    EvidenceReview,
    Improvement,
    RemediationPlanning,
}

impl CapabilityName {
    pub const ALL: [CapabilityName; 8] = [
        CapabilityName::Classification,
        CapabilityName::RiskAssessment,
        CapabilityName::Ideation,
        CapabilityName::RequirementMapping,
        CapabilityName::Grading,
        CapabilityName::EvidenceReview,
        CapabilityName::Improvement,
        CapabilityName::RemediationPlanning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityName::Classification => "classification",
            CapabilityName::RiskAssessment => "risk_assessment",
            CapabilityName::Ideation => "ideation",
            CapabilityName::RequirementMapping => "requirement_mapping",
            CapabilityName::Grading => "grading",
            CapabilityName::EvidenceReview => "evidence_review",
            CapabilityName::Improvement => "improvement",
            CapabilityName::RemediationPlanning => "remediation_planning",
        }
    }
}

impl std::fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityName {
    type Err = AttestorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        CapabilityName::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = CapabilityName::ALL.iter().map(CapabilityName::as_str).collect();
                AttestorError::Validation(format!(
                    "unknown capability '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// A capability declared by an agent, with optional tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: CapabilityName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl Capability {
    pub fn new(name: CapabilityName) -> Self {
        Self {
            name,
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

impl From<CapabilityName> for Capability {
    fn from(name: CapabilityName) -> Self {
        Capability::new(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capability_names() {
        assert_eq!(
            "grading".parse::<CapabilityName>().unwrap(),
            CapabilityName::Grading
        );
        assert_eq!(
            "Risk-Assessment".parse::<CapabilityName>().unwrap(),
            CapabilityName::RiskAssessment
        );
    }

    #[test]
    fn test_parse_unknown_capability_lists_vocabulary() {
        let err = "grdaing".parse::<CapabilityName>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("grdaing"));
        assert!(msg.contains("grading"));
    }

    #[test]
    fn test_display_matches_serde() {
        for name in CapabilityName::ALL {
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{name}\""));
        }
    }

    #[test]
    fn test_capability_parameters_skipped_when_absent() {
        let json = serde_json::to_string(&Capability::new(CapabilityName::Ideation)).unwrap();
        assert!(!json.contains("parameters"));
    }
}
