use attestor_core::AttestorError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Regulatory risk tier assigned by the classification agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Limited,
    High,
    Unacceptable,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Limited => "limited",
            RiskLevel::High => "high",
            RiskLevel::Unacceptable => "unacceptable",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = AttestorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Ok(RiskLevel::Minimal),
            "limited" => Ok(RiskLevel::Limited),
            "high" => Ok(RiskLevel::High),
            "unacceptable" => Ok(RiskLevel::Unacceptable),
            other => Err(AttestorError::Validation(format!("unknown risk level '{other}'"))),
        }
    }
}

/// A compliance requirement and the evidence keywords that satisfy it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    pub keywords: Vec<String>,
}

struct Entry {
    id: &'static str,
    title: &'static str,
    keywords: &'static [&'static str],
    min_level: RiskLevel,
}

const CATALOG: &[Entry] = &[
    Entry {
        id: "transparency",
        title: "Disclose AI interaction to users",
        keywords: &["disclose", "transparency", "notice", "inform users"],
        min_level: RiskLevel::Limited,
    },
    Entry {
        id: "risk-management",
        title: "Maintain a risk management system",
        keywords: &["risk management", "risk register", "hazard", "mitigation"],
        min_level: RiskLevel::High,
    },
    Entry {
        id: "data-governance",
        title: "Govern training and validation data",
        keywords: &["data governance", "dataset", "bias", "data quality"],
        min_level: RiskLevel::High,
    },
    Entry {
        id: "technical-documentation",
        title: "Keep technical documentation up to date",
        keywords: &["architecture", "technical documentation", "model card", "design"],
        min_level: RiskLevel::High,
    },
    Entry {
        id: "record-keeping",
        title: "Log system events for traceability",
        keywords: &["logging", "audit trail", "record keeping", "traceability"],
        min_level: RiskLevel::High,
    },
    Entry {
        id: "human-oversight",
        title: "Provide effective human oversight",
        keywords: &["human oversight", "human-in-the-loop", "override", "review by"],
        min_level: RiskLevel::High,
    },
    Entry {
        id: "robustness",
        title: "Ensure accuracy, robustness and cybersecurity",
        keywords: &["accuracy", "robustness", "security testing", "adversarial"],
        min_level: RiskLevel::High,
    },
    Entry {
        id: "code-of-conduct",
        title: "Adopt a voluntary code of conduct",
        keywords: &["code of conduct", "ethics", "responsible ai"],
        min_level: RiskLevel::Minimal,
    },
];

/// Requirements that apply at `level`, in catalog order.
///
/// An unacceptable system gets the single requirement to stop deployment.
pub fn requirements_for(level: RiskLevel) -> Vec<Requirement> {
    if level == RiskLevel::Unacceptable {
        return vec![Requirement {
            id: "cease-deployment".into(),
            title: "Prohibited practice: withdraw the system from the market".into(),
            keywords: vec!["decommission".into(), "withdrawn".into()],
        }];
    }
    CATALOG
        .iter()
        .filter(|e| e.min_level <= level)
        .map(|e| Requirement {
            id: e.id.to_string(),
            title: e.title.to_string(),
            keywords: e.keywords.iter().map(|k| k.to_string()).collect(),
        })
        .collect()
}
