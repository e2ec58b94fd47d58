use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Uniform `{status, detail}` result of a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self {
            status,
            detail,
            checked_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy, None)
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, Some(detail.into()))
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, Some(detail.into()))
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Combine several reports into one: the worst status wins and the
    /// details of every non-healthy report are joined.
    pub fn worst_of<'a>(reports: impl IntoIterator<Item = &'a HealthReport>) -> HealthReport {
        let mut status = HealthStatus::Healthy;
        let mut details = Vec::new();
        for report in reports {
            status = status.max(report.status);
            if let Some(detail) = &report.detail {
                if report.status != HealthStatus::Healthy {
                    details.push(detail.clone());
                }
            }
        }
        let detail = (!details.is_empty()).then(|| details.join("; "));
        HealthReport::new(status, detail)
    }
}

/// Anything that can report its own health.
///
/// Checks never fail: a component that cannot determine its health reports
/// itself as unhealthy with a detail message.
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    /// Stable name used as the key in aggregated reports.
    fn component(&self) -> String;

    async fn health_check(&self) -> HealthReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_of_picks_most_severe() {
        let reports = [
            HealthReport::healthy(),
            HealthReport::degraded("slow"),
            HealthReport::unhealthy("down"),
        ];
        let combined = HealthReport::worst_of(&reports);
        assert_eq!(combined.status, HealthStatus::Unhealthy);
        assert_eq!(combined.detail.as_deref(), Some("slow; down"));
    }

    #[test]
    fn test_worst_of_empty_is_healthy() {
        let combined = HealthReport::worst_of(&[]);
        assert!(combined.is_healthy());
        assert!(combined.detail.is_none());
    }
}
