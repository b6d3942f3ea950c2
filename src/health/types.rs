//! Health report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass = 0,
    Warn = 1,
    Fail = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy = 0,
    Degraded = 1,
    Unhealthy = 2,
}

impl OverallStatus {
    /// Any `Fail` ⇒ `Unhealthy`; else any `Warn` ⇒ `Degraded`; else `Healthy`.
    #[must_use]
    pub fn derive(checks: &[CheckResult]) -> Self {
        match checks.iter().map(|c| c.status).max() {
            Some(CheckStatus::Fail) => Self::Unhealthy,
            Some(CheckStatus::Warn) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

/// Which probes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthDepth {
    /// Cache round trip and memory only
    Quick,
    /// Every probe
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass)
    }

    pub fn warn(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn).with_message(message)
    }

    pub fn fail(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail).with_message(message)
    }

    pub fn new(name: &str, status: CheckStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            latency_ms: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A full probe round. Replaced wholesale on every check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub checks: Vec<CheckResult>,
    pub generated_at: DateTime<Utc>,
    /// Whether this round triggered emergency eviction
    #[serde(default)]
    pub emergency_triggered: bool,
}

impl HealthReport {
    #[must_use]
    pub fn new(checks: Vec<CheckResult>) -> Self {
        Self {
            overall_status: OverallStatus::derive(&checks),
            checks,
            generated_at: Utc::now(),
            emergency_triggered: false,
        }
    }

    #[must_use]
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.overall_status == OverallStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        assert_eq!(OverallStatus::derive(&[]), OverallStatus::Healthy);
        assert_eq!(
            OverallStatus::derive(&[CheckResult::pass("cache"), CheckResult::pass("memory")]),
            OverallStatus::Healthy
        );
        assert_eq!(
            OverallStatus::derive(&[CheckResult::pass("cache"), CheckResult::warn("memory", "85%")]),
            OverallStatus::Degraded
        );
        assert_eq!(
            OverallStatus::derive(&[CheckResult::warn("cache", "slow"), CheckResult::fail("memory", "92%")]),
            OverallStatus::Unhealthy
        );
    }

    #[test]
    fn test_report_lookup() {
        let report = HealthReport::new(vec![CheckResult::pass("cache").with_latency(3)]);
        assert!(report.is_healthy());
        assert_eq!(report.check("cache").unwrap().latency_ms, Some(3));
        assert!(report.check("upstream").is_none());
    }

    #[test]
    fn test_serialized_shape() {
        let report = HealthReport::new(vec![CheckResult::fail("upstream", "refused")]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["overall_status"], "unhealthy");
        assert_eq!(json["checks"][0]["status"], "fail");
        assert!(json["checks"][0].get("latency_ms").is_none());
    }
}
