//! Connection checks
//!
//! Every instance asks its provider to authenticate. A rejected key makes
//! the gateway unhealthy, an unreachable endpoint only degrades it.

use llm::LlmError;
use serde::{Deserialize, Serialize};

/// Gateway or instance health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The provider accepted the credentials
    Healthy,
    /// The provider could not be reached or answered with something other than a rejection
    Degraded,
    /// The provider rejected the credentials
    Unhealthy,
}

impl HealthStatus {
    fn of(error: &LlmError) -> Self {
        if error.is_auth_error() {
            Self::Unhealthy
        } else {
            Self::Degraded
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Outcome of one instance's connection check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCheck {
    /// Instance name
    pub name: String,
    pub status: HealthStatus,
    /// Error classification, absent when the check passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response_time_ms: u64,
}

impl InstanceCheck {
    /// Classify the result of `ProviderAdapter::check_connection`.
    pub fn from_result(name: impl Into<String>, result: &llm::Result<()>, response_time_ms: u64) -> Self {
        let (status, error_kind, message) = match result {
            Ok(()) => (HealthStatus::Healthy, None, None),
            Err(error) => {
                let status = HealthStatus::of(error);
                let message = match status {
                    HealthStatus::Unhealthy => format!("credentials rejected: {}", error.message()),
                    _ => format!("unreachable: {}", error.message()),
                };
                (status, Some(error.kind().to_string()), Some(message))
            }
        };

        Self {
            name: name.into(),
            status,
            error_kind,
            message,
            response_time_ms,
        }
    }

    pub fn credentials_rejected(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }

    pub fn is_reachable(&self) -> bool {
        self.status != HealthStatus::Degraded
    }
}

/// Gateway-wide result of checking every instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across all instances
    pub status: HealthStatus,
    pub checks: Vec<InstanceCheck>,
    /// Slowest single check in milliseconds (checks run concurrently)
    pub max_response_time_ms: u64,
    /// Unix timestamp of the check
    pub timestamp: i64,
}

impl HealthReport {
    pub fn new(checks: Vec<InstanceCheck>) -> Self {
        Self {
            status: checks.iter().map(|c| c.status).max().unwrap_or(HealthStatus::Healthy),
            max_response_time_ms: checks.iter().map(|c| c.response_time_ms).max().unwrap_or(0),
            checks,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Names of instances whose provider rejected the credentials.
    pub fn rejected(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.credentials_rejected())
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_classifies_errors() {
        let ok = InstanceCheck::from_result("den", &Ok(()), 12);
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert!(ok.error_kind.is_none() && ok.message.is_none());

        let rejected = InstanceCheck::from_result("den", &Err(LlmError::AuthError("invalid key".into())), 40);
        assert!(rejected.credentials_rejected());
        assert_eq!(rejected.error_kind.as_deref(), Some("auth_error"));
        assert_eq!(rejected.message.as_deref(), Some("credentials rejected: invalid key"));

        let offline = InstanceCheck::from_result("den", &Err(LlmError::Timeout("no answer".into())), 30_000);
        assert_eq!(offline.status, HealthStatus::Degraded);
        assert!(!offline.is_reachable());
        assert_eq!(offline.message.as_deref(), Some("unreachable: no answer"));
    }

    #[test]
    fn test_rejected_credentials_outrank_unreachable() {
        let report = HealthReport::new(vec![
            InstanceCheck::from_result("a", &Ok(()), 10),
            InstanceCheck::from_result("b", &Err(LlmError::TransportError("refused".into())), 30),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.max_response_time_ms, 30);
        assert!(report.rejected().is_empty());

        let report = HealthReport::new(vec![
            InstanceCheck::from_result("b", &Err(LlmError::TransportError("refused".into())), 30),
            InstanceCheck::from_result("c", &Err(LlmError::AuthError("bad key".into())), 5),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.rejected(), vec!["c"]);
    }

    #[test]
    fn test_empty_report_is_healthy() {
        let report = HealthReport::new(Vec::new());
        assert!(report.is_healthy());
        assert_eq!(report.status.to_string(), "healthy");
    }
}
