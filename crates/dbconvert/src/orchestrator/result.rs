//! Terminal record of a conversion run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome kind of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Completed without warnings.
    Information,
    /// Completed; only recoverable issues occurred.
    Warning,
    /// An abort-level failure occurred.
    Error,
    Canceled,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Information => "information",
            OutcomeKind::Warning => "warning",
            OutcomeKind::Error => "error",
            OutcomeKind::Canceled => "canceled",
        }
    }
}

/// Result of a conversion run. Produced exactly once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Unique run identifier.
    pub run_id: String,

    pub outcome: OutcomeKind,

    /// One-line summary.
    pub message: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Script units generated (objects and deferred keys).
    pub objects_scripted: usize,

    /// Objects left out (malformed, cyclic, unsupported or already present).
    pub objects_skipped: usize,

    pub tables_transferred: usize,

    pub tables_failed: usize,

    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Error events published during the run.
    pub errors: usize,

    /// Warning events published during the run.
    pub warnings: usize,

    /// Fingerprint of the effective configuration.
    pub config_hash: String,

    /// Scripts kept in memory, when that output was requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,

    /// Process exit code for command-line callers.
    pub exit_code: u8,
}

impl ConversionResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, OutcomeKind::Information | OutcomeKind::Warning)
    }
}

/// Connectivity of one side of a conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub engine: String,
    pub endpoint: String,
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source: EndpointHealth,
    pub target: EndpointHealth,
    pub healthy: bool,
}

impl HealthCheckResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_json_uses_snake_case_outcome() {
        let now = Utc::now();
        let result = ConversionResult {
            run_id: "r1".into(),
            outcome: OutcomeKind::Canceled,
            message: "Conversion canceled".into(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            objects_scripted: 0,
            objects_skipped: 0,
            tables_transferred: 0,
            tables_failed: 0,
            rows_transferred: 0,
            rows_per_second: 0,
            errors: 0,
            warnings: 0,
            config_hash: String::new(),
            scripts: Vec::new(),
            exit_code: 130,
        };
        let json = result.to_json().unwrap();
        assert!(json.contains("\"outcome\": \"canceled\""));
        assert!(!json.contains("scripts"));
        assert!(!result.is_success());
    }
}
