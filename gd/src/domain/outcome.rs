//! Operation and run outcome types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::FailedPackage;

/// Result returned by the injected per-package operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageResult {
    /// Whether the operation considers itself successful
    pub success: bool,

    /// Version published by the operation, if any
    #[serde(default)]
    pub published_version: Option<String>,

    /// Operation-reported duration
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Free-form operation metadata
    #[serde(default)]
    pub metadata: Value,
}

impl PackageResult {
    /// A plain success with no extras
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }
}

/// A published-version event recorded during the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedVersion {
    pub package: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
}

/// Per-package start/end bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageTiming {
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Aggregate metrics for a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_duration_ms: u64,
    pub average_package_duration_ms: f64,
    pub peak_concurrency: usize,
    pub average_concurrency: f64,
}

/// Final result of a pool run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff no package ended in `failed`
    pub success: bool,
    pub total_packages: usize,
    pub completed: Vec<String>,
    pub failed: Vec<FailedPackage>,
    pub skipped: Vec<String>,
    pub metrics: ExecutionMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_result_ok() {
        let result = PackageResult::ok();
        assert!(result.success);
        assert!(result.published_version.is_none());
    }

    #[test]
    fn test_package_result_serde_defaults() {
        let result: PackageResult = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(result.success);
        assert!(result.duration_ms.is_none());
        assert!(result.metadata.is_null());
    }
}
