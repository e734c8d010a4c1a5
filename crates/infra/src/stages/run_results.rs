//! Parsing of the transform tool's `run_results.json` artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tenantflow_core::StageKind;

use super::StageInvocationError;

#[derive(Debug, Deserialize)]
struct Artifact {
    results: Vec<NodeResult>,
}

#[derive(Debug, Deserialize)]
struct NodeResult {
    unique_id: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    adapter_response: Option<AdapterResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterResponse {
    #[serde(default)]
    rows_affected: Option<i64>,
}

/// Aggregate counts from one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResultsSummary {
    pub models_built: u64,
    pub models_errored: u64,
    pub rows_changed_est: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub tests_warned: u64,
    pub skipped: u64,
    /// `unique_id: message` for every errored or failed node.
    pub errors: Vec<String>,
}

impl RunResultsSummary {
    pub fn from_json(raw: &str) -> Result<Self, StageInvocationError> {
        let artifact: Artifact = serde_json::from_str(raw)
            .map_err(|e| StageInvocationError::MalformedArtifact(e.to_string()))?;

        let mut summary = RunResultsSummary::default();

        for node in artifact.results {
            let is_test = node.unique_id.starts_with("test.");
            let failure = |node: &NodeResult| {
                format!(
                    "{}: {}",
                    node.unique_id,
                    node.message.as_deref().unwrap_or(&node.status)
                )
            };

            match (is_test, node.status.as_str()) {
                (_, "skipped") => summary.skipped += 1,
                (true, "pass" | "success") => summary.tests_passed += 1,
                (true, "warn") => summary.tests_warned += 1,
                (true, "fail" | "error") => {
                    summary.tests_failed += 1;
                    summary.errors.push(failure(&node));
                }
                (false, "success") => {
                    summary.models_built += 1;
                    let rows = node
                        .adapter_response
                        .as_ref()
                        .and_then(|r| r.rows_affected)
                        .and_then(|r| u64::try_from(r).ok())
                        .unwrap_or(0);
                    summary.rows_changed_est = summary.rows_changed_est.saturating_add(rows);
                }
                (false, "error" | "fail") => {
                    summary.models_errored += 1;
                    summary.errors.push(failure(&node));
                }
                (_, other) => {
                    return Err(StageInvocationError::MalformedArtifact(format!(
                        "{}: unknown status {other:?}",
                        node.unique_id
                    )));
                }
            }
        }

        Ok(summary)
    }

    pub fn is_success(&self) -> bool {
        self.models_errored == 0 && self.tests_failed == 0
    }

    /// Error description for a failed summary.
    pub fn failure_detail(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        if self.errors.is_empty() {
            return Some(format!(
                "{} model(s) errored, {} test(s) failed",
                self.models_errored, self.tests_failed
            ));
        }
        Some(self.errors.join("; "))
    }

    /// Metrics reported for `stage`.
    pub fn metrics_for(&self, stage: StageKind) -> BTreeMap<String, f64> {
        let pairs: &[(&str, u64)] = match stage {
            StageKind::Transform => &[
                ("models_built", self.models_built),
                ("models_errored", self.models_errored),
                ("rows_changed_est", self.rows_changed_est),
            ],
            StageKind::Validation => &[
                ("tests_passed", self.tests_passed),
                ("tests_failed", self.tests_failed),
                ("tests_warned", self.tests_warned),
            ],
        };
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarises_build_results() {
        let raw = r#"{
            "metadata": {"dbt_version": "1.7.0"},
            "results": [
                {"unique_id": "model.shop.stg_orders", "status": "success", "adapter_response": {"rows_affected": 120}},
                {"unique_id": "model.shop.fct_revenue", "status": "success", "adapter_response": {"rows_affected": -1}},
                {"unique_id": "model.shop.dim_customer", "status": "skipped"},
                {"unique_id": "test.shop.not_null_orders_id", "status": "pass"}
            ]
        }"#;

        let summary = RunResultsSummary::from_json(raw).unwrap();

        assert_eq!(summary.models_built, 2);
        assert_eq!(summary.rows_changed_est, 120);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.tests_passed, 1);
        assert!(summary.is_success());
        assert!(summary.failure_detail().is_none());
    }

    #[test]
    fn failed_tests_make_summary_fail() {
        let raw = r#"{"results": [
            {"unique_id": "test.shop.unique_orders_id", "status": "fail", "message": "Got 3 results"},
            {"unique_id": "test.shop.freshness", "status": "warn"}
        ]}"#;

        let summary = RunResultsSummary::from_json(raw).unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.tests_failed, 1);
        assert_eq!(summary.tests_warned, 1);
        assert_eq!(
            summary.failure_detail().unwrap(),
            "test.shop.unique_orders_id: Got 3 results"
        );
    }

    #[test]
    fn metrics_depend_on_stage() {
        let summary = RunResultsSummary {
            models_built: 42,
            rows_changed_est: 9001,
            tests_passed: 128,
            ..Default::default()
        };

        let transform = summary.metrics_for(StageKind::Transform);
        let validation = summary.metrics_for(StageKind::Validation);

        assert_eq!(transform.get("models_built"), Some(&42.0));
        assert_eq!(transform.get("rows_changed_est"), Some(&9001.0));
        assert!(!transform.contains_key("tests_passed"));
        assert_eq!(validation.get("tests_passed"), Some(&128.0));
    }

    #[test]
    fn malformed_artifact_is_rejected() {
        assert!(RunResultsSummary::from_json("{}").is_err());
        assert!(RunResultsSummary::from_json(
            r#"{"results": [{"unique_id": "model.a", "status": "exploded"}]}"#
        )
        .is_err());
    }
}
