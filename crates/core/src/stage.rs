//! Results of the shared transform and validation stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which shared stage produced a result.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Transform,
    Validation,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Transform => "transform",
            StageKind::Validation => "validation",
        }
    }
}

impl core::fmt::Display for StageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

/// Terminal result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    stage: StageKind,
    status: StageStatus,
    metrics: BTreeMap<String, f64>,
    error_detail: Option<String>,
    attempts: u32,
    /// Set on the validation result when the transform before it failed.
    upstream_failed: bool,
}

impl StageResult {
    pub fn succeeded(stage: StageKind, metrics: BTreeMap<String, f64>, attempts: u32) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            metrics,
            error_detail: None,
            attempts,
            upstream_failed: false,
        }
    }

    pub fn failed(
        stage: StageKind,
        detail: impl Into<String>,
        metrics: BTreeMap<String, f64>,
        attempts: u32,
    ) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            metrics,
            error_detail: Some(detail.into()),
            attempts,
            upstream_failed: false,
        }
    }

    /// A stage that never started (for example after an operator abort).
    pub fn skipped(stage: StageKind, reason: impl AsRef<str>) -> Self {
        Self::failed(
            stage,
            format!("skipped: {}", reason.as_ref()),
            BTreeMap::new(),
            0,
        )
    }

    pub fn with_upstream_failed(mut self, upstream_failed: bool) -> Self {
        self.upstream_failed = upstream_failed;
        self
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn upstream_failed(&self) -> bool {
        self.upstream_failed
    }
}
