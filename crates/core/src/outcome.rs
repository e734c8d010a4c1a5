//! Run classification.
//!
//! `RunOutcome` is never stored on its own; it is recomputed from the full
//! result set whenever it is needed, so evaluating the same inputs twice always
//! yields the same outcome.

use serde::{Deserialize, Serialize};

use crate::id::{SyncJobId, TenantId};
use crate::source::Source;
use crate::stage::{StageKind, StageResult};
use crate::sync::{FailureKind, SyncResult, SyncStatus};

/// Overall classification of a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Succeeded,
    /// Some tenant/source syncs failed but the shared stages succeeded.
    PartiallyFailed,
    /// A shared stage failed; no tenant's downstream data is trustworthy.
    Failed,
}

/// One failed (tenant, source) sync, with enough detail to re-run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub tenant_id: TenantId,
    pub source: Source,
    pub job_id: Option<SyncJobId>,
    pub status: SyncStatus,
    pub failure_kind: Option<FailureKind>,
    pub error_detail: String,
}

impl FailedJob {
    fn from_result(result: &SyncResult) -> Self {
        Self {
            tenant_id: result.tenant_id().clone(),
            source: result.source(),
            job_id: result.job_id().cloned(),
            status: result.status(),
            failure_kind: result.failure_kind(),
            error_detail: result
                .error_detail()
                .unwrap_or("no error detail reported")
                .to_string(),
        }
    }
}

/// A failed shared stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub error_detail: String,
    pub upstream_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub failed_jobs: Vec<FailedJob>,
    pub stage_failures: Vec<StageFailure>,
    pub transform_failed: bool,
    pub validation_failed: bool,
    pub overall: OverallStatus,
}

impl RunOutcome {
    /// Classify a run from every sync result and both stage results.
    ///
    /// Pure: no side effects, order of `failed_jobs` follows `sync_results`.
    pub fn evaluate(
        sync_results: &[SyncResult],
        transform: &StageResult,
        validation: &StageResult,
    ) -> Self {
        let failed_jobs: Vec<FailedJob> = sync_results
            .iter()
            .filter(|r| !r.is_success())
            .map(FailedJob::from_result)
            .collect();

        let stage_failures: Vec<StageFailure> = [transform, validation]
            .into_iter()
            .filter(|s| !s.is_success())
            .map(|s| StageFailure {
                stage: s.stage(),
                error_detail: s
                    .error_detail()
                    .unwrap_or("no error detail reported")
                    .to_string(),
                upstream_failed: s.upstream_failed(),
            })
            .collect();

        let transform_failed = !transform.is_success();
        let validation_failed = !validation.is_success();

        let overall = if transform_failed || validation_failed {
            OverallStatus::Failed
        } else if !failed_jobs.is_empty() {
            OverallStatus::PartiallyFailed
        } else {
            OverallStatus::Succeeded
        };

        Self {
            failed_jobs,
            stage_failures,
            transform_failed,
            validation_failed,
            overall,
        }
    }

    pub fn is_success(&self) -> bool {
        self.overall == OverallStatus::Succeeded
    }
}
