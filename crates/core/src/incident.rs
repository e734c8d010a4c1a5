//! Operator-facing incident payload.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::{RunId, TenantId};
use crate::outcome::{FailedJob, OverallStatus, RunOutcome, StageFailure};

/// Structured, actionable failure report.
///
/// Enumerates every failed (tenant, source, job) so operators can re-run only
/// the affected tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub run_id: RunId,
    pub overall: OverallStatus,
    pub failed_jobs: Vec<FailedJob>,
    pub stage_failures: Vec<StageFailure>,
}

impl Incident {
    /// Build an incident for a non-successful outcome; `None` when the run succeeded.
    pub fn from_outcome(run_id: RunId, outcome: &RunOutcome) -> Option<Self> {
        if outcome.is_success() {
            return None;
        }
        Some(Self {
            run_id,
            overall: outcome.overall,
            failed_jobs: outcome.failed_jobs.clone(),
            stage_failures: outcome.stage_failures.clone(),
        })
    }

    /// Distinct tenants with at least one failed sync, sorted.
    pub fn rerun_tenants(&self) -> Vec<TenantId> {
        self.failed_jobs
            .iter()
            .map(|j| j.tenant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One-line headline naming what failed.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.failed_jobs.is_empty() {
            let pairs: Vec<String> = self
                .failed_jobs
                .iter()
                .map(|j| format!("{}/{}", j.tenant_id, j.source))
                .collect();
            parts.push(format!(
                "{} sync job(s) failed: {}",
                self.failed_jobs.len(),
                pairs.join(", ")
            ));
        }
        for stage in &self.stage_failures {
            parts.push(format!("{} stage failed: {}", stage.stage, stage.error_detail));
        }
        format!("run {} {:?}: {}", self.run_id, self.overall, parts.join("; "))
    }
}
