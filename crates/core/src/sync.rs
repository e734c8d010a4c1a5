//! Sync jobs and their terminal results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ConnectionId, IdempotencyToken, SyncJobId, TenantId};
use crate::source::Source;

/// A dispatched sync job. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    tenant_id: TenantId,
    source: Source,
    connection_id: ConnectionId,
    job_id: SyncJobId,
    token: IdempotencyToken,
    started_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(
        tenant_id: TenantId,
        source: Source,
        connection_id: ConnectionId,
        job_id: SyncJobId,
        token: IdempotencyToken,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            source,
            connection_id,
            job_id,
            token,
            started_at,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn job_id(&self) -> &SyncJobId {
        &self.job_id
    }

    pub fn token(&self) -> &IdempotencyToken {
        &self.token
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Terminal status of a sync job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Succeeded,
    Failed,
    /// We stopped waiting; the external job may still be running.
    TimedOut,
}

/// Why a sync result is not a success.
///
/// Lets alerting tell "the job failed" apart from "we stopped waiting" or "it
/// was never dispatched".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The sync service reported the job as failed or cancelled.
    JobFailed,
    /// The polling budget ran out.
    TimedOut,
    /// The tenant has no connection registered for the source.
    MissingConnection,
    /// Dispatch kept failing transiently until the retry budget was spent.
    DispatchFailed,
    /// The sync service permanently rejected the trigger.
    DispatchRejected,
    /// Status could not be read from the sync service.
    StatusUnavailable,
    /// An operator aborted the run before the job finished.
    Aborted,
    /// The worker handling the job panicked.
    Panicked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::JobFailed => "job_failed",
            FailureKind::TimedOut => "timed_out",
            FailureKind::MissingConnection => "missing_connection",
            FailureKind::DispatchFailed => "dispatch_failed",
            FailureKind::DispatchRejected => "dispatch_rejected",
            FailureKind::StatusUnavailable => "status_unavailable",
            FailureKind::Aborted => "aborted",
            FailureKind::Panicked => "panicked",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one (tenant, source) sync.
///
/// Invariants: `error_detail` and `failure_kind` are present iff the status is
/// not `Succeeded`, and `rows_loaded` is zero unless the status is `Succeeded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    tenant_id: TenantId,
    source: Source,
    job_id: Option<SyncJobId>,
    status: SyncStatus,
    rows_loaded: u64,
    duration_ms: u64,
    failure_kind: Option<FailureKind>,
    error_detail: Option<String>,
}

impl SyncResult {
    pub fn succeeded(job: &SyncJob, rows_loaded: u64, duration: Duration) -> Self {
        Self {
            tenant_id: job.tenant_id.clone(),
            source: job.source,
            job_id: Some(job.job_id.clone()),
            status: SyncStatus::Succeeded,
            rows_loaded,
            duration_ms: duration_ms(duration),
            failure_kind: None,
            error_detail: None,
        }
    }

    /// A dispatched job that ended without success (other than a timeout).
    pub fn failed(
        job: &SyncJob,
        kind: FailureKind,
        detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            tenant_id: job.tenant_id.clone(),
            source: job.source,
            job_id: Some(job.job_id.clone()),
            status: SyncStatus::Failed,
            rows_loaded: 0,
            duration_ms: duration_ms(duration),
            failure_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    pub fn timed_out(job: &SyncJob, budget: Duration, duration: Duration) -> Self {
        Self {
            tenant_id: job.tenant_id.clone(),
            source: job.source,
            job_id: Some(job.job_id.clone()),
            status: SyncStatus::TimedOut,
            rows_loaded: 0,
            duration_ms: duration_ms(duration),
            failure_kind: Some(FailureKind::TimedOut),
            error_detail: Some(format!(
                "stopped waiting for job {} after {}s; job was still running",
                job.job_id,
                budget.as_secs()
            )),
        }
    }

    /// Placeholder for a pair that never got a job id.
    pub fn not_dispatched(
        tenant_id: TenantId,
        source: Source,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            source,
            job_id: None,
            status: SyncStatus::Failed,
            rows_loaded: 0,
            duration_ms: 0,
            failure_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn job_id(&self) -> Option<&SyncJobId> {
        self.job_id.as_ref()
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Succeeded
    }

    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> SyncJob {
        let tenant_id = TenantId::new("acme").unwrap();
        SyncJob::new(
            tenant_id.clone(),
            Source::Shopify,
            ConnectionId::new("conn-1").unwrap(),
            SyncJobId::new("job-1").unwrap(),
            IdempotencyToken::new(&tenant_id, Source::Shopify, Utc::now()),
            Utc::now(),
        )
    }

    #[test]
    fn success_has_no_error_detail() {
        let result = SyncResult::succeeded(&job(), 1234, Duration::from_secs(42));

        assert!(result.is_success());
        assert_eq!(result.rows_loaded(), 1234);
        assert_eq!(result.duration(), Duration::from_secs(42));
        assert!(result.error_detail().is_none());
        assert!(result.failure_kind().is_none());
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        let result = SyncResult::timed_out(&job(), Duration::from_secs(60), Duration::from_secs(60));

        assert_eq!(result.status(), SyncStatus::TimedOut);
        assert_eq!(result.failure_kind(), Some(FailureKind::TimedOut));
        assert_eq!(result.rows_loaded(), 0);
        assert!(result.error_detail().unwrap().contains("job-1"));
    }

    #[test]
    fn placeholder_has_no_job_id() {
        let result = SyncResult::not_dispatched(
            TenantId::new("acme").unwrap(),
            Source::Quickbooks,
            FailureKind::MissingConnection,
            "no connection",
        );

        assert_eq!(result.status(), SyncStatus::Failed);
        assert!(result.job_id().is_none());
        assert_eq!(result.error_detail(), Some("no connection"));
    }
}
