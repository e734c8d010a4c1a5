//! Waiting on dispatched sync jobs.
//!
//! Each job is a small state machine driven by status reports, status errors,
//! the wall-clock deadline and the operator abort. Transitions are pure so the
//! polling loop only decides *when* to feed the next event.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use tenantflow_core::{FailureKind, SyncJob, SyncResult};
use tenantflow_infra::{ExternalJobState, JobStatusReport, SyncService, SyncServiceError};

use crate::context::AbortSignal;
use crate::retry::PollPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// Dispatched, not polled yet.
    Pending,
    Polling { polls: u32, status_errors: u32 },
    Succeeded { rows_loaded: u64 },
    Failed { kind: FailureKind, detail: String },
    TimedOut,
}

impl WaitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WaitState::Succeeded { .. } | WaitState::Failed { .. } | WaitState::TimedOut
        )
    }

    fn polls(&self) -> u32 {
        match self {
            WaitState::Polling { polls, .. } => *polls,
            _ => 0,
        }
    }

    fn status_errors(&self) -> u32 {
        match self {
            WaitState::Polling { status_errors, .. } => *status_errors,
            _ => 0,
        }
    }

    pub fn on_report(self, report: JobStatusReport) -> Self {
        if self.is_terminal() {
            return self;
        }
        match report.state {
            ExternalJobState::Pending | ExternalJobState::Running => WaitState::Polling {
                polls: self.polls() + 1,
                status_errors: 0,
            },
            ExternalJobState::Succeeded => WaitState::Succeeded {
                rows_loaded: report.rows_loaded.unwrap_or(0),
            },
            ExternalJobState::Failed => WaitState::Failed {
                kind: FailureKind::JobFailed,
                detail: report
                    .error
                    .unwrap_or_else(|| "sync job failed without error detail".to_string()),
            },
            ExternalJobState::Cancelled => WaitState::Failed {
                kind: FailureKind::JobFailed,
                detail: "sync job was cancelled".to_string(),
            },
        }
    }

    /// A failed status call. Transient errors are tolerated up to
    /// `max_status_errors` in a row; anything else ends the wait.
    pub fn on_status_error(self, err: &SyncServiceError, max_status_errors: u32) -> Self {
        if self.is_terminal() {
            return self;
        }
        if !err.is_retryable() {
            return WaitState::Failed {
                kind: FailureKind::StatusUnavailable,
                detail: err.to_string(),
            };
        }
        let status_errors = self.status_errors() + 1;
        if status_errors > max_status_errors {
            return WaitState::Failed {
                kind: FailureKind::StatusUnavailable,
                detail: format!("{status_errors} consecutive status errors, last: {err}"),
            };
        }
        WaitState::Polling {
            polls: self.polls() + 1,
            status_errors,
        }
    }

    pub fn on_deadline(self) -> Self {
        if self.is_terminal() {
            return self;
        }
        WaitState::TimedOut
    }

    pub fn on_abort(self) -> Self {
        if self.is_terminal() {
            return self;
        }
        WaitState::Failed {
            kind: FailureKind::Aborted,
            detail: "run aborted while waiting for job".to_string(),
        }
    }

    /// Final result for `job`. A non-terminal state counts as timed out.
    pub fn into_result(self, job: &SyncJob, budget: Duration, elapsed: Duration) -> SyncResult {
        match self {
            WaitState::Succeeded { rows_loaded } => SyncResult::succeeded(job, rows_loaded, elapsed),
            WaitState::Failed { kind, detail } => SyncResult::failed(job, kind, detail, elapsed),
            WaitState::TimedOut | WaitState::Pending | WaitState::Polling { .. } => {
                SyncResult::timed_out(job, budget, elapsed)
            }
        }
    }
}

enum Event {
    Report(JobStatusReport),
    StatusError(SyncServiceError),
    Deadline,
    Aborted,
}

/// Polls one job until it is terminal, the budget runs out, or the run is aborted.
pub struct JobWaiter<S> {
    service: S,
    poll: PollPolicy,
    timeout: Duration,
}

impl<S: SyncService> JobWaiter<S> {
    pub fn new(service: S, poll: PollPolicy, timeout: Duration) -> Self {
        Self {
            service,
            poll,
            timeout,
        }
    }

    /// Always yields a result; a job still running at the deadline is reported
    /// as timed out and left alone on the sync service.
    pub async fn wait(&self, job: &SyncJob, abort: &AbortSignal) -> SyncResult {
        let mut abort = abort.clone();
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut state = WaitState::Pending;
        let mut tick = 0u32;

        loop {
            let event = if abort.is_aborted() {
                Event::Aborted
            } else if Instant::now() >= deadline {
                Event::Deadline
            } else {
                tokio::select! {
                    biased;
                    _ = abort.aborted() => Event::Aborted,
                    polled = tokio::time::timeout_at(deadline, self.service.status(job.job_id())) => {
                        match polled {
                            Ok(Ok(report)) => Event::Report(report),
                            Ok(Err(err)) => Event::StatusError(err),
                            Err(_) => Event::Deadline,
                        }
                    }
                }
            };

            state = match event {
                Event::Report(report) => state.on_report(report),
                Event::StatusError(err) => {
                    warn!(job_id = %job.job_id(), error = %err, "status poll failed");
                    state.on_status_error(&err, self.poll.max_status_errors)
                }
                Event::Deadline => state.on_deadline(),
                Event::Aborted => state.on_abort(),
            };

            if state.is_terminal() {
                break;
            }

            tick += 1;
            let wake = (Instant::now() + self.poll.interval_for_tick(tick)).min(deadline);
            tokio::select! {
                biased;
                _ = abort.aborted() => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        let result = state.into_result(job, self.timeout, started.elapsed());
        debug!(
            tenant_id = %job.tenant_id(),
            source = %job.source(),
            job_id = %job.job_id(),
            status = ?result.status(),
            rows_loaded = result.rows_loaded(),
            "sync job finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tenantflow_core::{ConnectionId, IdempotencyToken, Source, SyncJobId, SyncStatus, TenantId};
    use tenantflow_infra::InMemorySyncService;

    use super::*;

    fn conn() -> ConnectionId {
        ConnectionId::new("acme-qb").unwrap()
    }

    async fn started_job(service: &InMemorySyncService) -> SyncJob {
        let tenant_id = TenantId::new("acme").unwrap();
        let token = IdempotencyToken::new(&tenant_id, Source::Quickbooks, Utc::now());
        let job_id = service.trigger(&conn(), &token).await.unwrap();
        SyncJob::new(tenant_id, Source::Quickbooks, conn(), job_id, token, Utc::now())
    }

    fn waiter(service: Arc<InMemorySyncService>, timeout_secs: u64) -> JobWaiter<Arc<InMemorySyncService>> {
        JobWaiter::new(
            service,
            PollPolicy::fixed(Duration::from_secs(30)),
            Duration::from_secs(timeout_secs),
        )
    }

    #[test]
    fn terminal_states_absorb_events() {
        let done = WaitState::Succeeded { rows_loaded: 3 };
        assert_eq!(done.clone().on_deadline(), done);
        assert_eq!(done.clone().on_abort(), done);
        assert_eq!(done.clone().on_report(JobStatusReport::failed("late")), done);
    }

    #[test]
    fn status_errors_reset_after_a_report() {
        let err = SyncServiceError::Transient("502".into());
        let state = WaitState::Pending
            .on_status_error(&err, 2)
            .on_status_error(&err, 2)
            .on_report(JobStatusReport::running())
            .on_status_error(&err, 2)
            .on_status_error(&err, 2);
        assert!(!state.is_terminal());

        let state = state.on_status_error(&err, 2);
        assert!(matches!(
            state,
            WaitState::Failed { kind: FailureKind::StatusUnavailable, .. }
        ));
    }

    #[test]
    fn unknown_job_fails_immediately() {
        let err = SyncServiceError::UnknownJob(SyncJobId::new("job-9").unwrap());
        let state = WaitState::Pending.on_status_error(&err, 5);
        assert!(matches!(
            state,
            WaitState::Failed { kind: FailureKind::StatusUnavailable, .. }
        ));
    }

    #[test]
    fn cancelled_job_is_a_failure() {
        let state = WaitState::Pending.on_report(JobStatusReport::cancelled());
        assert!(matches!(state, WaitState::Failed { kind: FailureKind::JobFailed, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_success() {
        let service = Arc::new(InMemorySyncService::new());
        service.script(
            &conn(),
            vec![
                JobStatusReport::pending(),
                JobStatusReport::running(),
                JobStatusReport::succeeded(1_200),
            ],
        );
        let job = started_job(&service).await;

        let result = waiter(service.clone(), 2700).wait(&job, &AbortSignal::never()).await;

        assert_eq!(result.status(), SyncStatus::Succeeded);
        assert_eq!(result.rows_loaded(), 1_200);
        assert_eq!(service.polls(job.job_id()), 3);
        assert_eq!(result.duration(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_carries_service_error() {
        let service = Arc::new(InMemorySyncService::new());
        service.script(&conn(), vec![JobStatusReport::failed("invalid credentials")]);
        let job = started_job(&service).await;

        let result = waiter(service, 2700).wait(&job, &AbortSignal::never()).await;

        assert_eq!(result.status(), SyncStatus::Failed);
        assert_eq!(result.failure_kind(), Some(FailureKind::JobFailed));
        assert_eq!(result.error_detail(), Some("invalid credentials"));
        assert_eq!(result.rows_loaded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn still_running_at_deadline_times_out() {
        let service = Arc::new(InMemorySyncService::new());
        service.stay_running(&conn());
        let job = started_job(&service).await;

        let result = waiter(service.clone(), 2700).wait(&job, &AbortSignal::never()).await;

        assert_eq!(result.status(), SyncStatus::TimedOut);
        assert_eq!(result.rows_loaded(), 0);
        assert_eq!(result.duration(), Duration::from_secs(2700));
        assert!(result.error_detail().unwrap().contains("still running"));
        assert_eq!(service.polls(job.job_id()), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_status_errors_are_tolerated() {
        let service = Arc::new(InMemorySyncService::new());
        service.fail_status(
            &conn(),
            vec![
                SyncServiceError::Transient("503".into()),
                SyncServiceError::Transient("503".into()),
            ],
        );
        service.script(&conn(), vec![JobStatusReport::succeeded(7)]);
        let job = started_job(&service).await;

        let result = waiter(service, 2700).wait(&job, &AbortSignal::never()).await;

        assert!(result.is_success());
        assert_eq!(result.rows_loaded(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_waiting() {
        let service = Arc::new(InMemorySyncService::new());
        service.stay_running(&conn());
        let job = started_job(&service).await;
        let (handle, signal) = AbortSignal::pair();

        let waiting = {
            let service = service.clone();
            tokio::spawn(async move { waiter(service, 2700).wait(&job, &signal).await })
        };
        tokio::time::sleep(Duration::from_secs(95)).await;
        handle.abort();

        let result = waiting.await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Aborted));
        assert_eq!(result.duration(), Duration::from_secs(95));
    }
}
