//! Starting sync jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use tenantflow_core::{FailureKind, IdempotencyToken, Source, SyncJob, SyncResult, Tenant, TenantId};
use tenantflow_infra::{Clock, SyncService, SyncServiceError};

use crate::context::AbortSignal;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("tenant {tenant_id} has no connection registered for {source_system}")]
    MissingConnection {
        tenant_id: TenantId,
        source_system: Source,
    },
    /// Retryable.
    #[error("dispatch failed: {0}")]
    Transient(String),
    /// Not retryable.
    #[error("dispatch rejected: {0}")]
    Rejected(String),
    #[error("run aborted before dispatch")]
    Aborted,
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DispatchError::MissingConnection { .. } => FailureKind::MissingConnection,
            DispatchError::Transient(_) => FailureKind::DispatchFailed,
            DispatchError::Rejected(_) => FailureKind::DispatchRejected,
            DispatchError::Aborted => FailureKind::Aborted,
        }
    }
}

impl From<SyncServiceError> for DispatchError {
    fn from(err: SyncServiceError) -> Self {
        match err {
            SyncServiceError::Transient(msg) => DispatchError::Transient(msg),
            SyncServiceError::Rejected(msg) => DispatchError::Rejected(msg),
            SyncServiceError::UnknownJob(job_id) => {
                DispatchError::Rejected(format!("sync service lost job {job_id}"))
            }
        }
    }
}

/// Final dispatch error plus how many trigger attempts were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub error: DispatchError,
    pub attempts: u32,
}

impl DispatchFailure {
    /// Placeholder result for the pair that could not be dispatched.
    pub fn into_result(self, tenant_id: TenantId, source: Source) -> SyncResult {
        let detail = if self.attempts > 1 {
            format!("{} (gave up after {} attempts)", self.error, self.attempts)
        } else {
            self.error.to_string()
        };
        SyncResult::not_dispatched(tenant_id, source, self.error.failure_kind(), detail)
    }
}

/// Starts one external sync job per (tenant, source).
pub struct JobDispatcher<S> {
    service: S,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<S: SyncService> JobDispatcher<S> {
    pub fn new(service: S, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            service,
            clock,
            retry,
        }
    }

    /// Single trigger attempt.
    pub async fn dispatch(
        &self,
        tenant: &Tenant,
        source: Source,
        run_ts: DateTime<Utc>,
    ) -> Result<SyncJob, DispatchError> {
        let connection_id = tenant.connection_for(source).ok_or_else(|| {
            DispatchError::MissingConnection {
                tenant_id: tenant.tenant_id().clone(),
                source_system: source,
            }
        })?;

        let token = IdempotencyToken::new(tenant.tenant_id(), source, run_ts);
        let job_id = self.service.trigger(connection_id, &token).await?;

        Ok(SyncJob::new(
            tenant.tenant_id().clone(),
            source,
            connection_id.clone(),
            job_id,
            token,
            self.clock.now(),
        ))
    }

    /// Trigger with bounded retries on transient failures.
    ///
    /// Every attempt carries the same idempotency token, so a retry after a
    /// trigger that actually landed does not start a second job.
    pub async fn dispatch_with_retry(
        &self,
        tenant: &Tenant,
        source: Source,
        run_ts: DateTime<Utc>,
        abort: &AbortSignal,
    ) -> Result<SyncJob, DispatchFailure> {
        let mut abort = abort.clone();
        let mut attempts = 0u32;

        loop {
            if abort.is_aborted() {
                return Err(DispatchFailure {
                    error: DispatchError::Aborted,
                    attempts,
                });
            }

            attempts += 1;
            let error = match self.dispatch(tenant, source, run_ts).await {
                Ok(job) => {
                    debug!(
                        tenant_id = %tenant.tenant_id(),
                        source = %source,
                        job_id = %job.job_id(),
                        attempts,
                        "sync job dispatched"
                    );
                    return Ok(job);
                }
                Err(error) => error,
            };

            let retries_done = attempts - 1;
            if !error.is_retryable() || !self.retry.should_retry(retries_done) {
                warn!(
                    tenant_id = %tenant.tenant_id(),
                    source = %source,
                    attempts,
                    error = %error,
                    "giving up on dispatch"
                );
                return Err(DispatchFailure { error, attempts });
            }

            let delay = self.retry.delay_for_retry(attempts);
            warn!(
                tenant_id = %tenant.tenant_id(),
                source = %source,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "dispatch failed, retrying"
            );

            tokio::select! {
                biased;
                _ = abort.aborted() => {
                    return Err(DispatchFailure { error: DispatchError::Aborted, attempts });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use tenantflow_core::ConnectionId;
    use tenantflow_infra::{FixedClock, InMemorySyncService};

    use super::*;

    fn run_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()
    }

    fn tenant() -> Tenant {
        Tenant::new(TenantId::new("acme").unwrap())
            .with_connection(Source::Shopify, ConnectionId::new("acme-shopify").unwrap())
    }

    fn dispatcher(service: Arc<InMemorySyncService>, retry: RetryPolicy) -> JobDispatcher<Arc<InMemorySyncService>> {
        JobDispatcher::new(service, Arc::new(FixedClock(run_ts())), retry)
    }

    #[tokio::test]
    async fn dispatch_builds_job_with_token() {
        let service = Arc::new(InMemorySyncService::new());
        let dispatcher = dispatcher(service.clone(), RetryPolicy::no_retry());

        let job = dispatcher.dispatch(&tenant(), Source::Shopify, run_ts()).await.unwrap();

        assert_eq!(job.tenant_id().as_str(), "acme");
        assert_eq!(job.connection_id().as_str(), "acme-shopify");
        assert_eq!(job.token().as_str(), "acme:shopify:20250101T060000");
        assert_eq!(job.started_at(), run_ts());
    }

    #[tokio::test]
    async fn missing_connection_is_not_retried() {
        let service = Arc::new(InMemorySyncService::new());
        let dispatcher = dispatcher(service.clone(), RetryPolicy::fixed(2, Duration::from_secs(1)));

        let failure = dispatcher
            .dispatch_with_retry(&tenant(), Source::Quickbooks, run_ts(), &AbortSignal::never())
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(
            failure.error,
            DispatchError::MissingConnection {
                tenant_id: TenantId::new("acme").unwrap(),
                source_system: Source::Quickbooks,
            }
        );
        assert_eq!(
            failure.error.to_string(),
            "tenant acme has no connection registered for quickbooks"
        );
        assert_eq!(service.jobs_started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let service = Arc::new(InMemorySyncService::new());
        let conn = ConnectionId::new("acme-shopify").unwrap();
        service.fail_triggers(
            &conn,
            vec![
                SyncServiceError::Transient("503".into()),
                SyncServiceError::Transient("503".into()),
            ],
        );
        let dispatcher = dispatcher(service.clone(), RetryPolicy::fixed(2, Duration::from_secs(300)));

        let job = dispatcher
            .dispatch_with_retry(&tenant(), Source::Shopify, run_ts(), &AbortSignal::never())
            .await
            .unwrap();

        assert_eq!(service.trigger_calls(&conn), 3);
        assert_eq!(service.jobs_started(), 1);
        assert_eq!(job.source(), Source::Shopify);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let service = Arc::new(InMemorySyncService::new());
        let conn = ConnectionId::new("acme-shopify").unwrap();
        service.fail_triggers(
            &conn,
            (0..5).map(|_| SyncServiceError::Transient("timeout".into())).collect(),
        );
        let dispatcher = dispatcher(service.clone(), RetryPolicy::fixed(2, Duration::from_secs(300)));

        let failure = dispatcher
            .dispatch_with_retry(&tenant(), Source::Shopify, run_ts(), &AbortSignal::never())
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(service.trigger_calls(&conn), 3);
        let result = failure.into_result(TenantId::new("acme").unwrap(), Source::Shopify);
        assert_eq!(result.failure_kind(), Some(FailureKind::DispatchFailed));
        assert!(result.error_detail().unwrap().contains("3 attempts"));
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let service = Arc::new(InMemorySyncService::new());
        let conn = ConnectionId::new("acme-shopify").unwrap();
        service.fail_triggers(&conn, vec![SyncServiceError::Rejected("connection disabled".into())]);
        let dispatcher = dispatcher(service.clone(), RetryPolicy::fixed(2, Duration::from_secs(300)));

        let failure = dispatcher
            .dispatch_with_retry(&tenant(), Source::Shopify, run_ts(), &AbortSignal::never())
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error.failure_kind(), FailureKind::DispatchRejected);
    }

    #[tokio::test]
    async fn aborted_run_does_not_dispatch() {
        let service = Arc::new(InMemorySyncService::new());
        let dispatcher = dispatcher(service.clone(), RetryPolicy::no_retry());
        let (handle, signal) = AbortSignal::pair();
        handle.abort();

        let failure = dispatcher
            .dispatch_with_retry(&tenant(), Source::Shopify, run_ts(), &signal)
            .await
            .unwrap_err();

        assert_eq!(failure.error, DispatchError::Aborted);
        assert_eq!(service.jobs_started(), 0);
    }
}
