//! Incident delivery.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use tenantflow_core::Incident;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncidentError {
    #[error("incident delivery failed: {0}")]
    Delivery(String),
}

/// Destination for operator incidents (pager, chat, ticketing).
#[async_trait]
pub trait IncidentSink: Send + Sync {
    async fn raise(&self, incident: &Incident) -> Result<(), IncidentError>;
}

#[async_trait]
impl<T> IncidentSink for Arc<T>
where
    T: IncidentSink + ?Sized,
{
    async fn raise(&self, incident: &Incident) -> Result<(), IncidentError> {
        (**self).raise(incident).await
    }
}

/// Logs incidents at error level, one event per failed job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingIncidentSink;

#[async_trait]
impl IncidentSink for TracingIncidentSink {
    async fn raise(&self, incident: &Incident) -> Result<(), IncidentError> {
        error!(
            run_id = %incident.run_id,
            overall = ?incident.overall,
            failed_jobs = incident.failed_jobs.len(),
            stage_failures = incident.stage_failures.len(),
            summary = %incident.summary(),
            "pipeline incident"
        );
        for job in &incident.failed_jobs {
            error!(
                run_id = %incident.run_id,
                tenant_id = %job.tenant_id,
                source = %job.source,
                job_id = job.job_id.as_ref().map(|j| j.as_str()).unwrap_or("<not dispatched>"),
                status = ?job.status,
                kind = ?job.failure_kind,
                error = %job.error_detail,
                "failed sync job"
            );
        }
        for stage in &incident.stage_failures {
            error!(
                run_id = %incident.run_id,
                stage = %stage.stage,
                upstream_failed = stage.upstream_failed,
                error = %stage.error_detail,
                "failed stage"
            );
        }
        Ok(())
    }
}

/// In-memory sink for tests/dev. Can be told to fail delivery.
#[derive(Debug, Default)]
pub struct InMemoryIncidentSink {
    raised: Mutex<Vec<Incident>>,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryIncidentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `raise` fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            raised: Mutex::new(Vec::new()),
            fail_with: Mutex::new(Some(reason.into())),
        }
    }

    fn raised_guard(&self) -> MutexGuard<'_, Vec<Incident>> {
        self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn all(&self) -> Vec<Incident> {
        self.raised_guard().clone()
    }
}

#[async_trait]
impl IncidentSink for InMemoryIncidentSink {
    async fn raise(&self, incident: &Incident) -> Result<(), IncidentError> {
        let failure = self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = failure {
            return Err(IncidentError::Delivery(reason));
        }
        self.raised_guard().push(incident.clone());
        Ok(())
    }
}
