//! External sync-service contract.
//!
//! The orchestrator only needs two calls: start a job for a connection and
//! read a job's status. Job semantics beyond that are opaque.

mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tenantflow_core::{ConnectionId, IdempotencyToken, SyncJobId};

pub use in_memory::InMemorySyncService;

/// Job state as reported by the sync service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalJobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// One status read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub state: ExternalJobState,
    pub rows_loaded: Option<u64>,
    pub error: Option<String>,
}

impl JobStatusReport {
    pub fn pending() -> Self {
        Self {
            state: ExternalJobState::Pending,
            rows_loaded: None,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: ExternalJobState::Running,
            rows_loaded: None,
            error: None,
        }
    }

    pub fn succeeded(rows_loaded: u64) -> Self {
        Self {
            state: ExternalJobState::Succeeded,
            rows_loaded: Some(rows_loaded),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: ExternalJobState::Failed,
            rows_loaded: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: ExternalJobState::Cancelled,
            rows_loaded: None,
            error: None,
        }
    }
}

/// Sync service error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncServiceError {
    /// Worth retrying (network blip, 5xx, rate limit).
    #[error("transient sync service error: {0}")]
    Transient(String),
    /// The request will never succeed as sent.
    #[error("request rejected by sync service: {0}")]
    Rejected(String),
    #[error("unknown job: {0}")]
    UnknownJob(SyncJobId),
}

impl SyncServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncServiceError::Transient(_))
    }
}

#[async_trait]
pub trait SyncService: Send + Sync {
    /// Start a sync for `connection_id`.
    ///
    /// The service is expected to deduplicate on `token`: triggering twice with
    /// the same token returns the same job instead of starting a second one.
    async fn trigger(
        &self,
        connection_id: &ConnectionId,
        token: &IdempotencyToken,
    ) -> Result<SyncJobId, SyncServiceError>;

    async fn status(&self, job_id: &SyncJobId) -> Result<JobStatusReport, SyncServiceError>;
}

#[async_trait]
impl<S> SyncService for Arc<S>
where
    S: SyncService + ?Sized,
{
    async fn trigger(
        &self,
        connection_id: &ConnectionId,
        token: &IdempotencyToken,
    ) -> Result<SyncJobId, SyncServiceError> {
        (**self).trigger(connection_id, token).await
    }

    async fn status(&self, job_id: &SyncJobId) -> Result<JobStatusReport, SyncServiceError> {
        (**self).status(job_id).await
    }
}
