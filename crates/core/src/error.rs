//! Run-level error model.

use thiserror::Error;

/// Result type for operations that may abort a run before any job exists.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Run-level error.
///
/// Only configuration faults live here. Anything that happens to an individual
/// job or stage is captured as data (`SyncResult` / `StageResult`) instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The tenant/config store was unreachable or returned malformed data.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The tenant store returned an empty list.
    #[error("no tenants configured")]
    NoTenants,

    /// An identifier was blank or otherwise unusable.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Another run of the same pipeline is still in progress.
    #[error("a pipeline run is already active")]
    RunAlreadyActive,
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
