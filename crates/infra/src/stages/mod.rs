//! Transform-tool invocation contract.
//!
//! The orchestrator asks for one stage at a time and consumes only the parsed
//! run-results summary; how the tool is launched is up to the implementation.

mod run_results;
mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tenantflow_core::StageKind;

pub use run_results::RunResultsSummary;
pub use scripted::ScriptedStageInvoker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageInvocationError {
    /// The tool could not be started or exited without producing results.
    #[error("transform tool unavailable: {0}")]
    Unavailable(String),
    /// The tool ran but its run-results artifact could not be parsed.
    #[error("malformed run results: {0}")]
    MalformedArtifact(String),
}

#[async_trait]
pub trait StageInvoker: Send + Sync {
    /// Run `stage` once and return its parsed summary.
    ///
    /// A completed run with failing nodes is still `Ok`; callers inspect
    /// `RunResultsSummary::is_success`.
    async fn invoke(&self, stage: StageKind) -> Result<RunResultsSummary, StageInvocationError>;
}

#[async_trait]
impl<T> StageInvoker for Arc<T>
where
    T: StageInvoker + ?Sized,
{
    async fn invoke(&self, stage: StageKind) -> Result<RunResultsSummary, StageInvocationError> {
        (**self).invoke(stage).await
    }
}
