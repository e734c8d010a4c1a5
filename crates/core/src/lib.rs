//! `tenantflow-core`: pipeline domain building blocks.
//!
//! This crate contains the **pure domain** model of a multi-tenant sync run
//! (no IO, no async): identifiers, tenants, sync jobs and results, stage
//! results, and the run classification.

pub mod error;
pub mod id;
pub mod incident;
pub mod outcome;
pub mod source;
pub mod stage;
pub mod sync;
pub mod tenant;

pub use error::{PipelineError, PipelineResult};
pub use id::{ConnectionId, IdempotencyToken, RunId, SyncJobId, TenantId};
pub use incident::Incident;
pub use outcome::{FailedJob, OverallStatus, RunOutcome, StageFailure};
pub use source::Source;
pub use stage::{StageKind, StageResult, StageStatus};
pub use sync::{FailureKind, SyncJob, SyncResult, SyncStatus};
pub use tenant::Tenant;
