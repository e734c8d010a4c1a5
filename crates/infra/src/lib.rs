//! Infrastructure layer: adapters for the collaborators a run talks to.
//!
//! Everything here sits behind a trait so the orchestrator can be driven by
//! in-memory implementations in tests and by real clients in production.

pub mod clock;
pub mod incident;
pub mod stages;
pub mod sync_service;
pub mod tenants;

pub use clock::{Clock, FixedClock, SystemClock};
pub use incident::{InMemoryIncidentSink, IncidentError, IncidentSink, TracingIncidentSink};
pub use stages::{RunResultsSummary, ScriptedStageInvoker, StageInvocationError, StageInvoker};
pub use sync_service::{
    ExternalJobState, InMemorySyncService, JobStatusReport, SyncService, SyncServiceError,
};
pub use tenants::{
    EnvTenantSource, JsonFileTenantSource, StaticTenantSource, TenantSource, parse_tenants,
};
