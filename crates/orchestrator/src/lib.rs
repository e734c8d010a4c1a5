//! Orchestration core: one pipeline shape, many tenants.
//!
//! A run loads the tenant list, dispatches one sync job per (tenant, source)
//! under a bounded in-flight limit, waits for every job to reach a terminal
//! state, runs the shared transform and validation stages in sequence, then
//! classifies the run and raises an incident when anything failed.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dispatcher;
pub mod pipeline;
pub mod retry;
pub mod stages;
pub mod waiter;

pub use aggregator::FailureAggregator;
pub use config::PipelineConfig;
pub use context::{AbortHandle, AbortSignal, RunContext};
pub use coordinator::{FanOutCoordinator, JobDescriptor, expand};
pub use dispatcher::{DispatchError, DispatchFailure, JobDispatcher};
pub use pipeline::{Pipeline, PipelineDeps, RunReport};
pub use retry::{BackoffStrategy, PollPolicy, RetryPolicy};
pub use stages::StageRunner;
pub use waiter::{JobWaiter, WaitState};
