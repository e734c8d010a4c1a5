//! Fan-out of sync jobs and fan-in of their results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tenantflow_core::{FailureKind, Source, SyncResult, Tenant, TenantId};
use tenantflow_infra::SyncService;

use crate::context::{AbortSignal, RunContext};
use crate::dispatcher::JobDispatcher;
use crate::waiter::JobWaiter;

/// One (tenant, source) unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub tenant: Tenant,
    pub source: Source,
}

/// Every (tenant, source) pair, tenant-major in input order.
pub fn expand(tenants: &[Tenant], sources: &[Source]) -> Vec<JobDescriptor> {
    tenants
        .iter()
        .flat_map(|tenant| {
            sources.iter().map(move |source| JobDescriptor {
                tenant: tenant.clone(),
                source: *source,
            })
        })
        .collect()
}

/// Runs all sync jobs of a run with at most `max_in_flight` in flight.
///
/// The fan-in step is the ordered join over every spawned task; it completes
/// only once each pair has produced a result. Dropping the `run` future
/// aborts the tasks it spawned.
pub struct FanOutCoordinator<S> {
    dispatcher: Arc<JobDispatcher<S>>,
    waiter: Arc<JobWaiter<S>>,
    max_in_flight: usize,
}

impl<S: SyncService + 'static> FanOutCoordinator<S> {
    pub fn new(dispatcher: JobDispatcher<S>, waiter: JobWaiter<S>, max_in_flight: usize) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            waiter: Arc::new(waiter),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Exactly one result per (tenant, source), in `expand` order.
    pub async fn run(&self, tenants: &[Tenant], sources: &[Source], ctx: &RunContext) -> Vec<SyncResult> {
        let jobs = expand(tenants, sources);
        info!(
            run_id = %ctx.run_id,
            jobs = jobs.len(),
            max_in_flight = self.max_in_flight,
            "fanning out sync jobs"
        );

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = SyncTasks {
            tasks: jobs
                .into_iter()
                .map(|job| {
                    let tenant_id = job.tenant.tenant_id().clone();
                    let source = job.source;
                    let handle = tokio::spawn(run_one(
                        self.dispatcher.clone(),
                        self.waiter.clone(),
                        permits.clone(),
                        job,
                        ctx.run_ts,
                        ctx.abort.clone(),
                    ));
                    (tenant_id, source, handle)
                })
                .collect(),
        };

        let mut results = Vec::with_capacity(tasks.tasks.len());
        for (tenant_id, source, handle) in tasks.tasks.iter_mut() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    error!(tenant_id = %tenant_id, source = %source, error = %err, "sync task ended abnormally");
                    results.push(SyncResult::not_dispatched(
                        tenant_id.clone(),
                        *source,
                        FailureKind::Panicked,
                        format!("sync task ended abnormally: {err}"),
                    ));
                }
            }
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(run_id = %ctx.run_id, jobs = results.len(), failed, "all sync jobs finished");
        results
    }
}

/// Per-pair tasks of one fan-out, in `expand` order.
///
/// Dropping the group aborts every task still running, so a cancelled run
/// leaves nothing dispatching or polling behind it.
struct SyncTasks {
    tasks: Vec<(TenantId, Source, JoinHandle<SyncResult>)>,
}

impl Drop for SyncTasks {
    fn drop(&mut self) {
        for (_, _, handle) in &self.tasks {
            handle.abort();
        }
    }
}

async fn run_one<S: SyncService>(
    dispatcher: Arc<JobDispatcher<S>>,
    waiter: Arc<JobWaiter<S>>,
    permits: Arc<Semaphore>,
    job: JobDescriptor,
    run_ts: DateTime<Utc>,
    mut abort: AbortSignal,
) -> SyncResult {
    let tenant_id = job.tenant.tenant_id().clone();

    // Held until the job is terminal so the limit covers waiting as well.
    let _permit = tokio::select! {
        biased;
        _ = abort.aborted() => {
            return SyncResult::not_dispatched(
                tenant_id,
                job.source,
                FailureKind::Aborted,
                "run aborted before dispatch",
            );
        }
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                return SyncResult::not_dispatched(
                    tenant_id,
                    job.source,
                    FailureKind::Aborted,
                    "concurrency limiter closed",
                );
            }
        },
    };

    match dispatcher
        .dispatch_with_retry(&job.tenant, job.source, run_ts, &abort)
        .await
    {
        Ok(sync_job) => waiter.wait(&sync_job, &abort).await,
        Err(failure) => failure.into_result(tenant_id, job.source),
    }
}
