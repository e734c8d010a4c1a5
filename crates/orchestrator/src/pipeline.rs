//! One scheduled pipeline run, end to end.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument, info, info_span};

use tenantflow_core::{
    Incident, PipelineError, PipelineResult, RunId, RunOutcome, StageResult, SyncResult, Tenant,
};
use tenantflow_infra::{Clock, IncidentSink, StageInvoker, SyncService, TenantSource};
use tenantflow_observability::MetricsSink;

use crate::aggregator::FailureAggregator;
use crate::config::PipelineConfig;
use crate::context::{AbortHandle, AbortSignal, RunContext};
use crate::coordinator::FanOutCoordinator;
use crate::dispatcher::JobDispatcher;
use crate::stages::StageRunner;
use crate::waiter::JobWaiter;

/// External collaborators of a pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub tenants: Arc<dyn TenantSource>,
    pub sync_service: Arc<dyn SyncService>,
    pub stages: Arc<dyn StageInvoker>,
    pub metrics: Arc<dyn MetricsSink>,
    pub incidents: Arc<dyn IncidentSink>,
    pub clock: Arc<dyn Clock>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub run_ts: DateTime<Utc>,
    pub sync_results: Vec<SyncResult>,
    pub transform: StageResult,
    pub validation: StageResult,
    pub outcome: RunOutcome,
    /// The incident handed to the sink, if the run did not succeed.
    pub incident: Option<Incident>,
}

impl RunReport {
    pub fn incident_raised(&self) -> bool {
        self.incident.is_some()
    }
}

/// fan-out sync -> fan-in -> transform -> validate -> aggregate.
pub struct Pipeline {
    config: PipelineConfig,
    tenants: Arc<dyn TenantSource>,
    coordinator: FanOutCoordinator<Arc<dyn SyncService>>,
    stages: StageRunner<Arc<dyn StageInvoker>>,
    aggregator: FailureAggregator<Arc<dyn IncidentSink>>,
    metrics: Arc<dyn MetricsSink>,
    abort_tx: Arc<watch::Sender<bool>>,
    active: AtomicBool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> PipelineResult<Self> {
        config.validate()?;

        let dispatcher = JobDispatcher::new(
            deps.sync_service.clone(),
            deps.clock.clone(),
            config.retry.clone(),
        );
        let waiter = JobWaiter::new(deps.sync_service, config.poll.clone(), config.job_timeout);
        let coordinator = FanOutCoordinator::new(dispatcher, waiter, config.max_in_flight);
        let stages = StageRunner::new(deps.stages, config.retry.clone(), config.stage_timeout);
        let (abort_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            tenants: deps.tenants,
            coordinator,
            stages,
            aggregator: FailureAggregator::new(deps.incidents),
            metrics: deps.metrics,
            abort_tx: Arc::new(abort_tx),
            active: AtomicBool::new(false),
        })
    }

    /// Handle for aborting the run in progress. An abort only affects a run
    /// that is already active; each new run starts un-aborted.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.abort_tx.clone())
    }

    /// Execute one run for the schedule tick `run_ts`.
    ///
    /// Errors only for faults that prevent any job from being dispatched;
    /// job and stage failures are reported in the returned `RunReport`.
    pub async fn run(&self, run_ts: DateTime<Utc>) -> PipelineResult<RunReport> {
        let _guard = RunGuard::acquire(&self.active)?;

        self.abort_tx.send_replace(false);
        let ctx = RunContext::new(
            RunId::new(),
            run_ts,
            AbortSignal::from_receiver(self.abort_tx.subscribe()),
        );
        let span = info_span!("pipeline_run", run_id = %ctx.run_id, run_ts = %run_ts);

        self.execute(ctx).instrument(span).await
    }

    async fn execute(&self, ctx: RunContext) -> PipelineResult<RunReport> {
        let tenants = self.tenants.load().await?;
        ensure_runnable(&tenants)?;
        info!(
            tenants = tenants.len(),
            sources = self.config.sources.len(),
            "starting run"
        );

        let sync_results = self
            .coordinator
            .run(&tenants, &self.config.sources, &ctx)
            .await;
        let (transform, validation) = self.stages.run_all(&ctx.abort).await;
        self.metrics.emit(
            ctx.run_id,
            &sync_results,
            &[transform.clone(), validation.clone()],
        );

        let (outcome, incident) = self
            .aggregator
            .evaluate(ctx.run_id, &sync_results, &transform, &validation)
            .await;

        info!(
            overall = ?outcome.overall,
            failed_jobs = outcome.failed_jobs.len(),
            transform_failed = outcome.transform_failed,
            validation_failed = outcome.validation_failed,
            "run finished"
        );

        Ok(RunReport {
            run_id: ctx.run_id,
            run_ts: ctx.run_ts,
            sync_results,
            transform,
            validation,
            outcome,
            incident,
        })
    }
}

/// A run needs at least one tenant, and each tenant at most once: a repeated
/// tenant id would share idempotency tokens with its twin.
fn ensure_runnable(tenants: &[Tenant]) -> PipelineResult<()> {
    if tenants.is_empty() {
        return Err(PipelineError::NoTenants);
    }
    let mut seen = HashSet::new();
    if let Some(dup) = tenants.iter().find(|t| !seen.insert(t.tenant_id())) {
        return Err(PipelineError::configuration(format!(
            "duplicate tenant_id: {}",
            dup.tenant_id()
        )));
    }
    Ok(())
}

/// Marks a pipeline as running until dropped.
struct RunGuard<'a> {
    active: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(active: &'a AtomicBool) -> PipelineResult<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::RunAlreadyActive)?;
        Ok(Self { active })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use tenantflow_core::TenantId;
    use tenantflow_infra::{
        InMemoryIncidentSink, InMemorySyncService, ScriptedStageInvoker, StaticTenantSource,
        SystemClock,
    };
    use tenantflow_observability::InMemoryMetricsSink;

    use super::*;

    fn deps() -> PipelineDeps {
        PipelineDeps {
            tenants: Arc::new(StaticTenantSource::default()),
            sync_service: Arc::new(InMemorySyncService::new()),
            stages: Arc::new(ScriptedStageInvoker::new()),
            metrics: Arc::new(InMemoryMetricsSink::new()),
            incidents: Arc::new(InMemoryIncidentSink::new()),
            clock: Arc::new(SystemClock),
        }
    }

    #[test]
    fn guard_rejects_second_holder() {
        let active = AtomicBool::new(false);
        let first = RunGuard::acquire(&active).unwrap();

        assert_eq!(
            RunGuard::acquire(&active).err(),
            Some(PipelineError::RunAlreadyActive)
        );
        drop(first);
        assert!(RunGuard::acquire(&active).is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new(config, deps()),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn repeated_tenant_ids_are_rejected() {
        let tenant = |id: &str| Tenant::new(TenantId::new(id).unwrap());

        assert!(ensure_runnable(&[tenant("a"), tenant("b")]).is_ok());
        assert_eq!(ensure_runnable(&[]), Err(PipelineError::NoTenants));
        assert_eq!(
            ensure_runnable(&[tenant("a"), tenant("b"), tenant("a")]),
            Err(PipelineError::configuration("duplicate tenant_id: a"))
        );
    }

    #[tokio::test]
    async fn failed_tenant_load_releases_the_guard() {
        let pipeline = Pipeline::new(PipelineConfig::default(), deps()).unwrap();

        assert_eq!(pipeline.run(Utc::now()).await.unwrap_err(), PipelineError::NoTenants);
        assert_eq!(pipeline.run(Utc::now()).await.unwrap_err(), PipelineError::NoTenants);
    }
}
