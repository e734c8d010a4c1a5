//! Operational metrics for a pipeline run.
//!
//! Sinks are fire-and-forget: `emit` returns nothing and implementations must
//! swallow their own delivery problems so a metrics outage never fails a run.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use ::tracing::{debug, info};

use tenantflow_core::{
    RunId, Source, StageKind, StageResult, StageStatus, SyncResult, SyncStatus, TenantId,
};

/// Per-(tenant, source) metric row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMetric {
    pub tenant_id: TenantId,
    pub source: Source,
    pub status: SyncStatus,
    pub rows_loaded: u64,
    pub duration_ms: u64,
}

/// Per-stage metric row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetric {
    pub stage: StageKind,
    pub status: StageStatus,
    pub attempts: u32,
    pub values: BTreeMap<String, f64>,
}

/// Aggregated metrics for one emission.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RunMetrics {
    pub run_id: Option<RunId>,
    pub jobs_total: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_timed_out: usize,
    pub rows_loaded: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
    pub jobs: Vec<JobMetric>,
    pub stages: Vec<StageMetric>,
}

impl RunMetrics {
    pub fn from_results(
        run_id: RunId,
        sync_results: &[SyncResult],
        stage_results: &[StageResult],
    ) -> Self {
        let mut metrics = RunMetrics {
            run_id: Some(run_id),
            jobs_total: sync_results.len(),
            ..Default::default()
        };

        for result in sync_results {
            let duration_ms = u64::try_from(result.duration().as_millis()).unwrap_or(u64::MAX);
            match result.status() {
                SyncStatus::Succeeded => metrics.jobs_succeeded += 1,
                SyncStatus::Failed => metrics.jobs_failed += 1,
                SyncStatus::TimedOut => metrics.jobs_timed_out += 1,
            }
            metrics.rows_loaded = metrics.rows_loaded.saturating_add(result.rows_loaded());
            metrics.total_duration_ms = metrics.total_duration_ms.saturating_add(duration_ms);
            metrics.max_duration_ms = metrics.max_duration_ms.max(duration_ms);
            metrics.jobs.push(JobMetric {
                tenant_id: result.tenant_id().clone(),
                source: result.source(),
                status: result.status(),
                rows_loaded: result.rows_loaded(),
                duration_ms,
            });
        }

        metrics.stages = stage_results
            .iter()
            .map(|s| StageMetric {
                stage: s.stage(),
                status: s.status(),
                attempts: s.attempts(),
                values: s.metrics().clone(),
            })
            .collect();

        metrics
    }
}

/// Receives per-run operational metrics.
pub trait MetricsSink: Send + Sync {
    /// Must return promptly and never panic.
    fn emit(&self, run_id: RunId, sync_results: &[SyncResult], stage_results: &[StageResult]);
}

/// Writes metrics as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, run_id: RunId, sync_results: &[SyncResult], stage_results: &[StageResult]) {
        let metrics = RunMetrics::from_results(run_id, sync_results, stage_results);

        if metrics.jobs_total > 0 {
            info!(
                run_id = %run_id,
                jobs_total = metrics.jobs_total,
                jobs_succeeded = metrics.jobs_succeeded,
                jobs_failed = metrics.jobs_failed,
                jobs_timed_out = metrics.jobs_timed_out,
                rows_loaded = metrics.rows_loaded,
                max_duration_ms = metrics.max_duration_ms,
                "sync metrics"
            );
        }

        for job in &metrics.jobs {
            debug!(
                run_id = %run_id,
                tenant_id = %job.tenant_id,
                source = %job.source,
                status = ?job.status,
                rows_loaded = job.rows_loaded,
                duration_ms = job.duration_ms,
                "sync job metric"
            );
        }

        for stage in &metrics.stages {
            info!(
                run_id = %run_id,
                stage = %stage.stage,
                status = ?stage.status,
                attempts = stage.attempts,
                values = ?stage.values,
                "stage metrics"
            );
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    inner: Mutex<Vec<RunMetrics>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<RunMetrics> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn emit(&self, run_id: RunId, sync_results: &[SyncResult], stage_results: &[StageResult]) {
        let metrics = RunMetrics::from_results(run_id, sync_results, stage_results);
        if let Ok(mut guard) = self.inner.lock() {
            guard.push(metrics);
        }
    }
}
