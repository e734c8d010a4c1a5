//! Shared transform and validation stages.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use tenantflow_core::{StageKind, StageResult};
use tenantflow_infra::StageInvoker;

use crate::context::AbortSignal;
use crate::retry::RetryPolicy;

/// Runs each stage once per run, retrying its invocation under the run's
/// retry policy. Every attempt is bounded by `stage_timeout`.
pub struct StageRunner<T> {
    invoker: T,
    retry: RetryPolicy,
    stage_timeout: Duration,
}

impl<T: StageInvoker> StageRunner<T> {
    pub fn new(invoker: T, retry: RetryPolicy, stage_timeout: Duration) -> Self {
        Self {
            invoker,
            retry,
            stage_timeout,
        }
    }

    /// Run `stage` to a terminal result. Never errors: every failure mode
    /// becomes a `Failed` result with detail.
    pub async fn run_stage(&self, stage: StageKind, abort: &AbortSignal) -> StageResult {
        let mut abort = abort.clone();
        if abort.is_aborted() {
            return StageResult::skipped(stage, "run aborted");
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = abort.aborted() => {
                    return StageResult::failed(stage, "run aborted during stage", BTreeMap::new(), attempts);
                }
                outcome = tokio::time::timeout(self.stage_timeout, self.invoker.invoke(stage)) => outcome,
            };

            let (detail, metrics) = match outcome {
                Ok(Ok(summary)) if summary.is_success() => {
                    info!(stage = %stage, attempts, "stage succeeded");
                    return StageResult::succeeded(stage, summary.metrics_for(stage), attempts);
                }
                Ok(Ok(summary)) => (
                    summary
                        .failure_detail()
                        .unwrap_or_else(|| format!("{stage} reported failure")),
                    summary.metrics_for(stage),
                ),
                Ok(Err(err)) => (err.to_string(), BTreeMap::new()),
                Err(_) => (
                    format!("{stage} attempt exceeded {}s", self.stage_timeout.as_secs()),
                    BTreeMap::new(),
                ),
            };

            if !self.retry.should_retry(attempts - 1) {
                warn!(stage = %stage, attempts, error = %detail, "stage failed");
                return StageResult::failed(stage, detail, metrics, attempts);
            }

            let delay = self.retry.delay_for_retry(attempts);
            warn!(
                stage = %stage,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %detail,
                "stage attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = abort.aborted() => {
                    return StageResult::failed(
                        stage,
                        format!("run aborted while retrying: {detail}"),
                        metrics,
                        attempts,
                    );
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn run_transform(&self, abort: &AbortSignal) -> StageResult {
        self.run_stage(StageKind::Transform, abort).await
    }

    /// Runs whether or not the transform succeeded, flagging the result when
    /// it did not.
    pub async fn run_validation(&self, transform: &StageResult, abort: &AbortSignal) -> StageResult {
        self.run_stage(StageKind::Validation, abort)
            .await
            .with_upstream_failed(!transform.is_success())
    }

    /// Transform then validation, strictly in sequence.
    pub async fn run_all(&self, abort: &AbortSignal) -> (StageResult, StageResult) {
        let transform = self.run_transform(abort).await;
        let validation = self.run_validation(&transform, abort).await;
        (transform, validation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tenantflow_core::StageStatus;
    use tenantflow_infra::{RunResultsSummary, ScriptedStageInvoker, StageInvocationError};

    use super::*;

    fn runner(invoker: Arc<ScriptedStageInvoker>, max_retries: u32) -> StageRunner<Arc<ScriptedStageInvoker>> {
        StageRunner::new(
            invoker,
            RetryPolicy::fixed(max_retries, Duration::from_secs(300)),
            Duration::from_secs(2700),
        )
    }

    fn built(models: u64, rows: u64) -> RunResultsSummary {
        RunResultsSummary {
            models_built: models,
            rows_changed_est: rows,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_reports_stage_metrics() {
        let invoker = Arc::new(ScriptedStageInvoker::new());
        invoker.script(StageKind::Transform, vec![Ok(built(12, 3_400))]);

        let result = runner(invoker, 2).run_transform(&AbortSignal::never()).await;

        assert_eq!(result.status(), StageStatus::Succeeded);
        assert_eq!(result.metric("models_built"), Some(12.0));
        assert_eq!(result.metric("rows_changed_est"), Some(3_400.0));
        assert_eq!(result.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_tool_is_retried() {
        let invoker = Arc::new(ScriptedStageInvoker::new());
        invoker.script(
            StageKind::Transform,
            vec![
                Err(StageInvocationError::Unavailable("warehouse locked".into())),
                Ok(built(5, 10)),
            ],
        );

        let result = runner(invoker.clone(), 2).run_transform(&AbortSignal::never()).await;

        assert!(result.is_success());
        assert_eq!(result.attempts(), 2);
        assert_eq!(invoker.call_count(StageKind::Transform), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_with_last_detail() {
        let invoker = Arc::new(ScriptedStageInvoker::new());
        let failing = RunResultsSummary {
            tests_passed: 40,
            tests_failed: 2,
            errors: vec!["not_null_orders_id failed".to_string()],
            ..Default::default()
        };
        invoker.script(StageKind::Validation, vec![Ok(failing)]);

        let transform = StageResult::succeeded(StageKind::Transform, BTreeMap::new(), 1);
        let result = runner(invoker.clone(), 2)
            .run_validation(&transform, &AbortSignal::never())
            .await;

        assert_eq!(result.status(), StageStatus::Failed);
        assert_eq!(result.attempts(), 3);
        assert_eq!(result.error_detail(), Some("not_null_orders_id failed"));
        assert_eq!(result.metric("tests_failed"), Some(2.0));
        assert!(!result.upstream_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn validation_runs_after_failed_transform() {
        let invoker = Arc::new(ScriptedStageInvoker::new());
        invoker.script(
            StageKind::Transform,
            vec![Err(StageInvocationError::MalformedArtifact("truncated".into()))],
        );

        let (transform, validation) = runner(invoker.clone(), 0).run_all(&AbortSignal::never()).await;

        assert!(!transform.is_success());
        assert!(validation.is_success());
        assert!(validation.upstream_failed());
        assert_eq!(invoker.calls(), vec![StageKind::Transform, StageKind::Validation]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let invoker = Arc::new(ScriptedStageInvoker::new());
        invoker.delay(StageKind::Transform, Duration::from_secs(3600));

        let result = runner(invoker, 0).run_transform(&AbortSignal::never()).await;

        assert!(!result.is_success());
        assert!(result.error_detail().unwrap().contains("exceeded 2700s"));
    }

    #[tokio::test]
    async fn aborted_run_skips_stages() {
        let invoker = Arc::new(ScriptedStageInvoker::new());
        let (handle, signal) = AbortSignal::pair();
        handle.abort();

        let (transform, validation) = runner(invoker.clone(), 2).run_all(&signal).await;

        assert_eq!(transform.error_detail(), Some("skipped: run aborted"));
        assert_eq!(transform.attempts(), 0);
        assert!(validation.upstream_failed());
        assert!(invoker.calls().is_empty());
    }
}
