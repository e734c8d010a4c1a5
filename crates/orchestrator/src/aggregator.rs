//! Run classification and alerting.

use tracing::{error, info};

use tenantflow_core::{Incident, RunId, RunOutcome, StageResult, SyncResult};
use tenantflow_infra::IncidentSink;

/// Observes every terminal result of a run, classifies it and raises an
/// incident when anything failed.
pub struct FailureAggregator<I> {
    sink: I,
}

impl<I: IncidentSink> FailureAggregator<I> {
    pub fn new(sink: I) -> Self {
        Self { sink }
    }

    /// Raises an incident iff the outcome is not `Succeeded` and returns it
    /// alongside the outcome. Delivery failures are logged and do not change
    /// either.
    pub async fn evaluate(
        &self,
        run_id: RunId,
        sync_results: &[SyncResult],
        transform: &StageResult,
        validation: &StageResult,
    ) -> (RunOutcome, Option<Incident>) {
        let outcome = RunOutcome::evaluate(sync_results, transform, validation);
        let incident = Incident::from_outcome(run_id, &outcome);

        match &incident {
            None => info!(run_id = %run_id, "run succeeded"),
            Some(incident) => {
                if let Err(err) = self.sink.raise(incident).await {
                    error!(
                        run_id = %run_id,
                        error = %err,
                        summary = %incident.summary(),
                        "could not deliver incident"
                    );
                }
            }
        }

        (outcome, incident)
    }
}
