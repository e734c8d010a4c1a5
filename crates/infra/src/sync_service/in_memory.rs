//! In-memory sync service for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use tenantflow_core::{ConnectionId, IdempotencyToken, SyncJobId};

use super::{JobStatusReport, SyncService, SyncServiceError};

#[derive(Debug)]
struct JobRecord {
    connection_id: ConnectionId,
    statuses: VecDeque<JobStatusReport>,
    polls: usize,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<ConnectionId, Vec<JobStatusReport>>,
    trigger_errors: HashMap<ConnectionId, VecDeque<SyncServiceError>>,
    status_errors: HashMap<ConnectionId, VecDeque<SyncServiceError>>,
    jobs: HashMap<SyncJobId, JobRecord>,
    tokens: HashMap<IdempotencyToken, SyncJobId>,
    trigger_calls: HashMap<ConnectionId, usize>,
    next_job: u64,
}

/// Scripted sync service.
///
/// - Each connection has a status script; every job started for it walks the
///   script one report per `status` call and then repeats the last report.
///   Without a script a job succeeds immediately with zero rows.
/// - Trigger errors are queued per connection and consumed one per call.
/// - Triggers are deduplicated by idempotency token.
#[derive(Debug, Default)]
pub struct InMemorySyncService {
    state: Mutex<State>,
}

impl InMemorySyncService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status reports returned for jobs of `connection_id`, in order.
    pub fn script(&self, connection_id: &ConnectionId, statuses: Vec<JobStatusReport>) {
        self.state().scripts.insert(connection_id.clone(), statuses);
    }

    /// Jobs for `connection_id` never leave the running state.
    pub fn stay_running(&self, connection_id: &ConnectionId) {
        self.script(connection_id, vec![JobStatusReport::running()]);
    }

    /// Errors returned by the next trigger calls for `connection_id`.
    pub fn fail_triggers(&self, connection_id: &ConnectionId, errors: Vec<SyncServiceError>) {
        self.state()
            .trigger_errors
            .entry(connection_id.clone())
            .or_default()
            .extend(errors);
    }

    /// Errors returned by the next status calls for jobs of `connection_id`.
    pub fn fail_status(&self, connection_id: &ConnectionId, errors: Vec<SyncServiceError>) {
        self.state()
            .status_errors
            .entry(connection_id.clone())
            .or_default()
            .extend(errors);
    }

    /// Number of trigger calls made for `connection_id` (including failed ones).
    pub fn trigger_calls(&self, connection_id: &ConnectionId) -> usize {
        self.state()
            .trigger_calls
            .get(connection_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct jobs started.
    pub fn jobs_started(&self) -> usize {
        self.state().jobs.len()
    }

    /// Number of status calls served for `job_id`.
    pub fn polls(&self, job_id: &SyncJobId) -> usize {
        self.state().jobs.get(job_id).map(|j| j.polls).unwrap_or(0)
    }
}

#[async_trait]
impl SyncService for InMemorySyncService {
    async fn trigger(
        &self,
        connection_id: &ConnectionId,
        token: &IdempotencyToken,
    ) -> Result<SyncJobId, SyncServiceError> {
        let mut state = self.state();
        *state.trigger_calls.entry(connection_id.clone()).or_default() += 1;

        if let Some(err) = state
            .trigger_errors
            .get_mut(connection_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        if let Some(existing) = state.tokens.get(token) {
            return Ok(existing.clone());
        }

        state.next_job += 1;
        let job_id = SyncJobId::new(format!("job-{}-{}", connection_id, state.next_job))
            .map_err(|e| SyncServiceError::Rejected(e.to_string()))?;

        let statuses = state
            .scripts
            .get(connection_id)
            .cloned()
            .unwrap_or_else(|| vec![JobStatusReport::succeeded(0)]);

        state.jobs.insert(
            job_id.clone(),
            JobRecord {
                connection_id: connection_id.clone(),
                statuses: statuses.into(),
                polls: 0,
            },
        );
        state.tokens.insert(token.clone(), job_id.clone());

        Ok(job_id)
    }

    async fn status(&self, job_id: &SyncJobId) -> Result<JobStatusReport, SyncServiceError> {
        let mut state = self.state();
        let State {
            jobs,
            status_errors,
            ..
        } = &mut *state;

        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SyncServiceError::UnknownJob(job_id.clone()))?;
        job.polls += 1;

        if let Some(err) = status_errors
            .get_mut(&job.connection_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let report = if job.statuses.len() > 1 {
            job.statuses.pop_front()
        } else {
            job.statuses.front().cloned()
        };

        Ok(report.unwrap_or_else(JobStatusReport::running))
    }
}
