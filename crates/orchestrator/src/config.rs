//! Run configuration.
//!
//! Built once before a run and passed in explicitly; a run never mutates it.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tenantflow_core::{PipelineError, PipelineResult, Source};

use crate::retry::{PollPolicy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sources synced for every tenant, in result order.
    pub sources: Vec<Source>,
    /// Upper bound on concurrently dispatched/polled jobs.
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    /// Wall-clock budget for waiting on a single job.
    #[serde(rename = "job_timeout_secs", with = "duration_secs")]
    pub job_timeout: Duration,
    /// Wall-clock budget for a single stage attempt.
    #[serde(rename = "stage_timeout_secs", with = "duration_secs")]
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: Source::ALL.to_vec(),
            max_in_flight: 8,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            job_timeout: Duration::from_secs(45 * 60),
            stage_timeout: Duration::from_secs(45 * 60),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| PipelineError::configuration(format!("malformed pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `TENANTFLOW_*` environment overrides.
    pub fn apply_env_overrides(self) -> PipelineResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<usize>(&lookup, "TENANTFLOW_MAX_IN_FLIGHT")? {
            self.max_in_flight = v;
        }
        if let Some(v) = parse_override::<u64>(&lookup, "TENANTFLOW_JOB_TIMEOUT_SECS")? {
            self.job_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_override::<u32>(&lookup, "TENANTFLOW_MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = parse_override::<u64>(&lookup, "TENANTFLOW_POLL_INTERVAL_SECS")? {
            self.poll.interval = Duration::from_secs(v);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::configuration("at least one source is required"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.sources.iter().find(|s| !seen.insert(**s)) {
            return Err(PipelineError::configuration(format!("duplicate source: {dup}")));
        }
        if self.max_in_flight == 0 {
            return Err(PipelineError::configuration("max_in_flight must be at least 1"));
        }
        if self.job_timeout.is_zero() {
            return Err(PipelineError::configuration("job_timeout must be positive"));
        }
        if self.stage_timeout.is_zero() {
            return Err(PipelineError::configuration("stage_timeout must be positive"));
        }
        if self.poll.interval.is_zero() {
            return Err(PipelineError::configuration("poll interval must be positive"));
        }
        Ok(())
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> PipelineResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PipelineError::configuration(format!("{key}={raw:?}: {e}"))),
    }
}

/// Serde helper: `Duration` as whole seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
