//! Retry and polling policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_secs;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    #[default]
    Fixed,
    /// Exponential backoff: base * 2^(n-1)
    Exponential,
    /// Linear backoff: base * n
    Linear,
}

impl BackoffStrategy {
    /// Delay before the `n`-th wait (1-indexed), capped at `max`.
    pub fn delay(&self, base: Duration, max: Duration, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        let delay = match self {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(n - 1).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(max)
            }
            BackoffStrategy::Linear => base.checked_mul(n).unwrap_or(max),
        };
        delay.min(max.max(base))
    }
}

/// Retry policy for dispatch and stage invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    /// Base delay between attempts
    #[serde(rename = "base_delay_secs", with = "duration_secs")]
    pub base_delay: Duration,
    /// Maximum delay cap
    #[serde(rename = "max_delay_secs", with = "duration_secs")]
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(1800),
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.strategy.delay(self.base_delay, self.max_delay, retry)
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// How a job's status is polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    #[serde(rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,
    #[serde(rename = "max_interval_secs", with = "duration_secs")]
    pub max_interval: Duration,
    pub strategy: BackoffStrategy,
    /// Consecutive status errors tolerated before the job is given up on.
    pub max_status_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(300),
            strategy: BackoffStrategy::Fixed,
            max_status_errors: 5,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            strategy: BackoffStrategy::Fixed,
            ..Default::default()
        }
    }

    /// Sleep after poll number `tick` (1-indexed).
    pub fn interval_for_tick(&self, tick: u32) -> Duration {
        self.strategy.delay(self.interval, self.max_interval, tick)
    }
}
