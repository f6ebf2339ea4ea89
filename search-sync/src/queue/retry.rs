//! Retry policies with exponential backoff.

use std::time::Duration;

use rand::Rng;

/// Maximum retries of a sync task.
pub const SYNC_TASK_MAX_RETRIES: u32 = 15;

/// Delay before the first retry.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound of a single retry delay.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(600);

/// How often and how patiently a failed job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero means the job runs once.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Draw each delay uniformly from zero up to the computed backoff.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Policy of sync tasks: 15 retries with jittered exponential backoff.
    pub fn sync_task() -> Self {
        Self {
            max_retries: SYNC_TASK_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// The un-jittered delay doubles with every retry, starting at
    /// `initial_backoff` and capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);

        if self.jitter && !delay.is_zero() {
            let millis = delay.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::sync_task()
    }
}
