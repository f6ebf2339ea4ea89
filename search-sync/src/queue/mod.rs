//! Background job queue.
//!
//! Sync, deletion and migration work runs outside the request path. The
//! `JobQueue` trait is the seam: `TokioJobQueue` runs jobs on worker tasks
//! with retries, `ManualJobQueue` runs them on demand in tests.
//!
//! Delivery is at-least-once: a retried job may run after a partially
//! successful attempt, so every job must be idempotent.

mod manual;
mod retry;
mod tokio_queue;

pub use manual::{ManualJobQueue, RunReport};
pub use retry::{RetryPolicy, SYNC_TASK_MAX_RETRIES};
pub use tokio_queue::{JobQueueConfig, TokioJobQueue};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::SyncError;

/// Future produced by one attempt of a job.
pub type JobFuture = BoxFuture<'static, Result<(), SyncError>>;

/// A named, re-runnable unit of background work.
#[derive(Clone)]
pub struct Job {
    pub name: String,
    run: Arc<dyn Fn() -> JobFuture + Send + Sync>,
}

impl Job {
    /// Create a job from a closure producing one attempt.
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move || -> JobFuture { Box::pin(run()) }),
        }
    }

    /// Start one attempt.
    pub fn run(&self) -> JobFuture {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}

/// Scheduling lane. Low priority jobs run only when no high priority job waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    High,
    Low,
}

/// Identifies a scheduled job in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
    pub name: String,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.id)
    }
}

/// Accepts jobs for background execution.
pub trait JobQueue: Send + Sync {
    /// Schedule a job. Never blocks on the job itself.
    fn schedule(
        &self,
        job: Job,
        policy: RetryPolicy,
        priority: Priority,
    ) -> Result<JobHandle, SyncError>;
}

/// A job waiting in a queue along with its retry bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct QueuedJob {
    pub handle: JobHandle,
    pub job: Job,
    pub policy: RetryPolicy,
    pub priority: Priority,
    /// Attempts already made.
    pub attempts: u32,
}

impl QueuedJob {
    pub fn new(job: Job, policy: RetryPolicy, priority: Priority) -> Self {
        Self {
            handle: JobHandle {
                id: Uuid::new_v4(),
                name: job.name.clone(),
            },
            job,
            policy,
            priority,
            attempts: 0,
        }
    }
}

/// What to do with a job after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Succeeded,
    Retry,
    Failed,
}

/// Run one attempt of a queued job and decide whether it should be retried.
pub(crate) async fn run_attempt(queued: &mut QueuedJob) -> AttemptOutcome {
    queued.attempts += 1;
    match queued.job.run().await {
        Ok(()) => AttemptOutcome::Succeeded,
        Err(e) if e.is_retryable() && queued.policy.should_retry(queued.attempts) => {
            warn!(
                job = %queued.handle,
                attempt = queued.attempts,
                error = %e,
                "Job failed, retrying"
            );
            AttemptOutcome::Retry
        }
        Err(e) => {
            error!(
                job = %queued.handle,
                attempts = queued.attempts,
                error = %e,
                "Job failed permanently"
            );
            AttemptOutcome::Failed
        }
    }
}
