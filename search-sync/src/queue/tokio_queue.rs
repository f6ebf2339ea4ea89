//! Job queue running on tokio worker tasks.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::errors::SyncError;
use crate::queue::{
    run_attempt, AttemptOutcome, Job, JobHandle, JobQueue, Priority, QueuedJob, RetryPolicy,
};

/// Configuration for the job queue.
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Maximum number of jobs running at once.
    pub concurrency: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

struct Lanes {
    high: mpsc::UnboundedReceiver<QueuedJob>,
    low: mpsc::UnboundedReceiver<QueuedJob>,
}

/// Job queue with two priority lanes and bounded concurrency.
///
/// Jobs are accepted as soon as the queue is created and start running once
/// `run` is called. Failed attempts are re-enqueued after their backoff
/// delay, so a waiting retry never occupies a worker.
pub struct TokioJobQueue {
    high_tx: mpsc::UnboundedSender<QueuedJob>,
    low_tx: mpsc::UnboundedSender<QueuedJob>,
    lanes: Mutex<Option<Lanes>>,
    config: JobQueueConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl TokioJobQueue {
    /// Create a new queue with default configuration.
    pub fn new() -> Self {
        Self::with_config(JobQueueConfig::default())
    }

    /// Create a new queue with custom configuration.
    pub fn with_config(config: JobQueueConfig) -> Self {
        let (high_tx, high) = mpsc::unbounded_channel();
        let (low_tx, low) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            high_tx,
            low_tx,
            lanes: Mutex::new(Some(Lanes { high, low })),
            config,
            shutdown_tx,
        }
    }

    fn sender(&self, priority: Priority) -> &mpsc::UnboundedSender<QueuedJob> {
        match priority {
            Priority::High => &self.high_tx,
            Priority::Low => &self.low_tx,
        }
    }

    /// Signal `run` to stop taking new jobs. Also stops a `run` started later.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Run jobs until `shutdown` is called.
    ///
    /// Waits for running attempts to finish before returning. Jobs still
    /// queued at shutdown are dropped. Calling `run` a second time returns
    /// immediately with an error.
    #[instrument(skip(self), fields(concurrency = self.config.concurrency))]
    pub async fn run(&self) -> Result<(), SyncError> {
        let Some(mut lanes) = self.lanes.lock().await.take() else {
            return Err(SyncError::queue("job queue is already running"));
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));

        info!("Job queue started");

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let queued = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
                Some(queued) = lanes.high.recv() => queued,
                Some(queued) = lanes.low.recv() => queued,
                else => break,
            };

            let retry_tx = self.sender(queued.priority).clone();
            tokio::spawn(async move {
                let mut queued = queued;
                let outcome = run_attempt(&mut queued).await;
                drop(permit);

                if outcome == AttemptOutcome::Retry {
                    let delay = queued.policy.backoff(queued.attempts);
                    debug!(
                        job = %queued.handle,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling retry"
                    );
                    sleep(delay).await;
                    // the queue may have shut down while waiting
                    let _ = retry_tx.send(queued);
                }
            });
        }

        // wait for running attempts
        let _ = permits.acquire_many(concurrency as u32).await;
        info!("Job queue stopped");
        Ok(())
    }
}

impl Default for TokioJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for TokioJobQueue {
    fn schedule(
        &self,
        job: Job,
        policy: RetryPolicy,
        priority: Priority,
    ) -> Result<JobHandle, SyncError> {
        let queued = QueuedJob::new(job, policy, priority);
        let handle = queued.handle.clone();
        self.sender(priority)
            .send(queued)
            .map_err(|_| SyncError::queue("job queue is closed"))?;
        debug!(job = %handle, priority = ?priority, "Job scheduled");
        Ok(handle)
    }
}
