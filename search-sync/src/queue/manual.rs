//! Job queue that runs jobs only when asked to.
//!
//! Retries are re-queued immediately instead of after their backoff, which
//! keeps tests deterministic.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::SyncError;
use crate::queue::{
    run_attempt, AttemptOutcome, Job, JobHandle, JobQueue, Priority, QueuedJob, RetryPolicy,
};

/// Counts of what happened during `ManualJobQueue::run_until_idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
    history: Vec<(JobHandle, Priority)>,
}

/// In-memory queue driven by the caller.
#[derive(Default)]
pub struct ManualJobQueue {
    lanes: Mutex<Lanes>,
}

impl ManualJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, queued: QueuedJob) {
        let mut lanes = self.lanes();
        match queued.priority {
            Priority::High => lanes.high.push_back(queued),
            Priority::Low => lanes.low.push_back(queued),
        }
    }

    fn pop(&self) -> Option<QueuedJob> {
        let mut lanes = self.lanes();
        lanes.high.pop_front().or_else(|| lanes.low.pop_front())
    }

    /// Jobs waiting to run.
    pub fn pending(&self) -> usize {
        let lanes = self.lanes();
        lanes.high.len() + lanes.low.len()
    }

    /// Every job ever scheduled, in scheduling order, with its lane.
    pub fn scheduled(&self) -> Vec<(JobHandle, Priority)> {
        self.lanes().history.clone()
    }

    /// Names of every job ever scheduled.
    pub fn scheduled_names(&self) -> Vec<String> {
        self.lanes()
            .history
            .iter()
            .map(|(handle, _)| handle.name.clone())
            .collect()
    }

    /// Drop waiting jobs without running them.
    pub fn clear(&self) {
        let mut lanes = self.lanes();
        lanes.high.clear();
        lanes.low.clear();
    }

    /// Run jobs, including jobs they schedule and their retries, until none are left.
    pub async fn run_until_idle(&self) -> RunReport {
        let mut report = RunReport::default();
        while let Some(mut queued) = self.pop() {
            match run_attempt(&mut queued).await {
                AttemptOutcome::Succeeded => report.succeeded += 1,
                AttemptOutcome::Retry => {
                    report.retried += 1;
                    self.push(queued);
                }
                AttemptOutcome::Failed => report.failed += 1,
            }
        }
        report
    }
}

impl JobQueue for ManualJobQueue {
    fn schedule(
        &self,
        job: Job,
        policy: RetryPolicy,
        priority: Priority,
    ) -> Result<JobHandle, SyncError> {
        let queued = QueuedJob::new(job, policy, priority);
        let handle = queued.handle.clone();
        self.lanes().history.push((handle.clone(), priority));
        self.push(queued);
        Ok(handle)
    }
}
