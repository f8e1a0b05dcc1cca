//! A [`JobSink`] that records jobs instead of running them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_runtime::{Job, JobSink, RuntimeError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Captures every enqueued job with its due time
#[derive(Debug)]
pub struct RecordingJobSink<J> {
    jobs: Mutex<Vec<(Option<DateTime<Utc>>, J)>>,
    rejecting: AtomicBool,
}

impl<J: Job> RecordingJobSink<J> {
    /// Empty recorder that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            rejecting: AtomicBool::new(false),
        }
    }

    /// Refuse (or accept again) every later job, as a dispatcher shutting down would
    pub fn reject_all(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::Release);
    }

    /// Recorded jobs, in enqueue order
    pub async fn jobs(&self) -> Vec<J> {
        self.jobs.lock().await.iter().map(|(_, job)| job.clone()).collect()
    }

    /// Recorded jobs with their due times
    pub async fn scheduled(&self) -> Vec<(Option<DateTime<Utc>>, J)> {
        self.jobs.lock().await.clone()
    }

    /// Remove and return everything recorded so far
    pub async fn take(&self) -> Vec<J> {
        self.jobs.lock().await.drain(..).map(|(_, job)| job).collect()
    }

    /// Number of recorded jobs of the given kind
    pub async fn count_kind(&self, kind: &str) -> usize {
        self.jobs.lock().await.iter().filter(|(_, job)| job.kind() == kind).count()
    }
}

impl<J: Job> Default for RecordingJobSink<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<J: Job> JobSink<J> for RecordingJobSink<J> {
    async fn enqueue(&self, job: J, run_at: Option<DateTime<Utc>>) -> Result<(), RuntimeError> {
        if self.rejecting.load(Ordering::Acquire) {
            return Err(RuntimeError::ShuttingDown);
        }
        self.jobs.lock().await.push((run_at, job));
        Ok(())
    }
}
