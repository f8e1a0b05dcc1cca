//! At-least-once job execution.
//!
//! Reducers describe work as [`Effect`]s; services hand the jobs inside them to a
//! [`JobSink`] once the state change is committed. [`JobDispatcher`] is the
//! production sink: a bounded queue drained by a worker that runs each job on
//! its own task, retrying transient failures per the configured
//! [`RetryPolicy`].
//!
//! Scheduled jobs wait on a timer task until their due time. Timers do not
//! survive a restart; periodic sweeps pick up whatever they would have done.

use crate::error::RuntimeError;
use crate::retry::{RetryPolicy, retry_with_predicate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::effect::Effect;
use coachline_core::environment::Clock;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

/// A unit of background work
pub trait Job: Clone + Debug + Send + Sync + 'static {
    /// Short label used in logs and metrics
    fn kind(&self) -> &'static str;
}

/// Why a job attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Worth retrying (timeouts, unavailable collaborators)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl JobError {
    /// Whether the dispatcher should retry
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Executes jobs. Handlers must be idempotent: a job may run more than once.
#[async_trait]
pub trait JobHandler<J: Job>: Send + Sync {
    /// Run one attempt of `job`
    ///
    /// # Errors
    ///
    /// [`JobError::Transient`] to request a retry, [`JobError::Permanent`] to give up.
    async fn handle(&self, job: &J) -> Result<(), JobError>;
}

/// Accepts jobs for asynchronous execution
#[async_trait]
pub trait JobSink<J: Job>: Send + Sync {
    /// Queue `job` to run now, or not before `run_at`
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ShuttingDown`], [`RuntimeError::QueueFull`] or
    /// [`RuntimeError::QueueClosed`]. Never waits for queue space.
    async fn enqueue(&self, job: J, run_at: Option<DateTime<Utc>>) -> Result<(), RuntimeError>;
}

/// Hand every job carried by `effects` to `sink`.
///
/// Enqueue failures are logged and skipped; they never undo the state change the
/// effects belong to. Returns how many jobs were accepted.
pub async fn submit_effects<J, I>(sink: &dyn JobSink<J>, effects: I) -> usize
where
    J: Job,
    I: IntoIterator<Item = Effect<J>>,
{
    let mut accepted = 0;
    for effect in effects {
        for (run_at, job) in effect.into_jobs() {
            let kind = job.kind();
            match sink.enqueue(job, run_at).await {
                Ok(()) => accepted += 1,
                Err(error) => {
                    tracing::warn!(job = kind, %error, "Failed to enqueue job");
                    metrics::counter!("jobs_enqueue_failed_total", "kind" => kind).increment(1);
                }
            }
        }
    }
    accepted
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Jobs buffered before `enqueue` fails with [`RuntimeError::QueueFull`]
    pub queue_capacity: usize,
    /// Jobs executing at once
    pub concurrency: usize,
    /// Retry policy applied to every job
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            concurrency: 16,
            retry: RetryPolicy::default(),
        }
    }
}

/// Production [`JobSink`]: bounded queue plus worker pool
pub struct JobDispatcher<J: Job> {
    sender: mpsc::Sender<J>,
    clock: Arc<dyn Clock>,
    accepting: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    closed: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<J: Job> JobDispatcher<J> {
    /// Spawn the worker loop and return the dispatcher feeding it.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(handler: Arc<dyn JobHandler<J>>, config: DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let (closed, _) = watch::channel(false);

        let worker = tokio::spawn(run_worker(
            receiver,
            handler,
            Arc::new(config.retry),
            Arc::new(Semaphore::new(config.concurrency.max(1))),
            Arc::clone(&in_flight),
        ));

        Self {
            sender,
            clock,
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight,
            closed,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Jobs queued or executing (scheduled jobs still waiting are not counted)
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop accepting jobs and wait for queued and running ones to finish.
    ///
    /// Scheduled jobs that are not yet due are dropped.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ShutdownTimeout`] if jobs are still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RuntimeError> {
        tracing::info!("Initiating dispatcher shutdown");
        self.accepting.store(false, Ordering::Release);
        let _ = self.closed.send(true);

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(50);

        loop {
            let pending = self.in_flight();
            if pending == 0 {
                break;
            }
            if start.elapsed() >= timeout {
                tracing::error!(pending_jobs = pending, "Dispatcher shutdown timed out");
                return Err(RuntimeError::ShutdownTimeout(pending));
            }
            tokio::time::sleep(poll_interval).await;
        }

        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
        }
        tracing::info!("Dispatcher stopped");
        Ok(())
    }

    fn push(
        sender: &mpsc::Sender<J>,
        accepting: &AtomicBool,
        in_flight: &Arc<AtomicUsize>,
        job: J,
    ) -> Result<(), RuntimeError> {
        if !accepting.load(Ordering::Acquire) {
            return Err(RuntimeError::ShuttingDown);
        }
        let kind = job.kind();
        in_flight.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(job) {
            Ok(()) => {
                metrics::counter!("jobs_enqueued_total", "kind" => kind).increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                in_flight.fetch_sub(1, Ordering::AcqRel);
                metrics::counter!("jobs_queue_full_total", "kind" => kind).increment(1);
                Err(RuntimeError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(RuntimeError::QueueClosed)
            }
        }
    }
}

#[async_trait]
impl<J: Job> JobSink<J> for JobDispatcher<J> {
    async fn enqueue(&self, job: J, run_at: Option<DateTime<Utc>>) -> Result<(), RuntimeError> {
        let delay = run_at
            .and_then(|at| (at - self.clock.now()).to_std().ok())
            .filter(|d| !d.is_zero());

        let Some(delay) = delay else {
            return Self::push(&self.sender, &self.accepting, &self.in_flight, job);
        };

        if !self.accepting.load(Ordering::Acquire) {
            return Err(RuntimeError::ShuttingDown);
        }

        tracing::debug!(job = job.kind(), delay_secs = delay.as_secs(), "Job scheduled");
        let sender = self.sender.clone();
        let accepting = Arc::clone(&self.accepting);
        let in_flight = Arc::clone(&self.in_flight);
        let mut closed = self.closed.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    let kind = job.kind();
                    if let Err(error) = Self::push(&sender, &accepting, &in_flight, job) {
                        tracing::debug!(job = kind, %error, "Scheduled job dropped");
                    }
                }
                _ = closed.changed() => {
                    tracing::debug!(job = job.kind(), "Scheduled job dropped on shutdown");
                }
            }
        });
        Ok(())
    }
}

/// Decrements the in-flight counter when a job finishes, even if it panics
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn run_worker<J: Job>(
    mut receiver: mpsc::Receiver<J>,
    handler: Arc<dyn JobHandler<J>>,
    retry: Arc<RetryPolicy>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
) {
    while let Some(job) = receiver.recv().await {
        let guard = InFlightGuard(Arc::clone(&in_flight));
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let handler = Arc::clone(&handler);
        let retry = Arc::clone(&retry);
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            execute(&job, handler.as_ref(), &retry).await;
        });
    }
}

async fn execute<J: Job>(job: &J, handler: &dyn JobHandler<J>, retry: &RetryPolicy) {
    let kind = job.kind();
    let started = std::time::Instant::now();

    match retry_with_predicate(retry, || handler.handle(job), JobError::is_transient).await {
        Ok(()) => {
            tracing::debug!(job = kind, elapsed_ms = started.elapsed().as_millis(), "Job completed");
            metrics::counter!("jobs_succeeded_total", "kind" => kind).increment(1);
        }
        Err(error) => {
            tracing::error!(job = ?job, %error, "Job failed, dropping");
            metrics::counter!("jobs_failed_total", "kind" => kind).increment(1);
        }
    }
}
