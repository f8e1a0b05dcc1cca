//! Integration tests for the job dispatcher.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use async_trait::async_trait;
use chrono::Utc;
use coachline_core::effect::Effect;
use coachline_core::environment::SystemClock;
use coachline_runtime::{
    DispatcherConfig, Job, JobDispatcher, JobError, JobHandler, JobSink, RetryPolicy, RuntimeError,
    submit_effects,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_test::assert_ok;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TestJob {
    Ok(u32),
    FlakyUntil { id: u32, succeed_on: u32 },
    Broken(u32),
    Slow(u32),
}

impl Job for TestJob {
    fn kind(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::FlakyUntil { .. } => "flaky",
            Self::Broken(_) => "broken",
            Self::Slow(_) => "slow",
        }
    }
}

#[derive(Default)]
struct CountingHandler {
    attempts: Mutex<HashMap<u32, u32>>,
    completed: Mutex<Vec<u32>>,
}

impl CountingHandler {
    async fn attempts(&self, id: u32) -> u32 {
        self.attempts.lock().await.get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl JobHandler<TestJob> for CountingHandler {
    async fn handle(&self, job: &TestJob) -> Result<(), JobError> {
        let id = match job {
            TestJob::Ok(id) | TestJob::Broken(id) | TestJob::Slow(id) => *id,
            TestJob::FlakyUntil { id, .. } => *id,
        };
        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let entry = attempts.entry(id).or_insert(0);
            *entry += 1;
            *entry
        };

        match job {
            TestJob::Ok(_) => {}
            TestJob::Slow(_) => tokio::time::sleep(Duration::from_millis(200)).await,
            TestJob::FlakyUntil { succeed_on, .. } if attempt < *succeed_on => {
                return Err(JobError::Transient(format!("attempt {attempt} timed out")));
            }
            TestJob::FlakyUntil { .. } => {}
            TestJob::Broken(_) => return Err(JobError::Permanent("rejected".into())),
        }
        self.completed.lock().await.push(id);
        Ok(())
    }
}

fn config() -> DispatcherConfig {
    DispatcherConfig {
        queue_capacity: 16,
        concurrency: 4,
        retry: RetryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(5))
            .jitter(false)
            .build(),
    }
}

fn start(handler: &Arc<CountingHandler>) -> JobDispatcher<TestJob> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    JobDispatcher::start(
        Arc::clone(handler) as Arc<dyn JobHandler<TestJob>>,
        config(),
        Arc::new(SystemClock),
    )
}

// ============================================================================
// Tests
// ============================================================================

/// Jobs handed over as effects all run
#[tokio::test]
async fn test_submitted_effects_are_executed() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    let accepted = submit_effects(
        &dispatcher,
        [
            Effect::Dispatch(TestJob::Ok(1)),
            Effect::Parallel(vec![Effect::Dispatch(TestJob::Ok(2)), Effect::None]),
        ],
    )
    .await;
    assert_eq!(accepted, 2);

    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);
    let mut completed = handler.completed.lock().await.clone();
    completed.sort_unstable();
    assert_eq!(completed, vec![1, 2]);
}

/// Transient failures are retried until the job succeeds
#[tokio::test]
async fn test_transient_failures_are_retried() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    assert_ok!(dispatcher.enqueue(TestJob::FlakyUntil { id: 7, succeed_on: 3 }, None).await);
    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);

    assert_eq!(handler.attempts(7).await, 3);
    assert_eq!(*handler.completed.lock().await, vec![7]);
}

/// A job that keeps failing is dropped after the attempt budget
#[tokio::test]
async fn test_retries_are_bounded() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    assert_ok!(dispatcher.enqueue(TestJob::FlakyUntil { id: 8, succeed_on: 10 }, None).await);
    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);

    assert_eq!(handler.attempts(8).await, 3);
    assert!(handler.completed.lock().await.is_empty());
}

/// Permanent failures are not retried
#[tokio::test]
async fn test_permanent_failures_are_not_retried() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    assert_ok!(dispatcher.enqueue(TestJob::Broken(9), None).await);
    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);

    assert_eq!(handler.attempts(9).await, 1);
}

/// Scheduled jobs wait for their due time
#[tokio::test]
async fn test_scheduled_job_runs_at_due_time() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    let due = Utc::now() + chrono::Duration::milliseconds(300);
    assert_ok!(dispatcher.enqueue(TestJob::Ok(3), Some(due)).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.attempts(3).await, 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(handler.attempts(3).await, 1);
    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);
}

/// Jobs due in the past run immediately
#[tokio::test]
async fn test_overdue_job_runs_immediately() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    let due = Utc::now() - chrono::Duration::minutes(5);
    assert_ok!(dispatcher.enqueue(TestJob::Ok(4), Some(due)).await);
    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);

    assert_eq!(handler.attempts(4).await, 1);
}

/// Shutdown waits for running jobs and then refuses new ones
#[tokio::test]
async fn test_shutdown_drains_and_rejects() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    assert_ok!(dispatcher.enqueue(TestJob::Slow(5), None).await);
    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);
    assert_eq!(*handler.completed.lock().await, vec![5]);

    let rejected = dispatcher.enqueue(TestJob::Ok(6), None).await;
    assert_eq!(rejected, Err(RuntimeError::ShuttingDown));
}

/// Shutdown reports jobs that outlive the timeout
#[tokio::test]
async fn test_shutdown_times_out_on_slow_jobs() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = start(&handler);

    assert_ok!(dispatcher.enqueue(TestJob::Slow(10), None).await);
    let result = dispatcher.shutdown(Duration::from_millis(20)).await;
    assert_eq!(result, Err(RuntimeError::ShutdownTimeout(1)));
}

/// A saturated queue refuses new jobs instead of making the caller wait
#[tokio::test]
async fn test_full_queue_rejects_without_waiting() {
    let handler = Arc::new(CountingHandler::default());
    let dispatcher = JobDispatcher::start(
        Arc::clone(&handler) as Arc<dyn JobHandler<TestJob>>,
        DispatcherConfig {
            queue_capacity: 1,
            concurrency: 1,
            ..config()
        },
        Arc::new(SystemClock),
    );

    let outcomes = tokio::time::timeout(Duration::from_millis(150), async {
        let mut outcomes = Vec::new();
        for id in 0..10 {
            outcomes.push(dispatcher.enqueue(TestJob::Slow(id), None).await);
        }
        outcomes
    })
    .await
    .expect("enqueue must not wait for queue space");

    let accepted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert!((1..=3).contains(&accepted), "accepted {accepted} jobs");
    assert!(outcomes.contains(&Err(RuntimeError::QueueFull)));

    assert_ok!(dispatcher.shutdown(Duration::from_secs(5)).await);
    assert_eq!(handler.completed.lock().await.len(), accepted);
}
