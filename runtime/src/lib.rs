//! # Coachline Runtime
//!
//! The imperative shell around the booking reducers.
//!
//! ## Core Components
//!
//! - **Job dispatcher**: at-least-once execution of jobs with bounded
//!   exponential-backoff retry, immediate or scheduled for a wall-clock instant
//! - **Periodic tasks**: fixed-interval loops (expiry sweep, reminder scan)
//!   that stop on the shutdown broadcast
//! - **Lifecycle**: shutdown signal handling
//! - **Metrics**: Prometheus recorder installation
//!
//! ## Example
//!
//! ```ignore
//! use coachline_runtime::{DispatcherConfig, JobDispatcher};
//!
//! let dispatcher = JobDispatcher::start(handler, DispatcherConfig::default(), clock);
//! dispatcher.enqueue(Job::RenderTicket { ticket_id }, None).await?;
//! dispatcher.shutdown(Duration::from_secs(10)).await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Job queue and execution
pub mod dispatcher;

/// Fixed-interval background loops
pub mod periodic;

/// Shutdown coordination
pub mod lifecycle;

/// Prometheus metrics
pub mod metrics;

/// Error types for the runtime
pub mod error {
    use thiserror::Error;

    /// Errors raised while handing jobs to the dispatcher or stopping it
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RuntimeError {
        /// The dispatcher stopped accepting jobs
        #[error("dispatcher is shutting down")]
        ShuttingDown,

        /// The queue is at capacity; the job was not accepted
        #[error("job queue is full")]
        QueueFull,

        /// The worker loop is gone
        #[error("job queue closed")]
        QueueClosed,

        /// Jobs were still running when the shutdown timeout elapsed
        #[error("shutdown timed out with {0} jobs still running")]
        ShutdownTimeout(usize),
    }
}

pub use dispatcher::{DispatcherConfig, Job, JobDispatcher, JobError, JobHandler, JobSink, submit_effects};
pub use error::RuntimeError;
pub use lifecycle::{Shutdown, shutdown_signal};
pub use periodic::spawn_periodic;
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_predicate};
