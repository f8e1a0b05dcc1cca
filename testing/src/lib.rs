//! # Coachline Testing
//!
//! Testing utilities for the Coachline booking core.
//!
//! This crate provides:
//! - Deterministic clocks
//! - An in-memory [`TicketStore`](coachline_core::store::TicketStore)
//! - A job sink that records instead of executing
//! - The given/when/then [`ReducerTest`] harness
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use coachline_testing::{InMemoryTicketStore, MockClock, RecordingJobSink, test_clock};
//!
//! #[tokio::test]
//! async fn reservation_schedules_expiry() {
//!     let clock = Arc::new(MockClock::starting_at(test_clock().now()));
//!     let store = Arc::new(InMemoryTicketStore::new());
//!     let jobs = Arc::new(RecordingJobSink::new());
//!     // build the service under test from these
//! }
//! ```

use chrono::{DateTime, Utc};
use coachline_core::environment::Clock;

pub mod memory_store;
pub mod recording;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use coachline_testing::mocks::FixedClock;
    /// use coachline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to
    ///
    /// Shared between a service and its test so the test can step past
    /// reservation deadlines.
    #[derive(Debug)]
    pub struct MockClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        /// Start at `time`
        #[must_use]
        pub const fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = time;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use coachline_core::types::{Money, SeatNumber};
    use proptest::prelude::*;

    /// Seats on a bus of `capacity` seats
    pub fn seat_on(capacity: u32) -> impl Strategy<Value = SeatNumber> {
        (1..=capacity.max(1)).prop_filter_map("seat numbers start at 1", |n| SeatNumber::new(n).ok())
    }

    /// Ticket prices up to 10 000.00
    pub fn price() -> impl Strategy<Value = Money> {
        (0_u64..=1_000_000).prop_map(Money::from_cents)
    }
}

// Re-export commonly used items
pub use memory_store::InMemoryTicketStore;
pub use mocks::{FixedClock, MockClock, test_clock};
pub use recording::RecordingJobSink;
pub use reducer_test::ReducerTest;
