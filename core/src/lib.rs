//! # Coachline Core
//!
//! Domain vocabulary and abstractions for the Coachline seat booking core.
//!
//! The crate is split in two halves:
//!
//! - **Abstractions**: the [`reducer::Reducer`] trait, [`effect::Effect`] descriptions
//!   and the [`environment::Clock`] used to inject time.
//! - **Domain**: identifiers, [`ticket::Ticket`] and its status machine,
//!   [`trip::TripSnapshot`], the [`store::TicketStore`] persistence seam and the
//!   [`error::BookingError`] taxonomy.
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: reducers mutate a ticket and describe jobs,
//!   the runtime executes them after the mutation is committed
//! - Storage is the final arbiter of seat uniqueness
//! - Dependencies are injected as trait objects
//!
//! ## Example
//!
//! ```ignore
//! use coachline_core::prelude::*;
//!
//! impl Reducer for TicketReducer {
//!     type State = Ticket;
//!     type Action = TicketAction;
//!     type Environment = TicketEnvironment;
//!     type Job = Job;
//!     type Error = BookingError;
//!
//!     fn reduce(
//!         &self,
//!         ticket: &mut Ticket,
//!         action: TicketAction,
//!         env: &TicketEnvironment,
//!     ) -> Result<SmallVec<[Effect<Job>; 4]>, BookingError> {
//!         // Business logic goes here
//!         Ok(SmallVec::new())
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod error;
pub mod store;
pub mod ticket;
pub mod trip;
pub mod types;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → Result<Effects, Error>`.
/// A rejected action leaves the state untouched and returns the error.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Job`: The work items its effects describe
    /// - `Error`: Why an action was rejected
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The job type carried by emitted effects
        type Job;

        /// The rejection type
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is illegal for the current state.
        /// Implementations must not touch `state` in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Effect<Self::Job>; 4]>, Self::Error>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe work to be performed by the runtime once the state change
/// they belong to has been persisted. They are values, never execution.
pub mod effect {
    use chrono::{DateTime, Utc};

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `J`: The job type handed to the dispatcher
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Effect<J> {
        /// No side effect
        None,

        /// Run a job as soon as possible
        Dispatch(J),

        /// Run a job at (or after) the given instant
        Schedule {
            /// Earliest time the job may run
            at: DateTime<Utc>,
            /// Job to run
            job: J,
        },

        /// Run several effects independently
        Parallel(Vec<Effect<J>>),
    }

    impl<J> Effect<J> {
        /// Merge multiple effects into a single parallel effect
        #[must_use]
        pub fn merge(effects: Vec<Self>) -> Self {
            let mut effects: Vec<Self> = effects
                .into_iter()
                .filter(|e| !matches!(e, Self::None))
                .collect();
            match effects.len() {
                0 => Self::None,
                1 => effects.remove(0),
                _ => Self::Parallel(effects),
            }
        }

        /// Flatten the effect tree into the jobs it carries, in order.
        ///
        /// Scheduled jobs are returned together with their due time.
        #[must_use]
        pub fn into_jobs(self) -> Vec<(Option<DateTime<Utc>>, J)> {
            let mut out = Vec::new();
            self.collect_into(&mut out);
            out
        }

        fn collect_into(self, out: &mut Vec<(Option<DateTime<Utc>>, J)>) {
            match self {
                Self::None => {}
                Self::Dispatch(job) => out.push((None, job)),
                Self::Schedule { at, job } => out.push((Some(at), job)),
                Self::Parallel(effects) => {
                    for effect in effects {
                        effect.collect_into(out);
                    }
                }
            }
        }

        /// Whether this effect carries no work.
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Self::None => true,
                Self::Parallel(effects) => effects.iter().all(Self::is_none),
                Self::Dispatch(_) | Self::Schedule { .. } => false,
            }
        }
    }
}

/// Environment module - Injected dependency traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use coachline_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Common imports for crates building on the core
pub mod prelude {
    pub use crate::effect::Effect;
    pub use crate::environment::{Clock, SystemClock};
    pub use crate::error::{BookingError, StoreError};
    pub use crate::reducer::Reducer;
    pub use crate::store::TicketStore;
    pub use crate::ticket::{Owner, Ticket, TicketStatus};
    pub use crate::trip::TripSnapshot;
    pub use crate::types::{DocumentHandle, InvoiceId, Money, RefundId, SeatNumber, TicketId, TripId, UserId};
    pub use smallvec::{SmallVec, smallvec};
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;

    #[test]
    fn merge_drops_empty_effects() {
        let merged = Effect::merge(vec![Effect::None, Effect::Dispatch(1), Effect::None]);
        assert_eq!(merged, Effect::Dispatch(1));

        let merged: Effect<u8> = Effect::merge(vec![Effect::None]);
        assert!(merged.is_none());
    }

    #[test]
    fn into_jobs_flattens_nested_effects() {
        let effect = Effect::Parallel(vec![
            Effect::Dispatch("a"),
            Effect::Parallel(vec![Effect::None, Effect::Dispatch("b")]),
        ]);
        let jobs: Vec<_> = effect.into_jobs().into_iter().map(|(_, j)| j).collect();
        assert_eq!(jobs, vec!["a", "b"]);
    }
}
