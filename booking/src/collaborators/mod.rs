//! Services the booking core talks to but does not own.
//!
//! Each collaborator is a trait with one production adapter and one adapter
//! for tests and local runs. Which adapter is active is decided at startup from
//! configuration (see [`crate::app`]).

pub mod documents;
pub mod notify;
pub mod payment;
pub mod trips;

use coachline_runtime::JobError;
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use documents::{DocumentRenderer, LocalDocumentRenderer};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier, RecordingNotifier};
pub use payment::{HttpPaymentGateway, MockPaymentGateway, PaymentGateway};
pub use trips::{HttpTripDirectory, JsonTripDirectory, TripDirectory};

/// Failure talking to a collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// No answer within the allowed time
    #[error("{service} timed out after {after:?}")]
    Timeout {
        /// Collaborator name
        service: &'static str,
        /// Elapsed limit
        after: Duration,
    },

    /// Network failure or server-side error
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        /// Collaborator name
        service: &'static str,
        /// Cause
        reason: String,
    },

    /// The collaborator refused the request
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        /// Collaborator name
        service: &'static str,
        /// Cause
        reason: String,
    },

    /// The answer could not be understood
    #[error("{service} returned malformed data: {reason}")]
    Malformed {
        /// Collaborator name
        service: &'static str,
        /// Cause
        reason: String,
    },
}

impl CollaboratorError {
    /// Whether trying again later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }

    /// Classify a `reqwest` failure
    pub(crate) fn from_http(service: &'static str, err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Malformed {
                service,
                reason: err.to_string(),
            };
        }
        match err.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 429 => Self::Rejected {
                service,
                reason: err.to_string(),
            },
            _ => Self::Unavailable {
                service,
                reason: err.to_string(),
            },
        }
    }
}

impl From<CollaboratorError> for JobError {
    fn from(err: CollaboratorError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

/// Bound a collaborator call by `after`.
///
/// # Errors
///
/// [`CollaboratorError::Timeout`] when the call does not finish in time, or the
/// call's own error.
pub async fn with_timeout<T, F>(service: &'static str, after: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| CollaboratorError::Timeout { service, after })?
}

/// `Url::join` drops the last segment unless the base ends with a slash
pub(crate) fn base_url_with_slash(service: &'static str, raw: &str) -> Result<Url, CollaboratorError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| CollaboratorError::Rejected {
        service,
        reason: format!("invalid base url {raw}: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let result: Result<(), _> = with_timeout("depot", Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert_eq!(
            result,
            Err(CollaboratorError::Timeout {
                service: "depot",
                after: Duration::from_secs(10)
            })
        );
    }

    #[test]
    fn only_timeouts_and_outages_are_retried() {
        let outage = CollaboratorError::Unavailable {
            service: "treasury",
            reason: "503".into(),
        };
        let refused = CollaboratorError::Rejected {
            service: "treasury",
            reason: "400".into(),
        };
        assert!(JobError::from(outage).is_transient());
        assert!(!JobError::from(refused).is_transient());
    }

    #[test]
    fn base_url_keeps_its_path() {
        let base = base_url_with_slash("depot", "http://depot.local/api/v1").unwrap();
        assert_eq!(
            base.join("trips/4/extra-info").unwrap().as_str(),
            "http://depot.local/api/v1/trips/4/extra-info"
        );
    }
}
