//! Error taxonomy for booking operations and storage.

use crate::ticket::TicketStatus;
use crate::types::{InvoiceId, RefundId, SeatNumber, TicketId, TripId};
use thiserror::Error;

/// Errors raised by [`crate::store::TicketStore`] implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An active ticket already claims the seat
    #[error("seat {seat} on trip {trip_id} is already held")]
    SeatTaken {
        /// Trip
        trip_id: TripId,
        /// Contested seat
        seat: SeatNumber,
    },

    /// Another writer updated the ticket since it was read
    #[error("ticket {ticket_id} was modified concurrently (expected version {expected})")]
    Conflict {
        /// Ticket that lost the race
        ticket_id: TicketId,
        /// Version the caller read
        expected: u64,
    },

    /// The invoice is attached to a different ticket
    #[error("invoice {0} is already attached to another ticket")]
    DuplicateInvoice(InvoiceId),

    /// The refund reference is recorded on a different ticket
    #[error("refund {0} is already recorded on another ticket")]
    DuplicateRefund(RefundId),

    /// No ticket with this id
    #[error("ticket {0} not found")]
    NotFound(TicketId),

    /// Backend failure
    #[error("database error: {0}")]
    Database(String),

    /// Row could not be mapped to a ticket
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by booking operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The seat is held by an active ticket; pick another seat
    #[error("seat {seat} on trip {trip_id} is already taken")]
    SeatAlreadyTaken {
        /// Trip
        trip_id: TripId,
        /// Contested seat
        seat: SeatNumber,
    },

    /// The trip collaborator could not resolve the trip
    #[error("trip {0} is unavailable")]
    TripUnavailable(TripId),

    /// The action is illegal for the ticket's current state
    #[error("cannot {action} ticket {ticket_id} in status {status}: {detail}")]
    InvalidStateTransition {
        /// Ticket
        ticket_id: TicketId,
        /// Status at the time of the attempt
        status: TicketStatus,
        /// Attempted transition
        action: &'static str,
        /// What made it illegal
        detail: String,
    },

    /// No ticket with this id
    #[error("ticket {0} not found")]
    NotFound(TicketId),

    /// Input rejected before touching storage
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage failure other than the cases above
    #[error(transparent)]
    Storage(StoreError),
}

impl BookingError {
    /// Shorthand for an illegal transition
    #[must_use]
    pub fn invalid_transition(
        ticket_id: TicketId,
        status: TicketStatus,
        action: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            ticket_id,
            status,
            action,
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SeatTaken { trip_id, seat } => Self::SeatAlreadyTaken { trip_id, seat },
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// Result type for booking operations
pub type BookingResult<T> = Result<T, BookingError>;
