//! Persistence seam for tickets.
//!
//! Implementations must make [`TicketStore::insert_reservation`] the final
//! arbiter of seat uniqueness: of any number of concurrent inserts for the same
//! `(trip, seat)`, at most one succeeds while the seat is held.

use crate::error::StoreResult;
use crate::ticket::{Ticket, TicketStatus};
use crate::types::{InvoiceId, SeatNumber, TicketId, TripId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Ticket persistence
///
/// Every successful write bumps [`Ticket::version`] by one and returns the
/// stored row.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a new reservation.
    ///
    /// Reservations on the same seat whose hold lapsed before `now` are moved to
    /// `expired` in the same unit of work, then the insert runs.
    ///
    /// # Errors
    ///
    /// [`crate::error::StoreError::SeatTaken`] if an active ticket holds the seat.
    async fn insert_reservation(&self, ticket: &Ticket, now: DateTime<Utc>) -> StoreResult<Ticket>;

    /// Load a ticket.
    ///
    /// # Errors
    ///
    /// Backend failures only; a missing ticket is `Ok(None)`.
    async fn get(&self, id: TicketId) -> StoreResult<Option<Ticket>>;

    /// Compare-and-swap write of one ticket against `ticket.version`.
    ///
    /// # Errors
    ///
    /// [`crate::error::StoreError::Conflict`] when the stored version moved on,
    /// [`crate::error::StoreError::DuplicateInvoice`] when the invoice belongs to
    /// another ticket, [`crate::error::StoreError::NotFound`] for unknown ids.
    async fn update(&self, ticket: &Ticket) -> StoreResult<Ticket>;

    /// Compare-and-swap write of several tickets; either all are written or none.
    ///
    /// # Errors
    ///
    /// Same as [`TicketStore::update`], reported for the first offending ticket.
    async fn update_batch(&self, tickets: &[Ticket]) -> StoreResult<Vec<Ticket>>;

    /// Seats held by active tickets (reserved or paid, hold not lapsed), ascending.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn taken_seats(&self, trip_id: TripId, now: DateTime<Utc>) -> StoreResult<BTreeSet<SeatNumber>>;

    /// Whether an active ticket holds the seat.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn is_seat_taken(&self, trip_id: TripId, seat: SeatNumber, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.taken_seats(trip_id, now).await?.contains(&seat))
    }

    /// Every ticket ever issued for a trip, newest first.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn for_trip(&self, trip_id: TripId) -> StoreResult<Vec<Ticket>>;

    /// Ids of reserved tickets whose hold ended before `now`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn reserved_past_deadline(&self, now: DateTime<Utc>) -> StoreResult<Vec<TicketId>>;

    /// Tickets currently in `status`, newest first.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn with_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>>;

    /// Ticket the invoice is attached to, if any.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn invoice_owner(&self, invoice_id: &InvoiceId) -> StoreResult<Option<TicketId>>;

    /// Record that the reminder `lead_hours` before departure went out.
    ///
    /// Returns `false` when the marker already existed.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn mark_reminder_sent(&self, ticket_id: TicketId, lead_hours: u32) -> StoreResult<bool>;

    /// Number of paid tickets created inside the optional window (inclusive bounds).
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn count_paid(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> StoreResult<u64>;

    /// Ticket counts per status, optionally for a single trip.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn count_by_status(&self, trip_id: Option<TripId>) -> StoreResult<HashMap<TicketStatus, u64>>;

    /// Trips with the most paid tickets, best selling first, ties by trip id.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn top_trips_by_paid(&self, limit: usize) -> StoreResult<Vec<(TripId, u64)>>;
}
