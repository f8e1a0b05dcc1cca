//! The ticket entity and its status vocabulary.
//!
//! Transitions live in the booking crate's ticket reducer. This module only
//! holds the data and the derived predicates, which are pure functions of
//! status and time.

use crate::types::{DocumentHandle, InvoiceId, Money, RefundId, SeatNumber, TicketId, TripId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default time a seat is held pending payment, in minutes
pub const DEFAULT_HOLD_MINUTES: i64 = 15;

/// Minimum length of origin and destination names
pub const MIN_PLACE_LEN: usize = 3;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Seat held, awaiting payment
    Reserved,
    /// Payment confirmed
    Paid,
    /// Cancelled by the owner or with its trip
    Cancelled,
    /// Hold lapsed without payment
    Expired,
    /// Ticket was used to board
    Used,
}

impl TicketStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Used => "used",
        }
    }

    /// Whether the status claims its seat
    #[must_use]
    pub const fn holds_seat(self) -> bool {
        matches!(self, Self::Reserved | Self::Paid)
    }

    /// Whether no transition can leave this status
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired | Self::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string read from storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown ticket status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(Self::Reserved),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "used" => Ok(Self::Used),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Owner
// ============================================================================

/// Who a ticket belongs to, with the contact details notifications need
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// User reference
    pub user_id: UserId,
    /// Address for ticket and trip emails
    pub email: String,
    /// Name used in greetings and on the invoice
    pub display_name: String,
}

impl Owner {
    /// Creates an owner
    #[must_use]
    pub fn new(user_id: UserId, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            display_name: display_name.into(),
        }
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// One seat on one trip, from reservation to its terminal status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket id
    pub id: TicketId,
    /// Trip the seat belongs to
    pub trip_id: TripId,
    /// Seat on the trip's bus
    pub seat_number: SeatNumber,
    /// Boarding place, copied from the trip snapshot
    pub origin: String,
    /// Arrival place, copied from the trip snapshot
    pub destination: String,
    /// Price, copied from the trip snapshot
    pub price: Money,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Invoice attached on payment confirmation
    pub invoice_id: Option<InvoiceId>,
    /// Refund reference recorded by the refund job
    pub refund_id: Option<RefundId>,
    /// End of the hold; set only while reserved
    pub reserved_until: Option<DateTime<Utc>>,
    /// Ticket owner
    pub owner: Owner,
    /// Rendered ticket document
    pub document: Option<DocumentHandle>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by storage on every write
    pub version: u64,
}

impl Ticket {
    /// A fresh reservation held until `now + hold`
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn reserve(
        trip_id: TripId,
        seat_number: SeatNumber,
        origin: impl Into<String>,
        destination: impl Into<String>,
        price: Money,
        owner: Owner,
        now: DateTime<Utc>,
        hold: Duration,
    ) -> Self {
        Self {
            id: TicketId::new(),
            trip_id,
            seat_number,
            origin: origin.into(),
            destination: destination.into(),
            price,
            status: TicketStatus::Reserved,
            invoice_id: None,
            refund_id: None,
            reserved_until: Some(now + hold),
            owner,
            document: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Hold deadline has passed
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reserved_until.is_some_and(|until| until < now)
    }

    /// Claims its seat at `now`
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status.holds_seat() && !self.is_expired(now)
    }

    /// `cancel` is legal
    #[must_use]
    pub const fn can_cancel(&self) -> bool {
        self.status.holds_seat()
    }

    /// `confirm` is legal
    #[must_use]
    pub const fn can_confirm(&self) -> bool {
        matches!(self.status, TicketStatus::Reserved)
    }

    /// Whether the expiry job should move this ticket to expired at `now`
    #[must_use]
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Reserved && self.reserved_until.is_some_and(|until| until <= now)
    }

    /// Human readable route, e.g. `Ticket from Chisinau to Balti`
    #[must_use]
    pub fn description(&self) -> String {
        format!("Ticket from {} to {}", self.origin, self.destination)
    }
}
