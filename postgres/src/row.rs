//! Row mapping between the `tickets` table and [`Ticket`].

use chrono::{DateTime, Utc};
use coachline_core::error::{StoreError, StoreResult};
use coachline_core::ticket::{Owner, Ticket, TicketStatus};
use coachline_core::types::{
    DocumentHandle, InvoiceId, Money, RefundId, SeatNumber, TicketId, TripId, UserId,
};
use uuid::Uuid;

/// Column list shared by every `SELECT` and `RETURNING` clause
pub(crate) const TICKET_COLUMNS: &str = "id, trip_id, seat_number, origin, destination, price_cents, \
     status, invoice_id, refund_id, reserved_until, owner_id, owner_email, owner_name, document, \
     created_at, updated_at, version";

/// Raw `tickets` row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: Uuid,
    trip_id: i64,
    seat_number: i32,
    origin: String,
    destination: String,
    price_cents: i64,
    status: String,
    invoice_id: Option<String>,
    refund_id: Option<String>,
    reserved_until: Option<DateTime<Utc>>,
    owner_id: Uuid,
    owner_email: String,
    owner_name: String,
    document: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

fn corrupt(id: Uuid, what: &str) -> StoreError {
    StoreError::Serialization(format!("ticket {id}: invalid {what}"))
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        let seat_number = u32::try_from(row.seat_number)
            .ok()
            .and_then(|n| SeatNumber::new(n).ok())
            .ok_or_else(|| corrupt(row.id, "seat number"))?;
        let price = u64::try_from(row.price_cents)
            .map(Money::from_cents)
            .map_err(|_| corrupt(row.id, "price"))?;
        let status: TicketStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Serialization(format!("ticket {}: {e}", row.id)))?;
        let version = u64::try_from(row.version).map_err(|_| corrupt(row.id, "version"))?;

        Ok(Self {
            id: TicketId::from_uuid(row.id),
            trip_id: TripId::new(row.trip_id),
            seat_number,
            origin: row.origin,
            destination: row.destination,
            price,
            status,
            invoice_id: row.invoice_id.map(InvoiceId::new),
            refund_id: row.refund_id.map(RefundId::new),
            reserved_until: row.reserved_until,
            owner: Owner::new(UserId::from_uuid(row.owner_id), row.owner_email, row.owner_name),
            document: row.document.map(DocumentHandle::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
            version,
        })
    }
}

/// Database encodings of the numeric fields that are unsigned in the domain
pub(crate) struct Encoded {
    pub seat_number: i32,
    pub price_cents: i64,
    pub version: i64,
}

impl Encoded {
    pub(crate) fn of(ticket: &Ticket) -> StoreResult<Self> {
        let id = *ticket.id.as_uuid();
        Ok(Self {
            seat_number: i32::try_from(ticket.seat_number.get())
                .map_err(|_| corrupt(id, "seat number"))?,
            price_cents: i64::try_from(ticket.price.cents()).map_err(|_| corrupt(id, "price"))?,
            version: i64::try_from(ticket.version).map_err(|_| corrupt(id, "version"))?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row() -> TicketRow {
        let now = Utc::now();
        TicketRow {
            id: Uuid::new_v4(),
            trip_id: 7,
            seat_number: 12,
            origin: "Chisinau".into(),
            destination: "Balti".into(),
            price_cents: 15_000,
            status: "reserved".into(),
            invoice_id: None,
            refund_id: None,
            reserved_until: Some(now),
            owner_id: Uuid::new_v4(),
            owner_email: "rider@example.com".into(),
            owner_name: "Rider".into(),
            document: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn maps_a_valid_row() {
        let ticket = Ticket::try_from(row()).unwrap();
        assert_eq!(ticket.seat_number.get(), 12);
        assert_eq!(ticket.status, TicketStatus::Reserved);
        assert_eq!(ticket.price.cents(), 15_000);
        assert_eq!(ticket.version, 1);
    }

    #[test]
    fn rejects_seat_zero_and_unknown_status() {
        let mut bad_seat = row();
        bad_seat.seat_number = 0;
        assert!(matches!(
            Ticket::try_from(bad_seat),
            Err(StoreError::Serialization(_))
        ));

        let mut bad_status = row();
        bad_status.status = "boarding".into();
        assert!(matches!(
            Ticket::try_from(bad_status),
            Err(StoreError::Serialization(_))
        ));
    }
}
