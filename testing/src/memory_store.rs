//! In-memory [`TicketStore`] for tests, demos and the `memory` storage backend.
//!
//! A single write lock serialises every mutation, which makes the
//! check-then-insert in [`TicketStore::insert_reservation`] atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::error::{StoreError, StoreResult};
use coachline_core::store::TicketStore;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::types::{InvoiceId, SeatNumber, TicketId, TripId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    tickets: HashMap<TicketId, Ticket>,
    reminders: HashSet<(TicketId, u32)>,
    failing_writes: HashSet<TicketId>,
}

impl Inner {
    fn check_write(&self, ticket: &Ticket) -> StoreResult<()> {
        if self.failing_writes.contains(&ticket.id) {
            return Err(StoreError::Database(format!("injected failure for {}", ticket.id)));
        }
        let stored = self
            .tickets
            .get(&ticket.id)
            .ok_or(StoreError::NotFound(ticket.id))?;
        if stored.version != ticket.version {
            return Err(StoreError::Conflict {
                ticket_id: ticket.id,
                expected: ticket.version,
            });
        }
        let clash = |other: &Ticket| other.id != ticket.id;
        if let Some(invoice) = &ticket.invoice_id {
            if self
                .tickets
                .values()
                .any(|t| clash(t) && t.invoice_id.as_ref() == Some(invoice))
            {
                return Err(StoreError::DuplicateInvoice(invoice.clone()));
            }
        }
        if let Some(refund) = &ticket.refund_id {
            if self
                .tickets
                .values()
                .any(|t| clash(t) && t.refund_id.as_ref() == Some(refund))
            {
                return Err(StoreError::DuplicateRefund(refund.clone()));
            }
        }
        Ok(())
    }

    fn persist(&mut self, ticket: &Ticket) -> Ticket {
        let mut stored = ticket.clone();
        stored.version += 1;
        self.tickets.insert(stored.id, stored.clone());
        stored
    }
}

/// Ticket storage backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    inner: RwLock<Inner>,
}

impl InMemoryTicketStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a ticket in place as-is, bypassing every check.
    ///
    /// Lets tests start from paid, expired or otherwise historical tickets.
    pub async fn seed(&self, ticket: Ticket) {
        self.inner.write().await.tickets.insert(ticket.id, ticket);
    }

    /// Make every later write of `ticket_id` fail with a database error
    pub async fn fail_writes_for(&self, ticket_id: TicketId) {
        self.inner.write().await.failing_writes.insert(ticket_id);
    }

    /// Number of stored tickets
    pub async fn len(&self) -> usize {
        self.inner.read().await.tickets.len()
    }

    /// Whether the store holds no tickets
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tickets.is_empty()
    }

    /// Every stored ticket, oldest first
    pub async fn all(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.inner.read().await.tickets.values().cloned().collect();
        tickets.sort_by_key(|t| (t.created_at, t.id));
        tickets
    }
}

fn newest_first(mut tickets: Vec<Ticket>) -> Vec<Ticket> {
    tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    tickets
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert_reservation(&self, ticket: &Ticket, now: DateTime<Utc>) -> StoreResult<Ticket> {
        let mut inner = self.inner.write().await;

        for held in inner.tickets.values_mut().filter(|t| {
            t.trip_id == ticket.trip_id
                && t.seat_number == ticket.seat_number
                && t.status == TicketStatus::Reserved
                && t.is_expired(now)
        }) {
            held.status = TicketStatus::Expired;
            held.reserved_until = None;
            held.updated_at = now;
            held.version += 1;
        }

        let taken = inner.tickets.values().any(|t| {
            t.trip_id == ticket.trip_id && t.seat_number == ticket.seat_number && t.status.holds_seat()
        });
        if taken {
            return Err(StoreError::SeatTaken {
                trip_id: ticket.trip_id,
                seat: ticket.seat_number,
            });
        }
        if inner.tickets.contains_key(&ticket.id) {
            return Err(StoreError::Database(format!("duplicate ticket id {}", ticket.id)));
        }

        Ok(inner.persist(ticket))
    }

    async fn get(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.read().await.tickets.get(&id).cloned())
    }

    async fn update(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut inner = self.inner.write().await;
        inner.check_write(ticket)?;
        Ok(inner.persist(ticket))
    }

    async fn update_batch(&self, tickets: &[Ticket]) -> StoreResult<Vec<Ticket>> {
        let mut inner = self.inner.write().await;
        for ticket in tickets {
            inner.check_write(ticket)?;
        }
        Ok(tickets.iter().map(|t| inner.persist(t)).collect())
    }

    async fn taken_seats(&self, trip_id: TripId, now: DateTime<Utc>) -> StoreResult<BTreeSet<SeatNumber>> {
        Ok(self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.trip_id == trip_id && t.is_active(now))
            .map(|t| t.seat_number)
            .collect())
    }

    async fn for_trip(&self, trip_id: TripId) -> StoreResult<Vec<Ticket>> {
        let tickets = self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.trip_id == trip_id)
            .cloned()
            .collect();
        Ok(newest_first(tickets))
    }

    async fn reserved_past_deadline(&self, now: DateTime<Utc>) -> StoreResult<Vec<TicketId>> {
        let mut due: Vec<(DateTime<Utc>, TicketId)> = self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Reserved && t.is_expired(now))
            .filter_map(|t| t.reserved_until.map(|until| (until, t.id)))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn with_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>> {
        let tickets = self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(newest_first(tickets))
    }

    async fn invoice_owner(&self, invoice_id: &InvoiceId) -> StoreResult<Option<TicketId>> {
        Ok(self
            .inner
            .read()
            .await
            .tickets
            .values()
            .find(|t| t.invoice_id.as_ref() == Some(invoice_id))
            .map(|t| t.id))
    }

    async fn mark_reminder_sent(&self, ticket_id: TicketId, lead_hours: u32) -> StoreResult<bool> {
        Ok(self.inner.write().await.reminders.insert((ticket_id, lead_hours)))
    }

    async fn count_paid(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> StoreResult<u64> {
        let count = self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Paid)
            .filter(|t| start.is_none_or(|s| t.created_at >= s))
            .filter(|t| end.is_none_or(|e| t.created_at <= e))
            .count();
        Ok(count as u64)
    }

    async fn count_by_status(&self, trip_id: Option<TripId>) -> StoreResult<HashMap<TicketStatus, u64>> {
        let mut counts = HashMap::new();
        for ticket in self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| trip_id.is_none_or(|id| t.trip_id == id))
        {
            *counts.entry(ticket.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn top_trips_by_paid(&self, limit: usize) -> StoreResult<Vec<(TripId, u64)>> {
        let mut per_trip: HashMap<TripId, u64> = HashMap::new();
        for ticket in self
            .inner
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Paid)
        {
            *per_trip.entry(ticket.trip_id).or_insert(0) += 1;
        }
        let mut ranked: Vec<(TripId, u64)> = per_trip.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_clock;
    use coachline_core::environment::Clock;
    use coachline_core::ticket::Owner;
    use coachline_core::types::{Money, UserId};
    use tokio_test::assert_ok;

    fn reservation(seat: u32, now: DateTime<Utc>) -> Ticket {
        Ticket::reserve(
            TripId::new(1),
            SeatNumber::new(seat).unwrap(),
            "Chisinau",
            "Balti",
            Money::from_cents(10_000),
            Owner::new(UserId::new(), "a@example.com", "A"),
            now,
            chrono::Duration::minutes(15),
        )
    }

    #[tokio::test]
    async fn second_reservation_for_held_seat_is_rejected() {
        let store = InMemoryTicketStore::new();
        let now = test_clock().now();

        let stored = assert_ok!(store.insert_reservation(&reservation(5, now), now).await);
        assert_eq!(stored.version, 1);

        let err = store.insert_reservation(&reservation(5, now), now).await.unwrap_err();
        assert!(matches!(err, StoreError::SeatTaken { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn lapsed_hold_is_expired_by_the_next_insert() {
        let store = InMemoryTicketStore::new();
        let now = test_clock().now();
        let first = store.insert_reservation(&reservation(5, now), now).await.unwrap();

        let later = now + chrono::Duration::minutes(16);
        assert_ok!(store.insert_reservation(&reservation(5, later), later).await);

        let first = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, TicketStatus::Expired);
        assert_eq!(first.version, 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryTicketStore::new();
        let now = test_clock().now();
        let stored = store.insert_reservation(&reservation(1, now), now).await.unwrap();

        let mut first = stored.clone();
        first.status = TicketStatus::Cancelled;
        assert_ok!(store.update(&first).await);

        let mut second = stored;
        second.status = TicketStatus::Expired;
        let err = store.update(&second).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                ticket_id: second.id,
                expected: 1
            }
        );
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = InMemoryTicketStore::new();
        let now = test_clock().now();
        let a = store.insert_reservation(&reservation(1, now), now).await.unwrap();
        let b = store.insert_reservation(&reservation(2, now), now).await.unwrap();

        let mut stale_b = b.clone();
        stale_b.version = 0;
        let mut cancel_a = a.clone();
        cancel_a.status = TicketStatus::Cancelled;
        stale_b.status = TicketStatus::Cancelled;

        assert!(store.update_batch(&[cancel_a, stale_b]).await.is_err());
        assert_eq!(store.get(a.id).await.unwrap().unwrap().status, TicketStatus::Reserved);
    }

    #[tokio::test]
    async fn reminder_marker_is_written_once() {
        let store = InMemoryTicketStore::new();
        let id = TicketId::new();
        assert!(store.mark_reminder_sent(id, 24).await.unwrap());
        assert!(!store.mark_reminder_sent(id, 24).await.unwrap());
        assert!(store.mark_reminder_sent(id, 1).await.unwrap());
    }
}
