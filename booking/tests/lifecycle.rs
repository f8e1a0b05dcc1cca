//! End-to-end ticket lifecycle against the in-memory store.

#![allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic

mod common;

use chrono::Duration;
use coachline_booking::BookingJob;
use async_trait::async_trait;
use coachline_booking::collaborators::{CollaboratorError, JsonTripDirectory, TripDirectory};
use coachline_core::trip::TripSnapshot;
use coachline_booking::services::ExpiryOutcome;
use coachline_core::error::BookingError;
use coachline_core::ticket::TicketStatus;
use coachline_core::types::{InvoiceId, Money, TripId};
use common::{BIG_TRIP, Harness, SMALL_TRIP, owner, request, seat};

#[tokio::test]
async fn reservation_holds_the_seat_for_fifteen_minutes() {
    let h = Harness::new();

    let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();

    assert_eq!(ticket.status, TicketStatus::Reserved);
    assert_eq!(ticket.reserved_until, Some(ticket.created_at + Duration::minutes(15)));
    assert_eq!(ticket.price, Money::from_cents(15_000));
    assert_eq!(ticket.version, 1);

    let scheduled = h.jobs.scheduled().await;
    assert_eq!(
        scheduled,
        vec![
            (ticket.reserved_until, BookingJob::ExpireTicket { ticket_id: ticket.id }),
            (None, BookingJob::InitiatePayment { ticket_id: ticket.id }),
        ]
    );
}

#[tokio::test]
async fn second_reservation_of_a_held_seat_is_rejected() {
    let h = Harness::new();
    h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();

    let err = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap_err();

    assert_eq!(
        err,
        BookingError::SeatAlreadyTaken {
            trip_id: TripId::new(BIG_TRIP),
            seat: seat(5)
        }
    );
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn seat_is_free_again_once_the_hold_lapses() {
    let h = Harness::new();
    let first = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();

    h.clock.advance(Duration::minutes(16));
    let second = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(h.status(&first).await, TicketStatus::Expired);
    assert_eq!(h.status(&second).await, TicketStatus::Reserved);
}

#[tokio::test]
async fn same_seat_on_another_trip_is_independent() {
    let h = Harness::new();
    h.service.reserve(request(BIG_TRIP, 3)).await.unwrap();
    assert!(h.service.reserve(request(SMALL_TRIP, 3)).await.is_ok());
}

#[tokio::test]
async fn confirm_marks_paid_and_queues_document_and_email() {
    let h = Harness::new();
    let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();
    h.jobs.take().await;

    let paid = h
        .service
        .confirm_payment(ticket.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();

    assert_eq!(paid.status, TicketStatus::Paid);
    assert_eq!(paid.invoice_id, Some(InvoiceId::new("INV-1")));
    assert_eq!(paid.reserved_until, None);
    assert_eq!(
        h.jobs.jobs().await,
        vec![
            BookingJob::RenderDocument { ticket_id: ticket.id },
            BookingJob::SendTicketEmail { ticket_id: ticket.id },
        ]
    );
}

#[tokio::test]
async fn confirming_twice_fails_and_leaves_the_ticket_alone() {
    let h = Harness::new();
    let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();
    let paid = h
        .service
        .confirm_payment(ticket.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();

    let err = h
        .service
        .confirm_payment(ticket.id, InvoiceId::new("INV-2"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidStateTransition {
            status: TicketStatus::Paid,
            ..
        }
    ));
    assert_eq!(h.service.ticket(ticket.id).await.unwrap(), paid);
}

#[tokio::test]
async fn invoice_attached_elsewhere_is_rejected() {
    let h = Harness::new();
    let first = h.service.reserve(request(BIG_TRIP, 1)).await.unwrap();
    let second = h.service.reserve(request(BIG_TRIP, 2)).await.unwrap();
    h.service
        .confirm_payment(first.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();

    let err = h
        .service
        .confirm_payment(second.id, InvoiceId::new("INV-1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidStateTransition {
            status: TicketStatus::Reserved,
            action: "confirm",
            ..
        }
    ));
    assert_eq!(h.status(&second).await, TicketStatus::Reserved);
}

#[tokio::test]
async fn confirming_an_expired_reservation_fails() {
    let h = Harness::new();
    let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();
    h.clock.advance(Duration::minutes(15));
    assert_eq!(h.service.expire(ticket.id).await.unwrap(), ExpiryOutcome::Expired);

    let err = h
        .service
        .confirm_payment(ticket.id, InvoiceId::new("INV-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn paid_ticket_can_be_used_once() {
    let h = Harness::new();
    let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();

    assert!(matches!(
        h.service.mark_used(ticket.id).await,
        Err(BookingError::InvalidStateTransition { .. })
    ));

    h.service
        .confirm_payment(ticket.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();
    let used = h.service.mark_used(ticket.id).await.unwrap();
    assert_eq!(used.status, TicketStatus::Used);

    assert!(h.service.cancel(ticket.id).await.is_err());
}

#[tokio::test]
async fn unknown_ticket_is_not_found() {
    let h = Harness::new();
    let missing = coachline_core::types::TicketId::new();
    assert_eq!(
        h.service.confirm_payment(missing, InvoiceId::new("INV-9")).await,
        Err(BookingError::NotFound(missing))
    );
    assert_eq!(h.service.expire(missing).await, Ok(ExpiryOutcome::Missing));
}

#[tokio::test]
async fn unknown_trip_is_unavailable() {
    let h = Harness::new();
    let err = h.service.reserve(request(99, 1)).await.unwrap_err();
    assert_eq!(err, BookingError::TripUnavailable(TripId::new(99)));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn seats_outside_the_bus_are_rejected() {
    let h = Harness::new();
    for seat_number in [0, 5] {
        let err = h.service.reserve(request(SMALL_TRIP, seat_number)).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)), "seat {seat_number}: {err:?}");
    }
    assert!(h.service.reserve(request(SMALL_TRIP, 4)).await.is_ok());
}

#[tokio::test]
async fn short_place_names_are_rejected() {
    let h = Harness::new();
    let mut req = request(BIG_TRIP, 1);
    req.origin = "AB".to_string();
    assert!(matches!(
        h.service.reserve(req).await,
        Err(BookingError::Validation(_))
    ));
}

#[tokio::test]
async fn create_ticket_uses_caller_price_and_depot_capacity() {
    let h = Harness::new();
    let ticket = h
        .service
        .reservations()
        .create_ticket(TripId::new(SMALL_TRIP), 2, "Chisinau", "Cahul", Money::from_cents(9_550), owner("ion"))
        .await
        .unwrap();

    assert_eq!(ticket.price, Money::from_cents(9_550));
    assert_eq!(ticket.destination, "Cahul");

    let err = h
        .service
        .reservations()
        .create_ticket(TripId::new(SMALL_TRIP), 9, "Chisinau", "Cahul", Money::from_cents(1), owner("ion"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

#[tokio::test]
async fn seat_map_reflects_active_tickets() {
    let h = Harness::new();
    let held = h.service.reserve(request(SMALL_TRIP, 1)).await.unwrap();
    let paid = h.service.reserve(request(SMALL_TRIP, 3)).await.unwrap();
    h.service
        .confirm_payment(paid.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();
    h.service.cancel(held.id).await.unwrap();

    let map = h.service.seat_map(TripId::new(SMALL_TRIP)).await.unwrap();

    assert_eq!(map.trip.bus_capacity, 4);
    assert_eq!(map.seats.len(), 4);
    assert_eq!(map.available(), 3);
    assert_eq!(map.seats[&seat(3)], coachline_booking::services::SeatState::Reserved);
}

#[tokio::test]
async fn lapsed_hold_shows_as_available_before_the_sweep() {
    let h = Harness::new();
    h.service.reserve(request(SMALL_TRIP, 2)).await.unwrap();
    h.clock.advance(Duration::minutes(20));

    let map = h.service.seat_map(TripId::new(SMALL_TRIP)).await.unwrap();
    assert_eq!(map.available(), 4);
}

#[tokio::test]
async fn statistics_count_paid_tickets() {
    let h = Harness::new();
    for (n, seat_number) in [1, 2, 3].into_iter().enumerate() {
        let ticket = h.service.reserve(request(SMALL_TRIP, seat_number)).await.unwrap();
        if n < 2 {
            h.service
                .confirm_payment(ticket.id, InvoiceId::new(format!("INV-{n}")))
                .await
                .unwrap();
        }
    }
    let other = h.service.reserve(request(BIG_TRIP, 1)).await.unwrap();
    h.service
        .confirm_payment(other.id, InvoiceId::new("INV-X"))
        .await
        .unwrap();

    assert_eq!(h.service.sales_count(None, None).await.unwrap(), 3);

    let occupancy = h.service.occupancy(TripId::new(SMALL_TRIP)).await.unwrap();
    assert_eq!(occupancy.sold, 2);
    assert!((occupancy.rate - 50.0).abs() < f64::EPSILON);

    let top = h.service.top_trips(5).await.unwrap();
    assert_eq!(top[0].trip_id, TripId::new(SMALL_TRIP));
    assert_eq!(top[0].paid, 2);
    assert_eq!(top[1].paid, 1);

    let breakdown = h.service.status_breakdown(Some(TripId::new(SMALL_TRIP))).await.unwrap();
    assert_eq!(breakdown.get("paid"), Some(&2));
    assert_eq!(breakdown.get("reserved"), Some(&1));
}

#[tokio::test]
async fn top_trips_keep_trips_the_depot_no_longer_knows() {
    let h = Harness::with_directory(JsonTripDirectory::default());
    let ticket = h.service.reserve(request(BIG_TRIP, 1)).await;
    assert!(ticket.is_err());

    let seeded = h.seed(7, 1, TicketStatus::Paid).await;
    let top = h.service.top_trips(3).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].trip_id, seeded.trip_id);
    assert_eq!(top[0].occupancy, None);
}

/// Depot that accepts the call and never answers
struct SilentDepot;

#[async_trait]
impl TripDirectory for SilentDepot {
    async fn get_trip(
        &self,
        _trip_id: TripId,
        _origin: &str,
        _destination: &str,
    ) -> Result<Option<TripSnapshot>, CollaboratorError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn silent_depot_times_out_as_trip_unavailable() {
    let h = Harness::with_directory(SilentDepot);
    let trip = TripId::new(BIG_TRIP);

    let err = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap_err();
    assert_eq!(err, BookingError::TripUnavailable(trip));

    let err = h
        .service
        .reservations()
        .create_ticket(trip, 5, "Chisinau", "Balti", Money::from_cents(15_000), owner("ana"))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::TripUnavailable(trip));

    let err = h.service.seat_map(trip).await.unwrap_err();
    assert_eq!(err, BookingError::TripUnavailable(trip));

    assert!(h.store.is_empty().await);
    assert!(h.jobs.jobs().await.is_empty());
}
