//! Shared fixtures for the booking integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, NaiveDate, NaiveTime};
use coachline_booking::collaborators::{JsonTripDirectory, TripDirectory};
use coachline_booking::services::{BookingContext, BookingService, ReservationRequest};
use coachline_booking::BookingJob;
use coachline_core::environment::Clock;
use coachline_core::ticket::{Owner, Ticket, TicketStatus};
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{InvoiceId, Money, SeatNumber, TripId, UserId};
use coachline_testing::{InMemoryTicketStore, MockClock, RecordingJobSink, test_clock};
use std::sync::Arc;

/// Trip 1: 52 seats, departs 2025-01-02 08:30
pub const BIG_TRIP: i64 = 1;
/// Trip 2: 4 seats, departs 2025-01-03 14:00
pub const SMALL_TRIP: i64 = 2;

pub fn trip(id: i64, capacity: u32, date: (i32, u32, u32), departs: Option<(u32, u32)>) -> TripSnapshot {
    TripSnapshot {
        id: TripId::new(id),
        trip_nr: format!("TR-{id}"),
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        status: "scheduled".to_string(),
        price: Money::from_cents(15_000),
        origin: "Chisinau".to_string(),
        destination: "Balti".to_string(),
        start_time: departs.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
        end_time: None,
        bus_capacity: capacity,
        bus_model: "Setra".to_string(),
        bus_plate_number: "C AB 123".to_string(),
        driver_name: "Ion Popescu".to_string(),
        route_name: "Chisinau - Balti".to_string(),
    }
}

pub fn catalog() -> JsonTripDirectory {
    JsonTripDirectory::from_trips([
        trip(BIG_TRIP, 52, (2025, 1, 2), Some((8, 30))),
        trip(SMALL_TRIP, 4, (2025, 1, 3), Some((14, 0))),
    ])
}

pub fn owner(name: &str) -> Owner {
    Owner::new(UserId::new(), format!("{name}@example.com"), name)
}

pub fn request(trip_id: i64, seat: u32) -> ReservationRequest {
    ReservationRequest {
        trip_id: TripId::new(trip_id),
        seat_number: seat,
        origin: "Chisinau".to_string(),
        destination: "Balti".to_string(),
        owner: owner("ana"),
    }
}

pub fn seat(n: u32) -> SeatNumber {
    SeatNumber::new(n).unwrap()
}

/// In-memory world with a hand-driven clock starting 2025-01-01T00:00Z
pub struct Harness {
    pub store: Arc<InMemoryTicketStore>,
    pub clock: Arc<MockClock>,
    pub jobs: Arc<RecordingJobSink<BookingJob>>,
    pub ctx: BookingContext,
    pub service: BookingService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_directory(catalog())
    }

    pub fn with_directory(directory: impl TripDirectory + 'static) -> Self {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::starting_at(test_clock().now()));
        let jobs = Arc::new(RecordingJobSink::new());
        let ctx = BookingContext::new(
            store.clone(),
            Arc::new(directory),
            jobs.clone(),
            clock.clone(),
            std::time::Duration::from_secs(1),
        );
        let service = BookingService::new(ctx.clone(), Duration::minutes(15), vec![24, 1]);
        Self {
            store,
            clock,
            jobs,
            ctx,
            service,
        }
    }

    /// Store a ticket directly in `status`, as if it had got there earlier
    pub async fn seed(&self, trip_id: i64, seat_number: u32, status: TicketStatus) -> Ticket {
        let mut ticket = Ticket::reserve(
            TripId::new(trip_id),
            seat(seat_number),
            "Chisinau",
            "Balti",
            Money::from_cents(15_000),
            owner("seeded"),
            self.clock.now(),
            Duration::minutes(15),
        );
        ticket.status = status;
        ticket.version = 1;
        if status != TicketStatus::Reserved {
            ticket.reserved_until = None;
        }
        if status == TicketStatus::Paid {
            ticket.invoice_id = Some(InvoiceId::new(format!("INV-{}", ticket.id)));
        }
        self.store.seed(ticket.clone()).await;
        ticket
    }

    pub async fn status(&self, ticket: &Ticket) -> TicketStatus {
        self.service.ticket(ticket.id).await.unwrap().status
    }
}
