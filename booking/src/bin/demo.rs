//! Scripted walk-through of the booking lifecycle.
//!
//! Runs entirely in memory against the bundled trip catalog, with a clock the
//! script moves forward by hand.
//!
//! ```bash
//! cargo run --bin demo
//! ```

use anyhow::{Context, bail};
use chrono::{Duration, TimeZone, Utc};
use coachline_booking::collaborators::{
    JsonTripDirectory, LocalDocumentRenderer, MockPaymentGateway, NotificationKind, RecordingNotifier,
};
use coachline_booking::{BookingApp, Config, ReservationRequest, Resources};
use coachline_core::error::BookingError;
use coachline_core::ticket::Owner;
use coachline_core::types::{InvoiceId, TripId, UserId};
use coachline_testing::{InMemoryTicketStore, MockClock};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CATALOG: &[u8] = include_bytes!("../../fixtures/trips.json");

fn request(trip: i64, seat: u32, name: &str) -> ReservationRequest {
    ReservationRequest {
        trip_id: TripId::new(trip),
        seat_number: seat,
        origin: "Chisinau".to_string(),
        destination: "Balti".to_string(),
        owner: Owner::new(UserId::new(), format!("{}@example.com", name.to_lowercase()), name),
    }
}

#[tokio::main]
#[allow(clippy::too_many_lines)] // one linear script
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,coachline_booking=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Coachline booking demo ===\n");

    let start = Utc
        .with_ymd_and_hms(2025, 1, 1, 9, 0, 0)
        .single()
        .context("valid start time")?;
    let clock = Arc::new(MockClock::starting_at(start));
    let notifier = Arc::new(RecordingNotifier::new());
    let payments = Arc::new(MockPaymentGateway::new());

    let config = Config::from_lookup(|var| match var {
        "STORAGE_BACKEND" => Some("memory".to_string()),
        "JOB_INITIAL_BACKOFF_MS" => Some("10".to_string()),
        _ => None,
    })?;
    let resources = Resources {
        store: Arc::new(InMemoryTicketStore::new()),
        trips: Arc::new(JsonTripDirectory::from_json(CATALOG)?),
        payments: payments.clone(),
        notifier: notifier.clone(),
        documents: Arc::new(LocalDocumentRenderer::new(std::env::temp_dir().join("coachline-demo"))),
    };
    let app = BookingApp::start(resources, &config, clock.clone());
    let booking = app.service();

    println!("1. Reserve seat 5 on trip 1");
    let first = booking.reserve(request(1, 5, "Ana")).await?;
    println!(
        "   ticket {} is {} until {:?} ({}, {})",
        first.id, first.status, first.reserved_until, first.description(), first.price
    );

    println!("\n2. Reserve seat 5 again");
    match booking.reserve(request(1, 5, "Dan")).await {
        Err(BookingError::SeatAlreadyTaken { seat, .. }) => println!("   rejected: seat {seat} is taken"),
        other => bail!("expected a seat conflict, got {other:?}"),
    }

    println!("\n3. Sixteen minutes pass without payment; the sweep runs");
    clock.advance(Duration::minutes(16));
    let report = booking.sweep_expired().await?;
    println!("   sweep expired {} reservation(s)", report.expired);
    println!("   ticket {} is now {}", first.id, booking.ticket(first.id).await?.status);

    println!("\n4. Seat 5 is free again");
    let second = booking.reserve(request(1, 5, "Dan")).await?;
    println!("   ticket {} reserved by {}", second.id, second.owner.display_name);

    println!("\n5. Confirm payment with INV-1");
    let paid = booking.confirm_payment(second.id, InvoiceId::new("INV-1")).await?;
    println!("   ticket {} is {} with invoice {:?}", paid.id, paid.status, paid.invoice_id);

    println!("\n6. Confirm the same ticket again");
    match booking.confirm_payment(second.id, InvoiceId::new("INV-2")).await {
        Err(err @ BookingError::InvalidStateTransition { .. }) => println!("   rejected: {err}"),
        other => bail!("expected an invalid transition, got {other:?}"),
    }

    println!("\n7. Cancel a reservation and a paid ticket");
    let held = booking.reserve(request(1, 7, "Eva")).await?;
    let cancelled = booking.cancel(held.id).await?;
    println!("   reserved ticket {} -> {} (no refund owed)", cancelled.id, cancelled.status);
    let cancelled = booking.cancel(paid.id).await?;
    println!("   paid ticket {} -> {} (refund queued)", cancelled.id, cancelled.status);

    println!("\n8. Trip 2 is called off");
    let a = booking.reserve(request(2, 1, "Ion")).await?;
    let b = booking.reserve(request(2, 2, "Maria")).await?;
    booking.confirm_payment(a.id, InvoiceId::new("INV-3")).await?;
    let report = booking.cancel_for_trip(TripId::new(2)).await?;
    println!(
        "   cancelled {} ticket(s), {} refund(s) owed, {} untouched",
        report.cancelled.len(),
        report.refunds_owed(),
        report.failed.len()
    );
    println!("   ticket {} is {}", b.id, booking.ticket(b.id).await?.status);

    println!("\n9. Seat map and sales for trip 1");
    let map = booking.seat_map(TripId::new(1)).await?;
    println!(
        "   {} ({}): {} of {} seats available",
        map.trip.trip_nr,
        map.trip.route_name,
        map.available(),
        map.trip.bus_capacity
    );
    let sold = booking.reserve(request(1, 12, "Olga")).await?;
    booking.confirm_payment(sold.id, InvoiceId::new("INV-4")).await?;
    let occupancy = booking.occupancy(TripId::new(1)).await?;
    println!("   occupancy {}% ({} sold)", occupancy.rate, occupancy.sold);
    println!("   paid tickets overall: {}", booking.sales_count(None, None).await?);

    // Let queued jobs run before reporting what the collaborators saw
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    println!("\n10. Collaborator activity");
    println!("   invoices issued: {}", payments.charges().len());
    println!("   refunds issued: {}", payments.refunds().len());
    println!(
        "   emails: {} ticket, {} cancellation",
        notifier.sent_of(NotificationKind::TicketReady).len(),
        notifier.sent_of(NotificationKind::TripCancelled).len()
    );

    app.shutdown().await?;
    println!("\n=== Demo complete ===");
    Ok(())
}
