//! Many tasks racing for the same seat or the same ticket.

#![allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic

mod common;

use chrono::Duration;
use coachline_core::error::BookingError;
use coachline_core::ticket::TicketStatus;
use coachline_core::types::InvoiceId;
use common::{BIG_TRIP, Harness, request};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn only_one_of_fifty_concurrent_reservations_wins() {
    let h = Harness::new();

    let attempts = (0..50).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move { service.reserve(request(BIG_TRIP, 5)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::SeatAlreadyTaken { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 49);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_of_distinct_seats_all_succeed() {
    let h = Harness::new();

    let attempts = (1..=20).map(|n| {
        let service = h.service.clone();
        tokio::spawn(async move { service.reserve(request(BIG_TRIP, n)).await })
    });
    let results = join_all(attempts).await;

    assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
    assert_eq!(h.store.len().await, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payment_racing_expiry_has_exactly_one_winner() {
    for _ in 0..20 {
        let h = Harness::new();
        let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();
        h.clock.advance(Duration::minutes(15));

        let confirm = {
            let service = h.service.clone();
            tokio::spawn(async move { service.confirm_payment(ticket.id, InvoiceId::new("INV-1")).await })
        };
        let expire = {
            let service = h.service.clone();
            tokio::spawn(async move { service.expire(ticket.id).await })
        };
        let (confirmed, expired) = (confirm.await.unwrap(), expire.await.unwrap());

        match h.status(&ticket).await {
            TicketStatus::Paid => assert!(confirmed.is_ok()),
            TicketStatus::Expired => {
                assert!(matches!(confirmed, Err(BookingError::InvalidStateTransition { .. })));
            }
            other => panic!("unexpected final status {other}"),
        }
        assert!(expired.is_ok());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancellations_cancel_once() {
    let h = Harness::new();
    let ticket = h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();
    h.service
        .confirm_payment(ticket.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();
    h.jobs.take().await;

    let attempts = (0..10).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move { service.cancel(ticket.id).await })
    });
    let results = join_all(attempts).await;

    let successes = results.into_iter().filter(|r| r.as_ref().unwrap().is_ok()).count();
    assert_eq!(successes, 1);
    assert_eq!(h.jobs.count_kind("refund_payment").await, 1);
}
