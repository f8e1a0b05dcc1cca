//! Property: whatever happens, no seat is ever held by two active tickets.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

mod common;

use chrono::Duration;
use coachline_core::environment::Clock;
use coachline_core::types::{InvoiceId, Money, SeatNumber, TripId};
use coachline_testing::properties::{price, seat_on};
use common::{Harness, SMALL_TRIP, owner, request};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Step {
    Reserve(SeatNumber),
    Sell(SeatNumber, Money),
    Pay(usize),
    Cancel(usize),
    Wait(i64),
    Sweep,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => seat_on(4).prop_map(Step::Reserve),
        1 => (seat_on(4), price()).prop_map(|(seat, price)| Step::Sell(seat, price)),
        2 => any::<usize>().prop_map(Step::Pay),
        1 => any::<usize>().prop_map(Step::Cancel),
        2 => (1_i64..=20).prop_map(Step::Wait),
        1 => Just(Step::Sweep),
    ]
}

async fn run(steps: Vec<Step>) {
    let h = Harness::new();
    let mut issued = Vec::new();

    for (n, step) in steps.into_iter().enumerate() {
        match step {
            Step::Reserve(seat) => {
                if let Ok(ticket) = h.service.reserve(request(SMALL_TRIP, seat.get())).await {
                    issued.push(ticket.id);
                }
            }
            Step::Sell(seat, price) => {
                let created = h
                    .service
                    .reservations()
                    .create_ticket(TripId::new(SMALL_TRIP), seat.get(), "Chisinau", "Cahul", price, owner("ion"))
                    .await;
                if let Ok(ticket) = created {
                    assert_eq!(ticket.price, price);
                    issued.push(ticket.id);
                }
            }
            Step::Pay(pick) if !issued.is_empty() => {
                let id = issued[pick % issued.len()];
                let _ = h.service.confirm_payment(id, InvoiceId::new(format!("INV-{n}"))).await;
            }
            Step::Cancel(pick) if !issued.is_empty() => {
                let id = issued[pick % issued.len()];
                let _ = h.service.cancel(id).await;
            }
            Step::Wait(minutes) => h.clock.advance(Duration::minutes(minutes)),
            Step::Sweep => {
                h.service.sweep_expired().await.unwrap();
            }
            Step::Pay(_) | Step::Cancel(_) => {}
        }

        let now = h.clock.now();
        let mut holders: HashMap<u32, usize> = HashMap::new();
        for ticket in h.store.all().await {
            if ticket.is_active(now) {
                *holders.entry(ticket.seat_number.get()).or_default() += 1;
            }
        }
        assert!(
            holders.values().all(|count| *count <= 1),
            "seat held twice: {holders:?}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_active_ticket_per_seat(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(run(steps));
    }
}
