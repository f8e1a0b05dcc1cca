//! Seat availability derived from active tickets.

use super::BookingContext;
use coachline_core::error::BookingResult;
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{SeatNumber, TripId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// State of one seat as shown to passengers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatState {
    /// Free to reserve
    Available,
    /// Held by a reservation or a paid ticket
    Reserved,
}

/// A trip together with the state of each of its seats
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeatMap {
    /// Trip the map belongs to
    pub trip: TripSnapshot,
    /// Seats 1 through the bus capacity
    pub seats: BTreeMap<SeatNumber, SeatState>,
}

impl SeatMap {
    /// Seats still free
    #[must_use]
    pub fn available(&self) -> usize {
        self.seats.values().filter(|s| **s == SeatState::Available).count()
    }
}

/// Status of every seat from 1 to `capacity`. Held seats beyond the capacity are ignored.
#[must_use]
pub fn status_map(taken: &BTreeSet<SeatNumber>, capacity: u32) -> BTreeMap<SeatNumber, SeatState> {
    (1..=capacity)
        .filter_map(|n| SeatNumber::new(n).ok())
        .map(|seat| {
            let state = if taken.contains(&seat) {
                SeatState::Reserved
            } else {
                SeatState::Available
            };
            (seat, state)
        })
        .collect()
}

/// Read-only seat queries
#[derive(Clone)]
pub struct AvailabilityService {
    ctx: BookingContext,
}

impl AvailabilityService {
    /// Queries over the shared context
    #[must_use]
    pub const fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    /// Seats held by active tickets, ascending
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn taken_seats(&self, trip_id: TripId) -> BookingResult<BTreeSet<SeatNumber>> {
        Ok(self.ctx.store.taken_seats(trip_id, self.ctx.now()).await?)
    }

    /// Whether an active ticket holds the seat
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn is_seat_taken(&self, trip_id: TripId, seat: SeatNumber) -> BookingResult<bool> {
        Ok(self.ctx.store.is_seat_taken(trip_id, seat, self.ctx.now()).await?)
    }

    /// Status of seats `1..=capacity`
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn seat_status_map(
        &self,
        trip_id: TripId,
        capacity: u32,
    ) -> BookingResult<BTreeMap<SeatNumber, SeatState>> {
        let taken = self.taken_seats(trip_id).await?;
        Ok(status_map(&taken, capacity))
    }

    /// Trip snapshot and seat states, sized by the bus capacity the depot reports
    ///
    /// # Errors
    ///
    /// [`coachline_core::error::BookingError::TripUnavailable`] when the trip
    /// does not resolve, or storage failures.
    pub async fn seat_map(&self, trip_id: TripId) -> BookingResult<SeatMap> {
        let trip = self.ctx.fetch_trip(trip_id, "", "").await?;
        let seats = self.seat_status_map(trip_id, trip.bus_capacity).await?;
        Ok(SeatMap { trip, seats })
    }
}
