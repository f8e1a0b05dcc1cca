//! Seat reservation.
//!
//! The availability check before the insert only saves a round trip for the
//! common case. The store's insert is what decides a race for the same seat.

use super::BookingContext;
use crate::aggregates::TicketReducer;
use crate::collaborators::with_timeout;
use coachline_core::error::{BookingError, BookingResult};
use coachline_core::ticket::{MIN_PLACE_LEN, Owner, Ticket};
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{Money, SeatNumber, TripId};
use serde::Deserialize;

/// What a passenger asks for
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReservationRequest {
    /// Trip to travel on
    pub trip_id: TripId,
    /// Requested seat, 1-based
    pub seat_number: u32,
    /// Boarding stop
    pub origin: String,
    /// Alighting stop
    pub destination: String,
    /// Passenger
    pub owner: Owner,
}

fn validate_place(field: &str, value: &str) -> BookingResult<()> {
    if value.trim().chars().count() < MIN_PLACE_LEN {
        return Err(BookingError::Validation(format!(
            "{field} must be at least {MIN_PLACE_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_seat(seat_number: u32, capacity: u32) -> BookingResult<SeatNumber> {
    SeatNumber::new(seat_number)
        .ok()
        .filter(|seat| seat.fits(capacity))
        .ok_or_else(|| {
            BookingError::Validation(format!(
                "seat {seat_number} is outside the bus capacity of {capacity}"
            ))
        })
}

/// Prefer the depot's display name unless it is too short to be one
fn place_name(from_trip: &str, requested: &str) -> String {
    if from_trip.trim().chars().count() >= MIN_PLACE_LEN {
        from_trip.to_string()
    } else {
        requested.trim().to_string()
    }
}

/// Creates reservations
#[derive(Clone)]
pub struct ReservationService {
    ctx: BookingContext,
    hold: chrono::Duration,
}

impl ReservationService {
    /// Reservations held for `hold` before they expire
    #[must_use]
    pub const fn new(ctx: BookingContext, hold: chrono::Duration) -> Self {
        Self { ctx, hold }
    }

    /// How long a fresh reservation holds its seat
    #[must_use]
    pub const fn hold(&self) -> chrono::Duration {
        self.hold
    }

    /// Reserve a seat for the passenger.
    ///
    /// Price and place names come from the trip snapshot and are never
    /// recomputed afterwards.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] for short place names or a seat outside the bus
    /// - [`BookingError::TripUnavailable`] when the depot cannot resolve the trip
    /// - [`BookingError::SeatAlreadyTaken`] when an active ticket holds the seat
    pub async fn reserve(&self, request: ReservationRequest) -> BookingResult<Ticket> {
        validate_place("origin", &request.origin)?;
        validate_place("destination", &request.destination)?;

        let trip = self
            .ctx
            .fetch_trip(request.trip_id, &request.origin, &request.destination)
            .await?;

        self.place(
            &trip,
            request.seat_number,
            place_name(&trip.origin, &request.origin),
            place_name(&trip.destination, &request.destination),
            trip.price,
            request.owner,
        )
        .await
    }

    /// Create a reservation with caller-supplied price and place names.
    ///
    /// The seat is still checked against the bus capacity the depot reports.
    ///
    /// # Errors
    ///
    /// Same as [`ReservationService::reserve`].
    pub async fn create_ticket(
        &self,
        trip_id: TripId,
        seat_number: u32,
        origin: &str,
        destination: &str,
        price: Money,
        owner: Owner,
    ) -> BookingResult<Ticket> {
        validate_place("origin", origin)?;
        validate_place("destination", destination)?;

        let capacity = match with_timeout(
            "depot",
            self.ctx.collaborator_timeout,
            self.ctx.trips.get_capacity(trip_id),
        )
        .await
        {
            Ok(Some(capacity)) => capacity,
            Ok(None) => return Err(BookingError::TripUnavailable(trip_id)),
            Err(error) => {
                tracing::warn!(%trip_id, %error, "Capacity lookup failed");
                return Err(BookingError::TripUnavailable(trip_id));
            }
        };

        let seat = validate_seat(seat_number, capacity)?;
        self.insert(trip_id, seat, origin.trim(), destination.trim(), price, owner)
            .await
    }

    async fn place(
        &self,
        trip: &TripSnapshot,
        seat_number: u32,
        origin: String,
        destination: String,
        price: Money,
        owner: Owner,
    ) -> BookingResult<Ticket> {
        let seat = validate_seat(seat_number, trip.bus_capacity)?;
        self.insert(trip.id, seat, origin, destination, price, owner).await
    }

    async fn insert(
        &self,
        trip_id: TripId,
        seat: SeatNumber,
        origin: impl Into<String>,
        destination: impl Into<String>,
        price: Money,
        owner: Owner,
    ) -> BookingResult<Ticket> {
        let now = self.ctx.now();

        if self.ctx.store.is_seat_taken(trip_id, seat, now).await? {
            metrics::counter!("seat_conflicts_total").increment(1);
            tracing::debug!(%trip_id, %seat, "Seat already held");
            return Err(BookingError::SeatAlreadyTaken { trip_id, seat });
        }

        let ticket = Ticket::reserve(trip_id, seat, origin, destination, price, owner, now, self.hold);
        let ticket = match self.ctx.store.insert_reservation(&ticket, now).await {
            Ok(stored) => stored,
            Err(err) => {
                let err = BookingError::from(err);
                if matches!(err, BookingError::SeatAlreadyTaken { .. }) {
                    metrics::counter!("seat_conflicts_total").increment(1);
                    tracing::debug!(%trip_id, %seat, "Lost the race for the seat");
                }
                return Err(err);
            }
        };

        metrics::counter!("tickets_reserved_total").increment(1);
        tracing::info!(
            ticket_id = %ticket.id,
            %trip_id,
            %seat,
            reserved_until = ?ticket.reserved_until,
            "Seat reserved"
        );

        self.ctx.submit(TicketReducer::on_reserved(&ticket)).await;
        Ok(ticket)
    }
}
