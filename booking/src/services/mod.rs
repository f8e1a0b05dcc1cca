//! Booking operations over storage, collaborators and the job queue.
//!
//! Each service owns one concern; [`BookingService`] bundles them behind the
//! operations callers use. All of them share a [`BookingContext`].

pub mod availability;
pub mod cancellation;
pub mod expiry;
pub mod lifecycle;
pub mod reminders;
pub mod reservation;
pub mod statistics;

pub use availability::{AvailabilityService, SeatMap, SeatState};
pub use cancellation::{CancellationReport, CancellationService};
pub use expiry::{ExpiryOutcome, ExpiryService, SweepReport};
pub use lifecycle::{TicketLifecycle, TicketService, Transition};
pub use reminders::{ReminderReport, ReminderService};
pub use reservation::{ReservationRequest, ReservationService};
pub use statistics::{Occupancy, StatisticsService, TripSales};

use crate::aggregates::TicketEnvironment;
use crate::collaborators::{TripDirectory, with_timeout};
use crate::jobs::BookingJob;
use chrono::{DateTime, Utc};
use coachline_core::effect::Effect;
use coachline_core::environment::Clock;
use coachline_core::error::{BookingError, BookingResult};
use coachline_core::store::TicketStore;
use coachline_core::ticket::Ticket;
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{InvoiceId, TicketId, TripId};
use coachline_runtime::{JobSink, submit_effects};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared dependencies of the booking services
#[derive(Clone)]
pub struct BookingContext {
    /// Ticket persistence
    pub store: Arc<dyn TicketStore>,
    /// Trip collaborator
    pub trips: Arc<dyn TripDirectory>,
    /// Where transition effects go
    pub jobs: Arc<dyn JobSink<BookingJob>>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Upper bound for every collaborator call
    pub collaborator_timeout: Duration,
}

impl BookingContext {
    /// Bundle the dependencies
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        trips: Arc<dyn TripDirectory>,
        jobs: Arc<dyn JobSink<BookingJob>>,
        clock: Arc<dyn Clock>,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            trips,
            jobs,
            clock,
            collaborator_timeout,
        }
    }

    /// Current time
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reducer runner bound to this context's store and clock
    #[must_use]
    pub fn lifecycle(&self) -> TicketLifecycle {
        TicketLifecycle::new(
            Arc::clone(&self.store),
            TicketEnvironment::new(Arc::clone(&self.clock)),
        )
    }

    /// Resolve a trip, treating every collaborator failure as unavailability.
    pub(crate) async fn fetch_trip(
        &self,
        trip_id: TripId,
        origin: &str,
        destination: &str,
    ) -> BookingResult<TripSnapshot> {
        match with_timeout(
            "depot",
            self.collaborator_timeout,
            self.trips.get_trip(trip_id, origin, destination),
        )
        .await
        {
            Ok(Some(trip)) => Ok(trip),
            Ok(None) => {
                tracing::debug!(%trip_id, "Trip not found in depot");
                Err(BookingError::TripUnavailable(trip_id))
            }
            Err(error) => {
                tracing::warn!(%trip_id, %error, "Trip lookup failed");
                Err(BookingError::TripUnavailable(trip_id))
            }
        }
    }

    /// Hand committed effects to the job queue
    pub(crate) async fn submit<I>(&self, effects: I) -> usize
    where
        I: IntoIterator<Item = Effect<BookingJob>>,
    {
        submit_effects(self.jobs.as_ref(), effects).await
    }
}

/// Every caller-facing booking operation
#[derive(Clone)]
pub struct BookingService {
    availability: AvailabilityService,
    reservations: ReservationService,
    tickets: TicketService,
    cancellations: CancellationService,
    expiry: ExpiryService,
    reminders: ReminderService,
    statistics: StatisticsService,
}

impl BookingService {
    /// Services over `ctx`, holding seats for `hold` and reminding `reminder_leads` hours ahead
    #[must_use]
    pub fn new(ctx: BookingContext, hold: chrono::Duration, reminder_leads: Vec<u32>) -> Self {
        Self {
            availability: AvailabilityService::new(ctx.clone()),
            reservations: ReservationService::new(ctx.clone(), hold),
            tickets: TicketService::new(ctx.clone()),
            cancellations: CancellationService::new(ctx.clone()),
            expiry: ExpiryService::new(Arc::clone(&ctx.store), Arc::clone(&ctx.clock)),
            reminders: ReminderService::new(ctx.clone(), reminder_leads),
            statistics: StatisticsService::new(ctx),
        }
    }

    /// Reserve a seat; see [`ReservationService::reserve`]
    ///
    /// # Errors
    ///
    /// As [`ReservationService::reserve`].
    pub async fn reserve(&self, request: ReservationRequest) -> BookingResult<Ticket> {
        self.reservations.reserve(request).await
    }

    /// Mark a reservation paid; see [`TicketService::confirm_payment`]
    ///
    /// # Errors
    ///
    /// As [`TicketService::confirm_payment`].
    pub async fn confirm_payment(&self, ticket_id: TicketId, invoice_id: InvoiceId) -> BookingResult<Ticket> {
        self.tickets.confirm_payment(ticket_id, invoice_id).await
    }

    /// Cancel one ticket; see [`CancellationService::cancel`]
    ///
    /// # Errors
    ///
    /// As [`CancellationService::cancel`].
    pub async fn cancel(&self, ticket_id: TicketId) -> BookingResult<Ticket> {
        self.cancellations.cancel(ticket_id).await
    }

    /// Cancel every active ticket on a trip; see [`CancellationService::cancel_for_trip`]
    ///
    /// # Errors
    ///
    /// As [`CancellationService::cancel_for_trip`].
    pub async fn cancel_for_trip(&self, trip_id: TripId) -> BookingResult<CancellationReport> {
        self.cancellations.cancel_for_trip(trip_id).await
    }

    /// Record boarding; see [`TicketService::mark_used`]
    ///
    /// # Errors
    ///
    /// As [`TicketService::mark_used`].
    pub async fn mark_used(&self, ticket_id: TicketId) -> BookingResult<Ticket> {
        self.tickets.mark_used(ticket_id).await
    }

    /// Load a ticket
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown ticket.
    pub async fn ticket(&self, ticket_id: TicketId) -> BookingResult<Ticket> {
        self.tickets.get(ticket_id).await
    }

    /// Seat map of a trip; see [`AvailabilityService::seat_map`]
    ///
    /// # Errors
    ///
    /// As [`AvailabilityService::seat_map`].
    pub async fn seat_map(&self, trip_id: TripId) -> BookingResult<SeatMap> {
        self.availability.seat_map(trip_id).await
    }

    /// Expire one ticket if due; see [`ExpiryService::expire`]
    ///
    /// # Errors
    ///
    /// As [`ExpiryService::expire`].
    pub async fn expire(&self, ticket_id: TicketId) -> BookingResult<ExpiryOutcome> {
        self.expiry.expire(ticket_id).await
    }

    /// Expire every lapsed reservation; see [`ExpiryService::sweep`]
    ///
    /// # Errors
    ///
    /// As [`ExpiryService::sweep`].
    pub async fn sweep_expired(&self) -> BookingResult<SweepReport> {
        self.expiry.sweep().await
    }

    /// Queue due departure reminders; see [`ReminderService::scan`]
    ///
    /// # Errors
    ///
    /// As [`ReminderService::scan`].
    pub async fn send_reminders(&self) -> BookingResult<ReminderReport> {
        self.reminders.scan().await
    }

    /// Paid tickets created in the window; see [`StatisticsService::sales_count`]
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn sales_count(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BookingResult<u64> {
        self.statistics.sales_count(start, end).await
    }

    /// Occupancy of one trip; see [`StatisticsService::occupancy`]
    ///
    /// # Errors
    ///
    /// As [`StatisticsService::occupancy`].
    pub async fn occupancy(&self, trip_id: TripId) -> BookingResult<Occupancy> {
        self.statistics.occupancy(trip_id).await
    }

    /// Best selling trips; see [`StatisticsService::top_trips`]
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn top_trips(&self, limit: usize) -> BookingResult<Vec<TripSales>> {
        self.statistics.top_trips(limit).await
    }

    /// Ticket counts per status, for one trip or all
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn status_breakdown(
        &self,
        trip_id: Option<TripId>,
    ) -> BookingResult<BTreeMap<String, u64>> {
        self.statistics.status_breakdown(trip_id).await
    }

    /// The reservation service, for callers that already hold a trip snapshot
    #[must_use]
    pub const fn reservations(&self) -> &ReservationService {
        &self.reservations
    }

    /// The expiry service
    #[must_use]
    pub const fn expiry(&self) -> &ExpiryService {
        &self.expiry
    }

    /// The reminder service
    #[must_use]
    pub const fn reminders(&self) -> &ReminderService {
        &self.reminders
    }
}
