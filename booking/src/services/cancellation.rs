//! Ticket cancellation, one at a time or a whole trip at once.

use super::{BookingContext, TicketLifecycle};
use super::lifecycle::MAX_WRITE_ATTEMPTS;
use crate::aggregates::{TicketAction, TicketEnvironment, TicketReducer};
use crate::jobs::BookingJob;
use coachline_core::effect::Effect;
use coachline_core::error::{BookingResult, StoreError};
use coachline_core::reducer::Reducer;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::types::{TicketId, TripId};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of cancelling a trip
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CancellationReport {
    /// Tickets now cancelled, with the status each had before
    pub cancelled: Vec<(TicketId, TicketStatus)>,
    /// Tickets left untouched because they no longer held a seat
    pub failed: Vec<(TicketId, TicketStatus)>,
}

impl CancellationReport {
    /// Cancelled tickets that had been paid and are owed a refund
    #[must_use]
    pub fn refunds_owed(&self) -> usize {
        self.cancelled
            .iter()
            .filter(|(_, status)| *status == TicketStatus::Paid)
            .count()
    }
}

/// Cancels tickets and queues their refunds and notifications
#[derive(Clone)]
pub struct CancellationService {
    ctx: BookingContext,
    lifecycle: TicketLifecycle,
    reducer: TicketReducer,
    env: TicketEnvironment,
}

impl CancellationService {
    /// Service over the shared context
    #[must_use]
    pub fn new(ctx: BookingContext) -> Self {
        Self {
            lifecycle: ctx.lifecycle(),
            reducer: TicketReducer::new(),
            env: TicketEnvironment::new(Arc::clone(&ctx.clock)),
            ctx,
        }
    }

    /// Cancel one reserved or paid ticket. A paid ticket gets a refund job.
    ///
    /// # Errors
    ///
    /// [`coachline_core::error::BookingError::InvalidStateTransition`] when the
    /// ticket no longer holds its seat, `NotFound` for unknown ids.
    pub async fn cancel(&self, ticket_id: TicketId) -> BookingResult<Ticket> {
        let transition = self.lifecycle.apply(ticket_id, TicketAction::Cancel).await?;
        metrics::counter!("tickets_cancelled_total").increment(1);
        tracing::info!(%ticket_id, trip_id = %transition.ticket.trip_id, "Ticket cancelled");
        self.ctx.submit(transition.effects).await;
        Ok(transition.ticket)
    }

    /// Cancel every reserved or paid ticket on the trip in one atomic write.
    ///
    /// Tickets in any other state are reported as failed and left as they are.
    /// After the write commits, each formerly paid ticket gets a refund job and
    /// every cancelled ticket gets a notification job. A trip without tickets
    /// yields an empty report.
    ///
    /// # Errors
    ///
    /// Storage failures. A batch that keeps losing version races surfaces as
    /// [`StoreError::Conflict`] after a bounded number of attempts.
    pub async fn cancel_for_trip(&self, trip_id: TripId) -> BookingResult<CancellationReport> {
        let mut attempt = 0;
        let (report, effects) = loop {
            attempt += 1;
            let tickets = self.ctx.store.for_trip(trip_id).await?;
            let (report, updated, effects) = self.partition(tickets)?;

            if updated.is_empty() {
                break (report, effects);
            }
            match self.ctx.store.update_batch(&updated).await {
                Ok(_) => break (report, effects),
                Err(StoreError::Conflict { ticket_id, .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(%trip_id, %ticket_id, attempt, "Trip cancellation raced another writer, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        };

        let cancelled = report.cancelled.len();
        metrics::counter!("tickets_cancelled_total").increment(u64::try_from(cancelled).unwrap_or(u64::MAX));
        tracing::info!(
            %trip_id,
            cancelled,
            refunds = report.refunds_owed(),
            untouched = report.failed.len(),
            "Trip cancelled"
        );

        self.ctx.submit(effects).await;
        let notifications = report
            .cancelled
            .iter()
            .map(|(ticket_id, _)| Effect::Dispatch(BookingJob::NotifyTripCancelled { ticket_id: *ticket_id }));
        self.ctx.submit(notifications).await;

        Ok(report)
    }

    /// Split the trip's tickets into those cancelled now and those left alone
    fn partition(
        &self,
        tickets: Vec<Ticket>,
    ) -> BookingResult<(CancellationReport, Vec<Ticket>, Vec<Effect<BookingJob>>)> {
        let mut report = CancellationReport::default();
        let mut updated = Vec::new();
        let mut effects = Vec::new();

        for mut ticket in tickets {
            let before = ticket.status;
            if !ticket.can_cancel() {
                report.failed.push((ticket.id, before));
                continue;
            }
            effects.extend(self.reducer.reduce(&mut ticket, TicketAction::Cancel, &self.env)?);
            report.cancelled.push((ticket.id, before));
            updated.push(ticket);
        }

        Ok((report, updated, effects))
    }
}
