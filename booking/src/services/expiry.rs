//! Moving unpaid reservations to `expired`.
//!
//! Two paths lead here: the job scheduled at each reservation's deadline and
//! the periodic sweep that catches whatever the jobs missed. Both go through
//! [`ExpiryService::expire`], which re-checks the deadline and is safe to
//! repeat.

use super::TicketLifecycle;
use crate::aggregates::{TicketAction, TicketEnvironment};
use coachline_core::environment::Clock;
use coachline_core::error::{BookingError, BookingResult};
use coachline_core::store::TicketStore;
use coachline_core::ticket::TicketStatus;
use coachline_core::types::TicketId;
use std::sync::Arc;

/// What a single expiry attempt did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The reservation was moved to expired
    Expired,
    /// Still reserved, deadline not reached
    NotDue,
    /// Already paid, cancelled, used or expired
    AlreadySettled(TicketStatus),
    /// No such ticket
    Missing,
}

/// Totals of one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations expired by this sweep
    pub expired: usize,
    /// Candidates that were no longer due when reached
    pub skipped: usize,
    /// Candidates whose expiry failed; retried on the next sweep
    pub failed: usize,
}

/// Expires reservations
#[derive(Clone)]
pub struct ExpiryService {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    lifecycle: TicketLifecycle,
}

impl ExpiryService {
    /// Service over `store`; deadlines are judged by `clock`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        let lifecycle = TicketLifecycle::new(Arc::clone(&store), TicketEnvironment::new(Arc::clone(&clock)));
        Self {
            store,
            clock,
            lifecycle,
        }
    }

    /// Expire the ticket if it is still reserved and its deadline has passed.
    ///
    /// Missing, settled and not-yet-due tickets are left alone.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub async fn expire(&self, ticket_id: TicketId) -> BookingResult<ExpiryOutcome> {
        let transition = match self.lifecycle.apply(ticket_id, TicketAction::Expire).await {
            Ok(transition) => transition,
            Err(BookingError::NotFound(_)) => return Ok(ExpiryOutcome::Missing),
            Err(err) => return Err(err),
        };

        if transition.changed {
            metrics::counter!("tickets_expired_total").increment(1);
            tracing::info!(%ticket_id, seat = %transition.ticket.seat_number, "Reservation expired");
            return Ok(ExpiryOutcome::Expired);
        }

        Ok(match transition.ticket.status {
            TicketStatus::Reserved => ExpiryOutcome::NotDue,
            status => ExpiryOutcome::AlreadySettled(status),
        })
    }

    /// Expire every reservation whose hold has lapsed.
    ///
    /// A failure on one ticket is logged and counted; the sweep carries on.
    ///
    /// # Errors
    ///
    /// Only when the candidate list itself cannot be read.
    pub async fn sweep(&self) -> BookingResult<SweepReport> {
        let candidates = self.store.reserved_past_deadline(self.clock.now()).await?;
        let mut report = SweepReport::default();

        for ticket_id in candidates {
            match self.expire(ticket_id).await {
                Ok(ExpiryOutcome::Expired) => report.expired += 1,
                Ok(_) => report.skipped += 1,
                Err(error) => {
                    metrics::counter!("sweep_failures_total").increment(1);
                    tracing::warn!(%ticket_id, %error, "Failed to expire reservation during sweep");
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            tracing::info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }
}
