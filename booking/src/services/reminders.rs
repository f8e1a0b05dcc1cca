//! Departure reminders.
//!
//! A scan walks every paid ticket and, for each configured lead time, queues
//! a reminder when the trip leaves in that many hours (same date and hour).
//! A marker per ticket and lead time is stored before the job is queued, so a
//! reminder goes out at most once even when scans overlap or repeat.

use super::BookingContext;
use crate::jobs::BookingJob;
use chrono::Duration;
use coachline_core::error::BookingResult;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::trip::TripSnapshot;
use coachline_core::types::TripId;
use std::collections::HashMap;

/// Lead times used when none are configured
pub const DEFAULT_LEAD_HOURS: [u32; 2] = [24, 1];

/// Totals of one scan
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReminderReport {
    /// Paid tickets looked at
    pub scanned: usize,
    /// Reminder jobs queued
    pub queued: usize,
    /// Due reminders already sent by an earlier scan
    pub duplicates: usize,
    /// Tickets skipped because their trip did not resolve
    pub unavailable: usize,
}

/// Finds tickets whose departure is one lead time away
#[derive(Clone)]
pub struct ReminderService {
    ctx: BookingContext,
    leads: Vec<u32>,
}

impl ReminderService {
    /// Scanner reminding `leads` hours before departure
    #[must_use]
    pub fn new(ctx: BookingContext, mut leads: Vec<u32>) -> Self {
        leads.sort_unstable_by_key(|lead| std::cmp::Reverse(*lead));
        leads.dedup();
        Self { ctx, leads }
    }

    /// Configured lead times, longest first
    #[must_use]
    pub fn leads(&self) -> &[u32] {
        &self.leads
    }

    /// Queue every reminder due at the current hour.
    ///
    /// Trips are fetched once per scan. Tickets whose trip does not resolve are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Only when the paid tickets cannot be listed. Per-ticket storage errors
    /// are logged and skipped.
    pub async fn scan(&self) -> BookingResult<ReminderReport> {
        let now = self.ctx.now();
        let tickets = self.ctx.store.with_status(TicketStatus::Paid).await?;
        let mut trips: HashMap<(TripId, String, String), Option<TripSnapshot>> = HashMap::new();
        let mut report = ReminderReport::default();

        for ticket in tickets {
            report.scanned += 1;
            let key = (ticket.trip_id, ticket.origin.clone(), ticket.destination.clone());
            let trip = match trips.get(&key) {
                Some(trip) => trip.clone(),
                None => {
                    let trip = self
                        .ctx
                        .fetch_trip(ticket.trip_id, &ticket.origin, &ticket.destination)
                        .await
                        .ok();
                    trips.insert(key, trip.clone());
                    trip
                }
            };
            let Some(trip) = trip else {
                report.unavailable += 1;
                continue;
            };

            for &lead in &self.leads {
                let target = (now + Duration::hours(i64::from(lead))).naive_utc();
                if trip.departs_within_hour_of(target) {
                    self.remind(&ticket, lead, &mut report).await;
                }
            }
        }

        if report.queued > 0 {
            tracing::info!(
                scanned = report.scanned,
                queued = report.queued,
                unavailable = report.unavailable,
                "Reminder scan finished"
            );
        }
        Ok(report)
    }

    async fn remind(&self, ticket: &Ticket, lead_hours: u32, report: &mut ReminderReport) {
        let ticket_id = ticket.id;
        match self.ctx.store.mark_reminder_sent(ticket_id, lead_hours).await {
            Ok(true) => {}
            Ok(false) => {
                report.duplicates += 1;
                return;
            }
            Err(error) => {
                tracing::warn!(%ticket_id, lead_hours, %error, "Failed to record reminder marker");
                return;
            }
        }

        match self
            .ctx
            .jobs
            .enqueue(BookingJob::SendTripReminder { ticket_id, lead_hours }, None)
            .await
        {
            Ok(()) => {
                report.queued += 1;
                tracing::debug!(%ticket_id, lead_hours, "Trip reminder queued");
            }
            Err(error) => {
                tracing::warn!(%ticket_id, lead_hours, %error, "Failed to queue trip reminder");
            }
        }
    }
}
