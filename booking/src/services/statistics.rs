//! Sales figures.

use super::BookingContext;
use crate::collaborators::with_timeout;
use chrono::{DateTime, Utc};
use coachline_core::error::{BookingError, BookingResult};
use coachline_core::ticket::TicketStatus;
use coachline_core::types::TripId;
use serde::Serialize;
use std::collections::BTreeMap;

/// Paid share of a trip's seats
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Occupancy {
    /// Trip
    pub trip_id: TripId,
    /// Paid tickets
    pub sold: u64,
    /// Seats on the bus
    pub capacity: u32,
    /// `sold / capacity` as a percentage, two decimals
    pub rate: f64,
}

/// One row of the best-sellers report
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TripSales {
    /// Trip
    pub trip_id: TripId,
    /// Paid tickets
    pub paid: u64,
    /// Occupancy, when the trip still resolves
    pub occupancy: Option<Occupancy>,
}

/// Percentage rounded to two decimals; zero for an empty bus
#[must_use]
#[allow(clippy::cast_precision_loss)] // ticket counts stay far below 2^52
pub fn occupancy_rate(sold: u64, capacity: u32) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    let percent = sold as f64 * 100.0 / f64::from(capacity);
    (percent * 100.0).round() / 100.0
}

/// Reporting queries
#[derive(Clone)]
pub struct StatisticsService {
    ctx: BookingContext,
}

impl StatisticsService {
    /// Queries over the shared context
    #[must_use]
    pub const fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    /// Paid tickets created within the optional bounds
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn sales_count(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BookingResult<u64> {
        Ok(self.ctx.store.count_paid(start, end).await?)
    }

    /// Paid seats against the bus capacity
    ///
    /// # Errors
    ///
    /// [`BookingError::TripUnavailable`] when the capacity cannot be resolved,
    /// or storage failures.
    pub async fn occupancy(&self, trip_id: TripId) -> BookingResult<Occupancy> {
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

        let counts = self.ctx.store.count_by_status(Some(trip_id)).await?;
        let sold = counts.get(&TicketStatus::Paid).copied().unwrap_or(0);
        Ok(Occupancy {
            trip_id,
            sold,
            capacity,
            rate: occupancy_rate(sold, capacity),
        })
    }

    /// Trips ranked by paid tickets, most sold first
    ///
    /// # Errors
    ///
    /// Storage failures. Trips that no longer resolve are listed without occupancy.
    pub async fn top_trips(&self, limit: usize) -> BookingResult<Vec<TripSales>> {
        let ranked = self.ctx.store.top_trips_by_paid(limit).await?;
        let mut rows = Vec::with_capacity(ranked.len());
        for (trip_id, paid) in ranked {
            let occupancy = match self.occupancy(trip_id).await {
                Ok(occupancy) => Some(occupancy),
                Err(BookingError::TripUnavailable(_)) => None,
                Err(err) => return Err(err),
            };
            rows.push(TripSales {
                trip_id,
                paid,
                occupancy,
            });
        }
        Ok(rows)
    }

    /// Ticket counts keyed by status name
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn status_breakdown(&self, trip_id: Option<TripId>) -> BookingResult<BTreeMap<String, u64>> {
        let counts = self.ctx.store.count_by_status(trip_id).await?;
        Ok(counts
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_a_rounded_percentage() {
        assert!((occupancy_rate(1, 3) - 33.33).abs() < f64::EPSILON);
        assert!((occupancy_rate(52, 52) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_bus_has_zero_rate() {
        assert!(occupancy_rate(5, 0).abs() < f64::EPSILON);
    }
}
