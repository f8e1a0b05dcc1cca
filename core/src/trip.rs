//! Point-in-time view of a trip as served by the depot.

use crate::types::{Money, TripId};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Trip metadata captured when a ticket is reserved or a job needs it
///
/// Prices and places copied onto a ticket come from here and are never
/// recomputed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSnapshot {
    /// Depot trip id
    pub id: TripId,
    /// Public trip number, e.g. `TR-104`
    pub trip_nr: String,
    /// Departure date
    pub date: NaiveDate,
    /// Depot status of the trip (`scheduled`, `cancelled`, ...)
    pub status: String,
    /// Seat price
    pub price: Money,
    /// Departure city
    pub origin: String,
    /// Arrival city
    pub destination: String,
    /// Departure time, when the depot knows it
    pub start_time: Option<NaiveTime>,
    /// Arrival time, when the depot knows it
    pub end_time: Option<NaiveTime>,
    /// Number of seats on the assigned bus
    pub bus_capacity: u32,
    /// Bus model
    pub bus_model: String,
    /// Bus plate number
    pub bus_plate_number: String,
    /// Assigned driver
    pub driver_name: String,
    /// Route name shown on tickets and invoices
    pub route_name: String,
}

impl TripSnapshot {
    /// Whether the trip departs on the same date and hour as `at`
    #[must_use]
    pub fn departs_within_hour_of(&self, at: NaiveDateTime) -> bool {
        self.start_time.is_some_and(|time| self.date == at.date() && time.hour() == at.hour())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn trip(start: Option<NaiveTime>) -> TripSnapshot {
        TripSnapshot {
            id: TripId::new(1),
            trip_nr: "TR-1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            status: "scheduled".to_string(),
            price: Money::from_cents(15_000),
            origin: "Chisinau".to_string(),
            destination: "Balti".to_string(),
            start_time: start,
            end_time: None,
            bus_capacity: 52,
            bus_model: "Setra".to_string(),
            bus_plate_number: "C 123 AB".to_string(),
            driver_name: "Ion".to_string(),
            route_name: "Chisinau - Balti".to_string(),
        }
    }

    #[test]
    fn hour_match_ignores_minutes() {
        let trip = trip(NaiveTime::from_hms_opt(9, 45, 0));
        let at = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap().and_hms_opt(9, 0, 0).unwrap();
        assert!(trip.departs_within_hour_of(at));

        let next_day = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap().and_hms_opt(9, 0, 0).unwrap();
        assert!(!trip.departs_within_hour_of(next_day));
    }

    #[test]
    fn unknown_start_time_never_matches() {
        let trip = trip(None);
        let at = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(!trip.departs_within_hour_of(at));
    }
}
