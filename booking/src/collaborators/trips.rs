//! Trip lookups against the depot.
//!
//! The depot serves nested trip documents:
//!
//! ```json
//! {
//!   "id": 1, "trip_nr": "TR-101", "date": "2025-03-01", "status": "scheduled",
//!   "price": 150.0, "departure_time": "08:30:00", "arrival_time": "10:45:00",
//!   "from_station": {"city": "Chisinau"}, "to_station": {"city": "Balti"},
//!   "schedule": {
//!     "route": {"name": "Chisinau - Balti"},
//!     "bus": {"capacity": 52, "model": "Setra", "plate_number": "C AB 123",
//!             "driver": {"name": "Ion Popescu"}}
//!   }
//! }
//! ```
//!
//! Both adapters flatten it into a [`TripSnapshot`].

use super::{CollaboratorError, base_url_with_slash};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{Money, TripId};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const SERVICE: &str = "depot";

/// Read access to trip metadata
#[async_trait]
pub trait TripDirectory: Send + Sync {
    /// Trip `trip_id` as seen between `origin` and `destination`.
    ///
    /// `Ok(None)` when the depot does not know the trip.
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] when the depot cannot be reached or answers garbage.
    async fn get_trip(
        &self,
        trip_id: TripId,
        origin: &str,
        destination: &str,
    ) -> Result<Option<TripSnapshot>, CollaboratorError>;

    /// Seat count of the bus assigned to `trip_id`
    ///
    /// # Errors
    ///
    /// Same as [`TripDirectory::get_trip`].
    async fn get_capacity(&self, trip_id: TripId) -> Result<Option<u32>, CollaboratorError> {
        Ok(self
            .get_trip(trip_id, "", "")
            .await?
            .map(|trip| trip.bus_capacity))
    }
}

// ============================================================================
// Depot wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct DepotTrip {
    id: i64,
    #[serde(default)]
    trip_nr: String,
    date: NaiveDate,
    #[serde(default)]
    status: String,
    #[serde(default)]
    price: f64,
    departure_time: Option<NaiveTime>,
    arrival_time: Option<NaiveTime>,
    #[serde(default)]
    from_station: Station,
    #[serde(default)]
    to_station: Station,
    #[serde(default)]
    schedule: Schedule,
}

#[derive(Debug, Default, Deserialize)]
struct Station {
    #[serde(default)]
    city: String,
}

#[derive(Debug, Default, Deserialize)]
struct Schedule {
    #[serde(default)]
    route: Route,
    #[serde(default)]
    bus: Bus,
}

#[derive(Debug, Default, Deserialize)]
struct Route {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Bus {
    #[serde(default)]
    capacity: u32,
    #[serde(default)]
    model: String,
    #[serde(default)]
    plate_number: String,
    #[serde(default)]
    driver: Driver,
}

#[derive(Debug, Default, Deserialize)]
struct Driver {
    #[serde(default)]
    name: String,
}

impl TryFrom<DepotTrip> for TripSnapshot {
    type Error = CollaboratorError;

    fn try_from(raw: DepotTrip) -> Result<Self, Self::Error> {
        let price = Money::from_major_f64(raw.price).map_err(|e| CollaboratorError::Malformed {
            service: SERVICE,
            reason: format!("trip {}: {e}", raw.id),
        })?;

        Ok(Self {
            id: TripId::new(raw.id),
            trip_nr: raw.trip_nr,
            date: raw.date,
            status: raw.status,
            price,
            origin: raw.from_station.city,
            destination: raw.to_station.city,
            start_time: raw.departure_time,
            end_time: raw.arrival_time,
            bus_capacity: raw.schedule.bus.capacity,
            bus_model: raw.schedule.bus.model,
            bus_plate_number: raw.schedule.bus.plate_number,
            driver_name: raw.schedule.bus.driver.name,
            route_name: raw.schedule.route.name,
        })
    }
}

fn malformed(reason: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Malformed {
        service: SERVICE,
        reason: reason.to_string(),
    }
}

// ============================================================================
// JSON catalog
// ============================================================================

#[derive(Debug, Deserialize)]
struct Catalog {
    trips: Vec<DepotTrip>,
}

/// Trip catalog loaded from a `{"trips": [...]}` JSON file
#[derive(Debug, Clone, Default)]
pub struct JsonTripDirectory {
    trips: HashMap<TripId, TripSnapshot>,
}

impl JsonTripDirectory {
    /// Load and parse the catalog at `path`.
    ///
    /// # Errors
    ///
    /// [`CollaboratorError::Unavailable`] if the file cannot be read,
    /// [`CollaboratorError::Malformed`] if it is not a trip catalog.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CollaboratorError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CollaboratorError::Unavailable {
                service: SERVICE,
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
        let directory = Self::from_json(&bytes)?;
        tracing::info!(path = %path.display(), trips = directory.trips.len(), "Loaded trip catalog");
        Ok(directory)
    }

    /// Parse a catalog document
    ///
    /// # Errors
    ///
    /// [`CollaboratorError::Malformed`] if `bytes` is not a trip catalog.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CollaboratorError> {
        let catalog: Catalog = serde_json::from_slice(bytes).map_err(malformed)?;
        let trips = catalog
            .trips
            .into_iter()
            .map(TripSnapshot::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_trips(trips))
    }

    /// Catalog holding exactly `trips`
    #[must_use]
    pub fn from_trips(trips: impl IntoIterator<Item = TripSnapshot>) -> Self {
        Self {
            trips: trips.into_iter().map(|trip| (trip.id, trip)).collect(),
        }
    }
}

#[async_trait]
impl TripDirectory for JsonTripDirectory {
    async fn get_trip(
        &self,
        trip_id: TripId,
        _origin: &str,
        _destination: &str,
    ) -> Result<Option<TripSnapshot>, CollaboratorError> {
        Ok(self.trips.get(&trip_id).cloned())
    }
}

// ============================================================================
// HTTP depot service
// ============================================================================

/// Depot service client
#[derive(Debug, Clone)]
pub struct HttpTripDirectory {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTripDirectory {
    /// Client for the depot at `base_url`
    ///
    /// # Errors
    ///
    /// [`CollaboratorError::Rejected`] for an unusable base URL or client setup.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let base_url = base_url_with_slash(SERVICE, base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Rejected {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> Result<Url, CollaboratorError> {
        self.base_url.join(path).map_err(|e| CollaboratorError::Rejected {
            service: SERVICE,
            reason: format!("bad path {path}: {e}"),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        origin: &str,
        destination: &str,
    ) -> Result<Option<T>, CollaboratorError> {
        let mut request = self
            .client
            .get(self.url(path)?)
            .query(&[("origin", origin), ("destination", destination)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::from_http(SERVICE, &e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CollaboratorError::from_http(SERVICE, &e))?;
        response
            .json::<Option<T>>()
            .await
            .map_err(|e| CollaboratorError::from_http(SERVICE, &e))
    }
}

#[async_trait]
impl TripDirectory for HttpTripDirectory {
    async fn get_trip(
        &self,
        trip_id: TripId,
        origin: &str,
        destination: &str,
    ) -> Result<Option<TripSnapshot>, CollaboratorError> {
        let path = format!("trips/{trip_id}/extra-info");
        self.get_json::<DepotTrip>(&path, origin, destination)
            .await?
            .map(TripSnapshot::try_from)
            .transpose()
    }
}
