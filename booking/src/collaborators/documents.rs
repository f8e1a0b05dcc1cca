//! Ticket documents rendered to local storage.

use super::CollaboratorError;
use async_trait::async_trait;
use coachline_core::ticket::Ticket;
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{DocumentHandle, InvoiceId};
use serde::Serialize;
use std::path::PathBuf;

const SERVICE: &str = "documents";

/// Produces the document a passenger boards with
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `ticket` for `trip` and store it; returns where it went.
    ///
    /// Rendering the same ticket twice overwrites the first copy.
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] if the document cannot be written.
    async fn render_and_store(&self, ticket: &Ticket, trip: &TripSnapshot) -> Result<DocumentHandle, CollaboratorError>;
}

/// Everything printed on a ticket
#[derive(Debug, Serialize)]
struct TicketDocument<'a> {
    ticket_id: String,
    title: String,
    passenger: &'a str,
    email: &'a str,
    trip_nr: &'a str,
    route: &'a str,
    origin: &'a str,
    destination: &'a str,
    date: String,
    departure: Option<String>,
    arrival: Option<String>,
    seat: u32,
    price: String,
    bus: String,
    invoice_id: Option<&'a str>,
}

impl<'a> TicketDocument<'a> {
    fn new(ticket: &'a Ticket, trip: &'a TripSnapshot) -> Self {
        let time = |t: chrono::NaiveTime| t.format("%H:%M").to_string();
        Self {
            ticket_id: ticket.id.to_string(),
            title: ticket.description(),
            passenger: &ticket.owner.display_name,
            email: &ticket.owner.email,
            trip_nr: &trip.trip_nr,
            route: &trip.route_name,
            origin: &ticket.origin,
            destination: &ticket.destination,
            date: trip.date.to_string(),
            departure: trip.start_time.map(time),
            arrival: trip.end_time.map(time),
            seat: ticket.seat_number.get(),
            price: ticket.price.to_string(),
            bus: format!("{} {}", trip.bus_model, trip.bus_plate_number).trim().to_string(),
            invoice_id: ticket.invoice_id.as_ref().map(InvoiceId::as_str),
        }
    }
}

/// Writes `ticket_{id}.json` files into a directory
#[derive(Debug, Clone)]
pub struct LocalDocumentRenderer {
    dir: PathBuf,
}

impl LocalDocumentRenderer {
    /// Renderer storing into `dir`, created on first use
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DocumentRenderer for LocalDocumentRenderer {
    async fn render_and_store(&self, ticket: &Ticket, trip: &TripSnapshot) -> Result<DocumentHandle, CollaboratorError> {
        let io_error = |e: std::io::Error| CollaboratorError::Unavailable {
            service: SERVICE,
            reason: e.to_string(),
        };

        let body = serde_json::to_vec_pretty(&TicketDocument::new(ticket, trip)).map_err(|e| {
            CollaboratorError::Malformed {
                service: SERVICE,
                reason: e.to_string(),
            }
        })?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        let path = self.dir.join(format!("ticket_{}.json", ticket.id));
        tokio::fs::write(&path, body).await.map_err(io_error)?;

        tracing::debug!(ticket_id = %ticket.id, path = %path.display(), "Ticket document stored");
        Ok(DocumentHandle::new(path.display().to_string()))
    }
}
