//! Notification collaborator: ticket, reminder and cancellation emails.

use super::CollaboratorError;
use async_trait::async_trait;
use coachline_core::ticket::Ticket;
use coachline_core::trip::TripSnapshot;
use coachline_core::types::DocumentHandle;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

const SERVICE: &str = "notifier";

/// What a notification is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Paid ticket with its document
    TicketReady,
    /// Upcoming departure
    TripReminder,
    /// The trip will not run
    TripCancelled,
}

impl NotificationKind {
    /// Subject used unless the notification sets its own
    #[must_use]
    pub const fn default_subject(self) -> &'static str {
        match self {
            Self::TicketReady => "Your Ticket PDF",
            Self::TripReminder => "Your trip reminder",
            Self::TripCancelled => "Your trip has been cancelled",
        }
    }
}

/// One message to one recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Kind
    pub kind: NotificationKind,
    /// Recipient address
    pub recipient: String,
    /// Subject line
    pub subject: String,
    /// Template variables
    pub data: BTreeMap<String, String>,
    /// Attached document, if any
    pub attachment: Option<DocumentHandle>,
}

fn user_name(ticket: &Ticket) -> String {
    if ticket.owner.display_name.trim().is_empty() {
        ticket.owner.email.clone()
    } else {
        ticket.owner.display_name.clone()
    }
}

fn departure_time(trip: &TripSnapshot) -> String {
    trip.start_time
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

impl Notification {
    fn new(kind: NotificationKind, ticket: &Ticket) -> Self {
        let mut data = BTreeMap::new();
        data.insert("user_name".to_string(), user_name(ticket));
        data.insert("trip_id".to_string(), ticket.trip_id.to_string());
        Self {
            kind,
            recipient: ticket.owner.email.clone(),
            subject: kind.default_subject().to_string(),
            data,
            attachment: None,
        }
    }

    fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Ticket email sent once payment is confirmed
    #[must_use]
    pub fn ticket_ready(ticket: &Ticket) -> Self {
        let mut notification = Self::new(NotificationKind::TicketReady, ticket)
            .with("seat", ticket.seat_number.to_string())
            .with("description", ticket.description());
        notification.attachment.clone_from(&ticket.document);
        notification
    }

    /// Reminder that `trip` leaves in `hours` hours
    #[must_use]
    pub fn trip_reminder(ticket: &Ticket, trip: &TripSnapshot, hours: u32) -> Self {
        let mut notification = Self::new(NotificationKind::TripReminder, ticket)
            .with("trip_date", trip.date.to_string())
            .with("trip_time", departure_time(trip))
            .with("trip_from", ticket.origin.clone())
            .with("trip_to", ticket.destination.clone());
        notification.subject = format!("Reminder: Your trip is in {hours} hour(s)!");
        notification
    }

    /// Notice that `trip` was cancelled
    #[must_use]
    pub fn trip_cancelled(ticket: &Ticket, trip: &TripSnapshot) -> Self {
        Self::new(NotificationKind::TripCancelled, ticket)
            .with("trip_date", trip.date.to_string())
            .with("trip_time", departure_time(trip))
            .with("trip_from", trip.origin.clone())
            .with("trip_to", trip.destination.clone())
    }
}

/// Delivers notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `notification`
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] if delivery failed.
    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

/// Writes notifications to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        tracing::info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            subject = %notification.subject,
            attachment = ?notification.attachment,
            data = ?notification.data,
            "Notification sent"
        );
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail (or stop failing) every later send
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Everything delivered so far
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Delivered notifications of `kind`
    #[must_use]
    pub fn sent_of(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.kind == kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(CollaboratorError::Unavailable {
                service: SERVICE,
                reason: "simulated outage".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}
