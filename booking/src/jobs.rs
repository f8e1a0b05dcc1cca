//! Background work owed by ticket transitions, and the handler that runs it.
//!
//! Every job names its ticket by id and re-reads current state before acting,
//! so redelivery after a crash or retry is harmless.

use crate::aggregates::TicketAction;
use crate::collaborators::{
    DocumentRenderer, Notification, Notifier, PaymentGateway, TripDirectory, with_timeout,
};
use crate::services::expiry::ExpiryService;
use crate::services::lifecycle::TicketLifecycle;
use async_trait::async_trait;
use coachline_core::error::BookingError;
use coachline_core::store::TicketStore;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::trip::TripSnapshot;
use coachline_core::types::TicketId;
use coachline_runtime::{Job, JobError, JobHandler};
use std::sync::Arc;
use std::time::Duration;

/// Work items executed by the job dispatcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingJob {
    /// Open an invoice for a fresh reservation
    InitiatePayment {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Expire the reservation if it is still unpaid
    ExpireTicket {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Render and store the ticket document
    RenderDocument {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Email the paid ticket to its owner
    SendTicketEmail {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Refund a cancelled paid ticket
    RefundPayment {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Tell the owner their trip was cancelled
    NotifyTripCancelled {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Remind the owner of an upcoming departure
    SendTripReminder {
        /// Ticket
        ticket_id: TicketId,
        /// Hours left until departure
        lead_hours: u32,
    },
}

impl BookingJob {
    /// Ticket the job acts on
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        match self {
            Self::InitiatePayment { ticket_id }
            | Self::ExpireTicket { ticket_id }
            | Self::RenderDocument { ticket_id }
            | Self::SendTicketEmail { ticket_id }
            | Self::RefundPayment { ticket_id }
            | Self::NotifyTripCancelled { ticket_id }
            | Self::SendTripReminder { ticket_id, .. } => *ticket_id,
        }
    }
}

impl Job for BookingJob {
    fn kind(&self) -> &'static str {
        match self {
            Self::InitiatePayment { .. } => "initiate_payment",
            Self::ExpireTicket { .. } => "expire_ticket",
            Self::RenderDocument { .. } => "render_document",
            Self::SendTicketEmail { .. } => "send_ticket_email",
            Self::RefundPayment { .. } => "refund_payment",
            Self::NotifyTripCancelled { .. } => "notify_trip_cancelled",
            Self::SendTripReminder { .. } => "send_trip_reminder",
        }
    }
}

fn storage_failure(err: &BookingError) -> JobError {
    match err {
        BookingError::NotFound(id) => JobError::Permanent(format!("ticket {id} not found")),
        BookingError::InvalidStateTransition { .. } | BookingError::Validation(_) => {
            JobError::Permanent(err.to_string())
        }
        _ => JobError::Transient(err.to_string()),
    }
}

/// Runs [`BookingJob`]s against storage and collaborators
pub struct BookingJobHandler {
    store: Arc<dyn TicketStore>,
    lifecycle: TicketLifecycle,
    expiry: ExpiryService,
    trips: Arc<dyn TripDirectory>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    documents: Arc<dyn DocumentRenderer>,
    timeout: Duration,
}

impl BookingJobHandler {
    /// Handler wired to the given collaborators
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        lifecycle: TicketLifecycle,
        expiry: ExpiryService,
        trips: Arc<dyn TripDirectory>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        documents: Arc<dyn DocumentRenderer>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            lifecycle,
            expiry,
            trips,
            payments,
            notifier,
            documents,
            timeout,
        }
    }

    async fn ticket(&self, ticket_id: TicketId) -> Result<Ticket, JobError> {
        self.store
            .get(ticket_id)
            .await
            .map_err(|e| JobError::Transient(e.to_string()))?
            .ok_or_else(|| JobError::Permanent(format!("ticket {ticket_id} not found")))
    }

    async fn trip_for(&self, ticket: &Ticket) -> Result<TripSnapshot, JobError> {
        with_timeout(
            "depot",
            self.timeout,
            self.trips.get_trip(ticket.trip_id, &ticket.origin, &ticket.destination),
        )
        .await?
        .ok_or_else(|| JobError::Permanent(format!("trip {} is unavailable", ticket.trip_id)))
    }

    async fn notify(&self, notification: &Notification) -> Result<(), JobError> {
        with_timeout("notifier", self.timeout, self.notifier.send(notification))
            .await
            .map_err(JobError::from)
    }

    async fn initiate_payment(&self, ticket_id: TicketId) -> Result<(), JobError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.status != TicketStatus::Reserved {
            tracing::debug!(%ticket_id, status = %ticket.status, "Reservation settled before payment started");
            return Ok(());
        }
        let trip = self.trip_for(&ticket).await?;
        let invoice = with_timeout("treasury", self.timeout, self.payments.charge(&ticket, &trip)).await?;
        tracing::info!(%ticket_id, invoice_id = %invoice, "Payment initiated; awaiting confirmation");
        Ok(())
    }

    async fn render_document(&self, ticket_id: TicketId) -> Result<(), JobError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.document.is_some() {
            return Ok(());
        }
        let trip = self.trip_for(&ticket).await?;
        let handle = with_timeout(
            "documents",
            self.timeout,
            self.documents.render_and_store(&ticket, &trip),
        )
        .await?;
        self.lifecycle
            .apply(ticket_id, TicketAction::RecordDocument { handle })
            .await
            .map_err(|e| storage_failure(&e))?;
        Ok(())
    }

    async fn send_ticket_email(&self, ticket_id: TicketId) -> Result<(), JobError> {
        let ticket = self.ticket(ticket_id).await?;
        if !matches!(ticket.status, TicketStatus::Paid | TicketStatus::Used) {
            tracing::debug!(%ticket_id, status = %ticket.status, "Skipping ticket email");
            return Ok(());
        }
        self.notify(&Notification::ticket_ready(&ticket)).await
    }

    async fn refund_payment(&self, ticket_id: TicketId) -> Result<(), JobError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.refund_id.is_some() {
            return Ok(());
        }
        if ticket.status != TicketStatus::Cancelled {
            return Err(JobError::Permanent(format!(
                "ticket {ticket_id} is {} and cannot be refunded",
                ticket.status
            )));
        }
        let refund_id = with_timeout("treasury", self.timeout, self.payments.refund(&ticket)).await?;
        self.lifecycle
            .apply(ticket_id, TicketAction::RecordRefund { refund_id })
            .await
            .map_err(|e| storage_failure(&e))?;
        Ok(())
    }

    async fn notify_trip_cancelled(&self, ticket_id: TicketId) -> Result<(), JobError> {
        let ticket = self.ticket(ticket_id).await?;
        let trip = self.trip_for(&ticket).await?;
        self.notify(&Notification::trip_cancelled(&ticket, &trip)).await
    }

    async fn send_trip_reminder(&self, ticket_id: TicketId, lead_hours: u32) -> Result<(), JobError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.status != TicketStatus::Paid {
            tracing::debug!(%ticket_id, status = %ticket.status, "Skipping reminder");
            return Ok(());
        }
        let trip = self.trip_for(&ticket).await?;
        self.notify(&Notification::trip_reminder(&ticket, &trip, lead_hours))
            .await?;
        metrics::counter!("reminders_sent_total").increment(1);
        Ok(())
    }
}

#[async_trait]
impl JobHandler<BookingJob> for BookingJobHandler {
    async fn handle(&self, job: &BookingJob) -> Result<(), JobError> {
        tracing::debug!(job = job.kind(), ticket_id = %job.ticket_id(), "Running job");

        match job {
            BookingJob::InitiatePayment { ticket_id } => self.initiate_payment(*ticket_id).await,
            BookingJob::ExpireTicket { ticket_id } => self
                .expiry
                .expire(*ticket_id)
                .await
                .map(|_| ())
                .map_err(|e| storage_failure(&e)),
            BookingJob::RenderDocument { ticket_id } => self.render_document(*ticket_id).await,
            BookingJob::SendTicketEmail { ticket_id } => self.send_ticket_email(*ticket_id).await,
            BookingJob::RefundPayment { ticket_id } => self.refund_payment(*ticket_id).await,
            BookingJob::NotifyTripCancelled { ticket_id } => self.notify_trip_cancelled(*ticket_id).await,
            BookingJob::SendTripReminder { ticket_id, lead_hours } => {
                self.send_trip_reminder(*ticket_id, *lead_hours).await
            }
        }
    }
}

