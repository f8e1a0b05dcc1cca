//! Persisting ticket transitions.
//!
//! [`TicketLifecycle`] runs the ticket reducer against the stored ticket and
//! writes the result with a version check. When another writer got there
//! first it re-reads and re-applies, so the loser sees the current state and
//! either fails cleanly or becomes a no-op.

use super::BookingContext;
use crate::aggregates::{TicketAction, TicketEnvironment, TicketReducer};
use crate::jobs::BookingJob;
use coachline_core::effect::Effect;
use coachline_core::error::{BookingError, BookingResult, StoreError};
use coachline_core::reducer::Reducer;
use coachline_core::store::TicketStore;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::types::{InvoiceId, TicketId};
use coachline_core::SmallVec;
use std::sync::Arc;

/// Attempts per transition before a version conflict is surfaced
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Outcome of one applied action
#[derive(Debug, Clone)]
pub struct Transition {
    /// Ticket as stored afterwards
    pub ticket: Ticket,
    /// Jobs the transition requires, not yet submitted
    pub effects: SmallVec<[Effect<BookingJob>; 4]>,
    /// Whether anything was written
    pub changed: bool,
}

/// Read, reduce, compare-and-set
#[derive(Clone)]
pub struct TicketLifecycle {
    store: Arc<dyn TicketStore>,
    reducer: TicketReducer,
    env: TicketEnvironment,
}

impl TicketLifecycle {
    /// Lifecycle over `store`, timed by the environment's clock
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, env: TicketEnvironment) -> Self {
        Self {
            store,
            reducer: TicketReducer::new(),
            env,
        }
    }

    /// Apply `action` to the stored ticket.
    ///
    /// Actions that leave the ticket unchanged are not written.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], the reducer's rejection, or a storage error.
    /// A version conflict that persists after [`MAX_WRITE_ATTEMPTS`] surfaces as
    /// [`BookingError::Storage`].
    pub async fn apply(&self, ticket_id: TicketId, action: TicketAction) -> BookingResult<Transition> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self
                .store
                .get(ticket_id)
                .await?
                .ok_or(BookingError::NotFound(ticket_id))?;

            let mut next = current.clone();
            let effects = self.reducer.reduce(&mut next, action.clone(), &self.env)?;
            if next == current {
                return Ok(Transition {
                    ticket: current,
                    effects,
                    changed: false,
                });
            }

            match self.store.update(&next).await {
                Ok(ticket) => {
                    tracing::debug!(
                        %ticket_id,
                        action = action.name(),
                        from = %current.status,
                        to = %ticket.status,
                        "Ticket transition stored"
                    );
                    return Ok(Transition {
                        ticket,
                        effects,
                        changed: true,
                    });
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(%ticket_id, attempt, "Version conflict, re-reading ticket");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Payment confirmation and boarding
#[derive(Clone)]
pub struct TicketService {
    ctx: BookingContext,
    lifecycle: TicketLifecycle,
}

impl TicketService {
    /// Service over the shared context
    #[must_use]
    pub fn new(ctx: BookingContext) -> Self {
        let lifecycle = ctx.lifecycle();
        Self { ctx, lifecycle }
    }

    /// Mark a reservation paid under `invoice_id`.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidStateTransition`] when the ticket is not reserved
    /// or the invoice already belongs to another ticket;
    /// [`BookingError::NotFound`] for an unknown ticket.
    pub async fn confirm_payment(&self, ticket_id: TicketId, invoice_id: InvoiceId) -> BookingResult<Ticket> {
        if let Some(owner) = self.ctx.store.invoice_owner(&invoice_id).await? {
            if owner != ticket_id {
                let status = self
                    .ctx
                    .store
                    .get(ticket_id)
                    .await?
                    .ok_or(BookingError::NotFound(ticket_id))?
                    .status;
                return Err(BookingError::invalid_transition(
                    ticket_id,
                    status,
                    "confirm",
                    format!("invoice {invoice_id} is attached to ticket {owner}"),
                ));
            }
        }

        let transition = match self
            .lifecycle
            .apply(ticket_id, TicketAction::Confirm { invoice_id })
            .await
        {
            Ok(transition) => transition,
            // Lost the race on the invoice between the check above and the write
            Err(BookingError::Storage(StoreError::DuplicateInvoice(invoice))) => {
                let status = self
                    .ctx
                    .store
                    .get(ticket_id)
                    .await?
                    .map_or(TicketStatus::Reserved, |t| t.status);
                return Err(BookingError::invalid_transition(
                    ticket_id,
                    status,
                    "confirm",
                    format!("invoice {invoice} is attached to another ticket"),
                ));
            }
            Err(err) => return Err(err),
        };

        metrics::counter!("tickets_confirmed_total").increment(1);
        tracing::info!(%ticket_id, seat = %transition.ticket.seat_number, "Ticket paid");
        self.ctx.submit(transition.effects).await;
        Ok(transition.ticket)
    }

    /// Record that the passenger boarded.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidStateTransition`] unless the ticket is paid.
    pub async fn mark_used(&self, ticket_id: TicketId) -> BookingResult<Ticket> {
        let transition = self.lifecycle.apply(ticket_id, TicketAction::MarkUsed).await?;
        tracing::info!(%ticket_id, "Ticket used");
        self.ctx.submit(transition.effects).await;
        Ok(transition.ticket)
    }

    /// Current state of a ticket
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown ticket.
    pub async fn get(&self, ticket_id: TicketId) -> BookingResult<Ticket> {
        self.ctx
            .store
            .get(ticket_id)
            .await?
            .ok_or(BookingError::NotFound(ticket_id))
    }
}
