//! Ticket lifecycle as a pure reducer.
//!
//! ```text
//! reserved ──confirm──▶ paid ──mark_used──▶ used
//!    │                   │
//!    ├──cancel──▶ cancelled ◀──cancel (refund)
//!    │
//!    └──expire (deadline passed)──▶ expired
//! ```
//!
//! The reducer mutates the ticket in place and returns the jobs the
//! transition requires. A rejected action leaves the ticket untouched. The
//! caller persists the ticket and only then submits the effects.

use crate::jobs::BookingJob;
use coachline_core::effect::Effect;
use coachline_core::environment::Clock;
use coachline_core::error::BookingError;
use coachline_core::reducer::Reducer;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::types::{DocumentHandle, InvoiceId, RefundId};
use coachline_core::{SmallVec, smallvec};
use std::sync::Arc;

// ============================================================================
// Actions
// ============================================================================

/// Transitions and bookkeeping writes on one ticket
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketAction {
    /// Payment arrived under `invoice_id`
    Confirm {
        /// Invoice issued by the payment collaborator
        invoice_id: InvoiceId,
    },
    /// Owner or operator cancels
    Cancel,
    /// Hold deadline check; a no-op unless the reservation is due
    Expire,
    /// Passenger boarded
    MarkUsed,
    /// Refund job finished
    RecordRefund {
        /// Refund reference
        refund_id: RefundId,
    },
    /// Document job finished
    RecordDocument {
        /// Where the document was stored
        handle: DocumentHandle,
    },
}

impl TicketAction {
    /// Verb used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Confirm { .. } => "confirm",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
            Self::MarkUsed => "mark used",
            Self::RecordRefund { .. } => "record refund for",
            Self::RecordDocument { .. } => "record document for",
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the ticket reducer
#[derive(Clone)]
pub struct TicketEnvironment {
    /// Clock for deadlines and timestamps
    pub clock: Arc<dyn Clock>,
}

impl TicketEnvironment {
    /// Creates a new `TicketEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for a single ticket
#[derive(Clone, Copy, Debug, Default)]
pub struct TicketReducer;

type Effects = SmallVec<[Effect<BookingJob>; 4]>;

impl TicketReducer {
    /// Creates a new `TicketReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Jobs owed by a freshly stored reservation: expiry at the deadline and
    /// payment initiation right away
    #[must_use]
    pub fn on_reserved(ticket: &Ticket) -> Effects {
        let payment = Effect::Dispatch(BookingJob::InitiatePayment { ticket_id: ticket.id });
        match ticket.reserved_until {
            Some(at) => smallvec![
                Effect::Schedule {
                    at,
                    job: BookingJob::ExpireTicket { ticket_id: ticket.id },
                },
                payment,
            ],
            None => smallvec![payment],
        }
    }

    fn rejected(ticket: &Ticket, action: &TicketAction, detail: impl Into<String>) -> BookingError {
        BookingError::invalid_transition(ticket.id, ticket.status, action.name(), detail)
    }
}

impl Reducer for TicketReducer {
    type State = Ticket;
    type Action = TicketAction;
    type Environment = TicketEnvironment;
    type Job = BookingJob;
    type Error = BookingError;

    fn reduce(
        &self,
        ticket: &mut Ticket,
        action: TicketAction,
        env: &TicketEnvironment,
    ) -> Result<Effects, BookingError> {
        let now = env.clock.now();

        match action {
            TicketAction::Confirm { ref invoice_id } => {
                if !ticket.can_confirm() {
                    return Err(Self::rejected(ticket, &action, "only reserved tickets can be paid"));
                }
                ticket.status = TicketStatus::Paid;
                ticket.invoice_id = Some(invoice_id.clone());
                ticket.reserved_until = None;
                ticket.updated_at = now;

                Ok(smallvec![
                    Effect::Dispatch(BookingJob::RenderDocument { ticket_id: ticket.id }),
                    Effect::Dispatch(BookingJob::SendTicketEmail { ticket_id: ticket.id }),
                ])
            }

            TicketAction::Cancel => {
                if !ticket.can_cancel() {
                    return Err(Self::rejected(ticket, &action, "ticket no longer holds its seat"));
                }
                let was_paid = ticket.status == TicketStatus::Paid;
                ticket.status = TicketStatus::Cancelled;
                ticket.reserved_until = None;
                ticket.updated_at = now;

                if was_paid {
                    Ok(smallvec![Effect::Dispatch(BookingJob::RefundPayment { ticket_id: ticket.id })])
                } else {
                    Ok(SmallVec::new())
                }
            }

            TicketAction::Expire => {
                if ticket.is_due_for_expiry(now) {
                    ticket.status = TicketStatus::Expired;
                    ticket.reserved_until = None;
                    ticket.updated_at = now;
                }
                Ok(SmallVec::new())
            }

            TicketAction::MarkUsed => {
                if ticket.status != TicketStatus::Paid {
                    return Err(Self::rejected(ticket, &action, "only paid tickets can be used"));
                }
                ticket.status = TicketStatus::Used;
                ticket.updated_at = now;
                Ok(SmallVec::new())
            }

            // First value wins; redelivered jobs are no-ops
            TicketAction::RecordRefund { refund_id } => {
                if ticket.refund_id.is_none() {
                    ticket.refund_id = Some(refund_id);
                    ticket.updated_at = now;
                }
                Ok(SmallVec::new())
            }

            TicketAction::RecordDocument { handle } => {
                if ticket.document.is_none() {
                    ticket.document = Some(handle);
                    ticket.updated_at = now;
                }
                Ok(SmallVec::new())
            }
        }
    }
}
