//! Payment collaborator: invoices and refunds through the treasury.

use super::{CollaboratorError, base_url_with_slash};
use async_trait::async_trait;
use coachline_core::ticket::Ticket;
use coachline_core::trip::TripSnapshot;
use coachline_core::types::{InvoiceId, RefundId};
use reqwest::Url;
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SERVICE: &str = "treasury";
const CURRENCY: &str = "MDL";
const DEFAULT_STR: &str = "N/A";
const DEFAULT_DATE: &str = "1970-01-01";
const DEFAULT_TIME: &str = "00:00:00";

/// Charges and refunds tickets
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open an invoice for `ticket` on `trip`
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] if the treasury refuses or cannot be reached.
    async fn charge(&self, ticket: &Ticket, trip: &TripSnapshot) -> Result<InvoiceId, CollaboratorError>;

    /// Refund the payment made for `ticket`
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] if the treasury refuses or cannot be reached.
    async fn refund(&self, ticket: &Ticket) -> Result<RefundId, CollaboratorError>;
}

// ============================================================================
// Treasury wire format
// ============================================================================

#[derive(Debug, Serialize, PartialEq, Eq)]
struct TicketDetails {
    first_name: String,
    last_name: String,
    route: String,
    date: String,
    hour: String,
    email: String,
    seat_code: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct BillingDetails {
    first_name: String,
    last_name: String,
    company: String,
    tax_number: String,
    street_address: String,
    zip_code: String,
    city: String,
    country: String,
}

/// Body of `POST api/invoices`
#[derive(Debug, Serialize, PartialEq, Eq)]
struct InvoiceRequest {
    ticket_details: TicketDetails,
    billing_details: BillingDetails,
    reservation_id: String,
    amount: String,
    currency: &'static str,
}

/// Body of `POST api/refund`
#[derive(Debug, Serialize, PartialEq, Eq)]
struct RefundRequest {
    reservation_id: String,
    invoice_id: Option<String>,
    amount: String,
    currency: &'static str,
    seat_code: String,
}

fn or_default(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// `"Ana Maria Rusu"` splits into `("Ana", "Maria Rusu")`
fn split_name(display_name: &str) -> (String, String) {
    let mut parts = display_name.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or_default();
    let last = parts.next().unwrap_or_default();
    (or_default(first, DEFAULT_STR), or_default(last, DEFAULT_STR))
}

impl InvoiceRequest {
    fn new(ticket: &Ticket, trip: &TripSnapshot) -> Self {
        let (first_name, last_name) = split_name(&ticket.owner.display_name);
        let date = trip.date.to_string();
        let hour = trip
            .start_time
            .map_or_else(|| DEFAULT_TIME.to_string(), |t| t.format("%H:%M:%S").to_string());

        Self {
            ticket_details: TicketDetails {
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                route: or_default(&trip.route_name, DEFAULT_STR),
                date: or_default(&date, DEFAULT_DATE),
                hour,
                email: or_default(&ticket.owner.email, DEFAULT_STR),
                seat_code: ticket.seat_number.to_string(),
            },
            billing_details: BillingDetails {
                first_name,
                last_name,
                company: DEFAULT_STR.to_string(),
                tax_number: DEFAULT_STR.to_string(),
                street_address: DEFAULT_STR.to_string(),
                zip_code: DEFAULT_STR.to_string(),
                city: DEFAULT_STR.to_string(),
                country: DEFAULT_STR.to_string(),
            },
            reservation_id: ticket.id.to_string(),
            amount: ticket.price.to_string(),
            currency: CURRENCY,
        }
    }
}

impl RefundRequest {
    fn new(ticket: &Ticket) -> Self {
        Self {
            reservation_id: ticket.id.to_string(),
            invoice_id: ticket.invoice_id.as_ref().map(ToString::to_string),
            amount: ticket.price.to_string(),
            currency: CURRENCY,
            seat_code: ticket.seat_number.to_string(),
        }
    }
}

/// Pull a reference out of a treasury reply, accepting string or numeric ids
fn reference(body: &serde_json::Value, keys: &[&str]) -> Result<String, CollaboratorError> {
    keys.iter()
        .find_map(|key| match body.get(*key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| CollaboratorError::Malformed {
            service: SERVICE,
            reason: format!("reply carries none of {keys:?}"),
        })
}

// ============================================================================
// HTTP treasury
// ============================================================================

/// Treasury service client
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPaymentGateway {
    /// Client for the treasury at `base_url`
    ///
    /// # Errors
    ///
    /// [`CollaboratorError::Rejected`] for an unusable base URL or client setup.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let base_url = base_url_with_slash(SERVICE, base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Rejected {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<serde_json::Value, CollaboratorError> {
        let url = self.base_url.join(path).map_err(|e| CollaboratorError::Rejected {
            service: SERVICE,
            reason: format!("bad path {path}: {e}"),
        })?;
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CollaboratorError::from_http(SERVICE, &e))?
            .json()
            .await
            .map_err(|e| CollaboratorError::from_http(SERVICE, &e))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, ticket: &Ticket, trip: &TripSnapshot) -> Result<InvoiceId, CollaboratorError> {
        let reply = self.post("api/invoices", &InvoiceRequest::new(ticket, trip)).await?;
        let invoice = InvoiceId::new(reference(&reply, &["invoice_id", "id"])?);
        tracing::info!(ticket_id = %ticket.id, invoice_id = %invoice, "Invoice opened");
        Ok(invoice)
    }

    async fn refund(&self, ticket: &Ticket) -> Result<RefundId, CollaboratorError> {
        let reply = self.post("api/refund", &RefundRequest::new(ticket)).await?;
        let refund = RefundId::new(reference(&reply, &["refund_id", "id"])?);
        tracing::info!(ticket_id = %ticket.id, refund_id = %refund, "Refund issued");
        Ok(refund)
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Gateway that approves everything and remembers what it was asked
///
/// References are derived from the ticket id, so a redelivered job gets the
/// same invoice or refund back.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    charges: Mutex<Vec<InvoiceId>>,
    refunds: Mutex<Vec<RefundId>>,
    unavailable: AtomicBool,
}

impl MockPaymentGateway {
    /// Gateway that accepts every request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (or recovery)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Invoices handed out so far
    #[must_use]
    pub fn charges(&self) -> Vec<InvoiceId> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Refunds handed out so far
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundId> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(CollaboratorError::Unavailable {
                service: SERVICE,
                reason: "simulated outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, ticket: &Ticket, _trip: &TripSnapshot) -> Result<InvoiceId, CollaboratorError> {
        self.check()?;
        let invoice = InvoiceId::new(format!("INV-{}", ticket.id));
        if let Ok(mut charges) = self.charges.lock() {
            charges.push(invoice.clone());
        }
        tracing::info!(ticket_id = %ticket.id, invoice_id = %invoice, "Mock invoice opened");
        Ok(invoice)
    }

    async fn refund(&self, ticket: &Ticket) -> Result<RefundId, CollaboratorError> {
        self.check()?;
        let refund = RefundId::new(format!("REF-{}", ticket.id));
        if let Ok(mut refunds) = self.refunds.lock() {
            refunds.push(refund.clone());
        }
        tracing::info!(ticket_id = %ticket.id, refund_id = %refund, "Mock refund issued");
        Ok(refund)
    }
}
