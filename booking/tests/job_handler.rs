//! Background jobs against recording collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

mod common;

use coachline_booking::aggregates::TicketEnvironment;
use coachline_booking::collaborators::{
    LocalDocumentRenderer, MockPaymentGateway, NotificationKind, RecordingNotifier,
};
use coachline_booking::services::{BookingContext, BookingService, ExpiryService, TicketLifecycle};
use coachline_booking::{BookingJob, BookingJobHandler};
use coachline_core::environment::Clock;
use coachline_core::ticket::TicketStatus;
use coachline_core::types::{InvoiceId, RefundId, TicketId};
use coachline_runtime::{DispatcherConfig, JobDispatcher, JobError, JobHandler, JobSink, RetryPolicy};
use common::{BIG_TRIP, Harness, catalog, request};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct World {
    h: Harness,
    handler: BookingJobHandler,
    payments: Arc<MockPaymentGateway>,
    notifier: Arc<RecordingNotifier>,
    _documents: TempDir,
}

fn world() -> World {
    let h = Harness::new();
    let payments = Arc::new(MockPaymentGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let documents = tempfile::tempdir().unwrap();
    let clock: Arc<dyn Clock> = h.clock.clone();

    let handler = BookingJobHandler::new(
        h.store.clone(),
        TicketLifecycle::new(h.store.clone(), TicketEnvironment::new(clock.clone())),
        ExpiryService::new(h.store.clone(), clock),
        Arc::new(catalog()),
        payments.clone(),
        notifier.clone(),
        Arc::new(LocalDocumentRenderer::new(documents.path())),
        Duration::from_secs(1),
    );

    World {
        h,
        handler,
        payments,
        notifier,
        _documents: documents,
    }
}

#[tokio::test]
async fn payment_initiation_opens_an_invoice_without_confirming() {
    let w = world();
    let ticket = w.h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();

    w.handler
        .handle(&BookingJob::InitiatePayment { ticket_id: ticket.id })
        .await
        .unwrap();

    assert_eq!(w.payments.charges(), vec![InvoiceId::new(format!("INV-{}", ticket.id))]);
    assert_eq!(w.h.status(&ticket).await, TicketStatus::Reserved);
}

#[tokio::test]
async fn payment_initiation_skips_settled_tickets() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Expired).await;

    w.handler
        .handle(&BookingJob::InitiatePayment { ticket_id: ticket.id })
        .await
        .unwrap();

    assert!(w.payments.charges().is_empty());
}

#[tokio::test]
async fn gateway_outage_is_retryable() {
    let w = world();
    let ticket = w.h.service.reserve(request(BIG_TRIP, 5)).await.unwrap();
    w.payments.set_unavailable(true);

    let err = w
        .handler
        .handle(&BookingJob::InitiatePayment { ticket_id: ticket.id })
        .await
        .unwrap_err();

    assert!(err.is_transient(), "{err:?}");
}

#[tokio::test]
async fn document_is_rendered_once_and_recorded() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;
    let job = BookingJob::RenderDocument { ticket_id: ticket.id };

    w.handler.handle(&job).await.unwrap();
    let first = w.h.service.ticket(ticket.id).await.unwrap();
    w.handler.handle(&job).await.unwrap();
    let second = w.h.service.ticket(ticket.id).await.unwrap();

    let handle = first.document.clone().expect("document recorded");
    assert!(handle.as_str().ends_with(&format!("ticket_{}.json", ticket.id)));
    assert!(std::path::Path::new(handle.as_str()).exists());
    assert_eq!(first, second);
}

#[tokio::test]
async fn ticket_email_goes_to_the_owner() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;

    w.handler
        .handle(&BookingJob::SendTicketEmail { ticket_id: ticket.id })
        .await
        .unwrap();

    let sent = w.notifier.sent_of(NotificationKind::TicketReady);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, ticket.owner.email);
}

#[tokio::test]
async fn refund_is_issued_once_for_a_cancelled_ticket() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;
    w.h.service.cancel(ticket.id).await.unwrap();
    let job = BookingJob::RefundPayment { ticket_id: ticket.id };

    w.handler.handle(&job).await.unwrap();
    w.handler.handle(&job).await.unwrap();

    let expected = RefundId::new(format!("REF-{}", ticket.id));
    assert_eq!(w.payments.refunds(), vec![expected.clone()]);
    assert_eq!(w.h.service.ticket(ticket.id).await.unwrap().refund_id, Some(expected));
}

#[tokio::test]
async fn refund_for_an_uncancelled_ticket_is_dropped() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;

    let err = w
        .handler
        .handle(&BookingJob::RefundPayment { ticket_id: ticket.id })
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Permanent(_)));
    assert!(w.payments.refunds().is_empty());
}

#[tokio::test]
async fn reminder_names_the_lead_time() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;

    w.handler
        .handle(&BookingJob::SendTripReminder {
            ticket_id: ticket.id,
            lead_hours: 24,
        })
        .await
        .unwrap();

    let sent = w.notifier.sent_of(NotificationKind::TripReminder);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Reminder: Your trip is in 24 hour(s)!");
}

#[tokio::test]
async fn cancellation_notice_reaches_the_owner() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;
    w.h.service.cancel(ticket.id).await.unwrap();

    w.handler
        .handle(&BookingJob::NotifyTripCancelled { ticket_id: ticket.id })
        .await
        .unwrap();

    assert_eq!(w.notifier.sent_of(NotificationKind::TripCancelled).len(), 1);
}

#[tokio::test]
async fn notifier_outage_is_retryable() {
    let w = world();
    let ticket = w.h.seed(BIG_TRIP, 5, TicketStatus::Paid).await;
    w.notifier.set_failing(true);

    let err = w
        .handler
        .handle(&BookingJob::SendTicketEmail { ticket_id: ticket.id })
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn expiry_job_for_a_missing_ticket_succeeds() {
    let w = world();
    w.handler
        .handle(&BookingJob::ExpireTicket { ticket_id: TicketId::new() })
        .await
        .unwrap();
}

#[tokio::test]
async fn email_for_a_missing_ticket_is_dropped() {
    let w = world();
    let err = w
        .handler
        .handle(&BookingJob::SendTicketEmail { ticket_id: TicketId::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Permanent(_)));
}

#[tokio::test]
async fn dispatcher_runs_the_jobs_a_payment_confirmation_queues() {
    let w = world();
    let clock: Arc<dyn Clock> = w.h.clock.clone();
    let dispatcher = Arc::new(JobDispatcher::start(
        Arc::new(w.handler),
        DispatcherConfig {
            queue_capacity: 16,
            concurrency: 2,
            retry: RetryPolicy::builder()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(5))
                .jitter(false)
                .build(),
        },
        clock.clone(),
    ));
    let jobs: Arc<dyn JobSink<BookingJob>> = dispatcher.clone();
    let ctx = BookingContext::new(w.h.store.clone(), Arc::new(catalog()), jobs, clock, Duration::from_secs(1));
    let service = BookingService::new(ctx, chrono::Duration::minutes(15), vec![24, 1]);

    let ticket = service.reserve(request(BIG_TRIP, 5)).await.unwrap();
    service
        .confirm_payment(ticket.id, InvoiceId::new("INV-1"))
        .await
        .unwrap();

    let mut delivered = false;
    for _ in 0..100 {
        let stored = service.ticket(ticket.id).await.unwrap();
        if stored.document.is_some() && !w.notifier.sent_of(NotificationKind::TicketReady).is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "document and email jobs did not complete");

    dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
}
