//! Startup wiring: pick adapters from configuration, start the dispatcher and
//! the background scans, stop them again on shutdown.

use crate::aggregates::TicketEnvironment;
use crate::collaborators::{
    CollaboratorError, DocumentRenderer, HttpPaymentGateway, HttpTripDirectory, JsonTripDirectory,
    LocalDocumentRenderer, LogNotifier, MockPaymentGateway, Notifier, PaymentGateway, TripDirectory,
};
use crate::config::{Config, DepotBackend, StorageBackend, TreasuryBackend};
use crate::jobs::{BookingJob, BookingJobHandler};
use crate::services::{BookingContext, BookingService, ExpiryService, TicketLifecycle};
use coachline_core::environment::Clock;
use coachline_core::error::StoreError;
use coachline_core::store::TicketStore;
use coachline_postgres::PostgresTicketStore;
use coachline_runtime::{JobDispatcher, JobSink, RuntimeError, Shutdown, retry_with_backoff, spawn_periodic};
use coachline_testing::InMemoryTicketStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Why the worker could not start
#[derive(Error, Debug)]
pub enum StartupError {
    /// Storage could not be opened or migrated
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    /// A collaborator adapter could not be built
    #[error("collaborator: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// Storage and collaborator adapters chosen at startup
#[derive(Clone)]
pub struct Resources {
    /// Ticket storage
    pub store: Arc<dyn TicketStore>,
    /// Trip directory
    pub trips: Arc<dyn TripDirectory>,
    /// Payment gateway
    pub payments: Arc<dyn PaymentGateway>,
    /// Notification channel
    pub notifier: Arc<dyn Notifier>,
    /// Ticket document renderer
    pub documents: Arc<dyn DocumentRenderer>,
}

impl Resources {
    /// Build the adapters `config` selects.
    ///
    /// # Errors
    ///
    /// [`StartupError`] when the database stays unreachable through the job
    /// retry policy, migrations fail, the trip catalog cannot be read, or a
    /// service URL is invalid.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let store: Arc<dyn TicketStore> = match config.storage {
            StorageBackend::Postgres => {
                let retry = config.dispatcher_config().retry;
                let store = retry_with_backoff(&retry, || {
                    PostgresTicketStore::connect(
                        &config.database.url,
                        config.database.max_connections,
                        config.database.connect_timeout,
                    )
                })
                .await?;
                store.migrate().await?;
                Arc::new(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory ticket storage; tickets are lost on exit");
                Arc::new(InMemoryTicketStore::new())
            }
        };

        let trips: Arc<dyn TripDirectory> = match config.depot.backend {
            DepotBackend::Json => Arc::new(JsonTripDirectory::load(&config.depot.trips_file).await?),
            DepotBackend::Http => Arc::new(HttpTripDirectory::new(
                config.depot.api_url.as_deref().unwrap_or_default(),
                config.depot.api_key.clone(),
                config.depot.timeout,
            )?),
        };

        let payments: Arc<dyn PaymentGateway> = match config.treasury.backend {
            TreasuryBackend::Http => Arc::new(HttpPaymentGateway::new(
                config.treasury.api_url.as_deref().unwrap_or_default(),
                config.treasury.timeout,
            )?),
            TreasuryBackend::Mock => Arc::new(MockPaymentGateway::new()),
        };

        tracing::info!(
            storage = ?config.storage,
            depot = ?config.depot.backend,
            treasury = ?config.treasury.backend,
            "Adapters selected"
        );

        Ok(Self {
            store,
            trips,
            payments,
            notifier: Arc::new(LogNotifier),
            documents: Arc::new(LocalDocumentRenderer::new(config.documents_dir.clone())),
        })
    }
}

/// Running booking core: services, job dispatcher and background scans
pub struct BookingApp {
    service: BookingService,
    dispatcher: Arc<JobDispatcher<BookingJob>>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl BookingApp {
    /// Start the dispatcher, the expiry sweep and the reminder scan.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(resources: Resources, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let timeout = config.collaborator_timeout();
        let handler = BookingJobHandler::new(
            Arc::clone(&resources.store),
            TicketLifecycle::new(
                Arc::clone(&resources.store),
                TicketEnvironment::new(Arc::clone(&clock)),
            ),
            ExpiryService::new(Arc::clone(&resources.store), Arc::clone(&clock)),
            Arc::clone(&resources.trips),
            resources.payments,
            resources.notifier,
            resources.documents,
            timeout,
        );
        let dispatcher = Arc::new(JobDispatcher::start(
            Arc::new(handler),
            config.dispatcher_config(),
            Arc::clone(&clock),
        ));

        let jobs: Arc<dyn JobSink<BookingJob>> = Arc::clone(&dispatcher) as Arc<dyn JobSink<BookingJob>>;
        let ctx = BookingContext::new(resources.store, resources.trips, jobs, clock, timeout);
        let service = BookingService::new(ctx, config.hold(), config.scheduler.reminder_lead_hours.clone());

        let shutdown = Shutdown::new();
        let sweeper = service.clone();
        let sweep = spawn_periodic(
            "expiry_sweep",
            config.scheduler.sweep_interval,
            shutdown.subscribe(),
            move || {
                let service = sweeper.clone();
                async move {
                    if let Err(error) = service.sweep_expired().await {
                        metrics::counter!("sweep_failures_total").increment(1);
                        tracing::error!(%error, "Expiry sweep failed");
                    }
                }
            },
        );
        let reminder = service.clone();
        let reminders = spawn_periodic(
            "trip_reminders",
            config.scheduler.reminder_interval,
            shutdown.subscribe(),
            move || {
                let service = reminder.clone();
                async move {
                    if let Err(error) = service.send_reminders().await {
                        tracing::error!(%error, "Reminder scan failed");
                    }
                }
            },
        );

        tracing::info!(
            hold_minutes = config.scheduler.hold_minutes,
            sweep_secs = config.scheduler.sweep_interval.as_secs(),
            reminder_secs = config.scheduler.reminder_interval.as_secs(),
            "Booking core started"
        );

        Self {
            service,
            dispatcher,
            shutdown,
            tasks: vec![sweep, reminders],
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Booking operations backed by this app
    #[must_use]
    pub const fn service(&self) -> &BookingService {
        &self.service
    }

    /// Stop the scans, then drain in-flight jobs.
    ///
    /// Jobs scheduled for later are dropped; the expiry sweep picks up their
    /// work on the next start.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ShutdownTimeout`] when jobs are still running after the
    /// configured grace period.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        tracing::info!("Shutting down booking core");
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::warn!(%error, "Background task ended abnormally");
            }
        }
        self.dispatcher.shutdown(self.shutdown_timeout).await
    }
}
