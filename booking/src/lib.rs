//! # Coachline Booking
//!
//! Seat booking on scheduled bus trips.
//!
//! - [`aggregates`]: the ticket lifecycle reducer
//! - [`services`]: reservation, payment confirmation, expiry, cancellation,
//!   reminders and sales statistics
//! - [`jobs`]: background work owed by transitions and its handler
//! - [`collaborators`]: trip directory, payment, notification and document adapters
//! - [`config`] and [`app`]: environment configuration and startup wiring
//!
//! ## Example
//!
//! ```ignore
//! let config = Config::from_env()?;
//! let resources = Resources::from_config(&config).await?;
//! let app = BookingApp::start(resources, &config, Arc::new(SystemClock));
//!
//! let ticket = app.service().reserve(request).await?;
//! app.service().confirm_payment(ticket.id, "INV-1".into()).await?;
//! ```

pub mod aggregates;
pub mod app;
pub mod collaborators;
pub mod config;
pub mod jobs;
pub mod services;

pub use aggregates::{TicketAction, TicketEnvironment, TicketReducer};
pub use app::{BookingApp, Resources, StartupError};
pub use config::{Config, ConfigError};
pub use jobs::{BookingJob, BookingJobHandler};
pub use services::{BookingContext, BookingService, ReservationRequest};
