//! Reducers for the booking domain.

pub mod ticket;

pub use ticket::{TicketAction, TicketEnvironment, TicketReducer};
