//! Venue adapter capability
//!
//! Strategies only talk to the venue through `Venue`. Commands are fire-and-forget:
//! `submit_order` returns the assigned id immediately and every later status change
//! (ack, fills, cancel confirmation, reject) arrives as an `OrderState` event routed
//! back through the controller.

mod paper;

pub use paper::{PaperMode, PaperVenue};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::collections::HashSet;
use thiserror::Error;

use crate::error::EngineError;
use crate::types::{OrderId, OrderState, Quote, Side};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    #[error("Venue disconnected: {0}")]
    Disconnected(String),

    #[error("Order {order_id} rejected: {reason}")]
    Rejected { order_id: OrderId, reason: String },

    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),
}

impl From<VenueError> for EngineError {
    fn from(e: VenueError) -> Self {
        match e {
            VenueError::Disconnected(reason) => EngineError::VenueDisconnected(reason),
            VenueError::Rejected { order_id, .. } => EngineError::VenueReject(order_id),
            VenueError::UnknownOrder(order_id) => EngineError::UnknownOrder(order_id),
        }
    }
}

pub trait Venue: Send {
    /// Venue clock
    fn now(&self) -> NaiveDateTime;

    /// Session gate checked before any order is placed
    fn is_trading_enabled(&self) -> bool;

    fn get_position(&self, instrument: &str) -> Result<i64, VenueError>;

    fn get_order(&self, order_id: &OrderId) -> Option<OrderState>;

    fn get_active_order_ids(&self) -> HashSet<OrderId>;

    fn submit_order(&mut self, side: Side, price: Decimal, quantity: i64)
        -> Result<OrderId, VenueError>;

    fn cancel_order(&mut self, order_id: &OrderId);

    fn cancel_all(&mut self);

    /// Market data hook for simulated venues that match orders locally
    fn observe_quote(&mut self, _quote: &Quote) {}

    /// Order events queued by adapters that report in-process rather than through
    /// the event channel
    fn poll_events(&mut self) -> Vec<OrderState> {
        Vec::new()
    }
}
