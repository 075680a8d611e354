//! Engine error taxonomy
//!
//! Only `Config` and `VenueDisconnected` are fatal. Everything else degrades to a
//! no-op for the event being processed.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::OrderId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Bad time strings, non-positive window/threshold, inconsistent sizes
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Price window has zero standard deviation
    #[error("Insufficient variance in price window ({samples} samples, stddev {stddev})")]
    InsufficientVariance { samples: usize, stddev: f64 },

    /// Bid/ask unavailable
    #[error("Stale quote: bid={bid} ask={ask}")]
    StaleQuote { bid: Decimal, ask: Decimal },

    /// Venue refused the order
    #[error("Order {0} rejected by venue")]
    VenueReject(OrderId),

    /// Callback for an order this engine never submitted
    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),

    /// Trade attempted outside the configured session
    #[error("Session violation at {0}")]
    SessionViolation(NaiveTime),

    /// Venue connectivity lost, trading halted for the instrument
    #[error("Venue disconnected: {0}")]
    VenueDisconnected(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::VenueDisconnected(_))
    }
}
