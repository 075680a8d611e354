//! Core types used throughout ChaseBot
//!
//! Bars, quotes, the venue's order-state view and the target signal that links the
//! signal engines to the chase engine.

use chrono::{Duration, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order / chase direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Side that moves position by a signed delta
    pub fn from_delta(delta: i64) -> Option<Self> {
        match delta.signum() {
            1 => Some(Side::Long),
            -1 => Some(Side::Short),
            _ => None,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Venue-assigned order identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Order status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// No further updates expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Read-only view of an order, refreshed by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub order_id: OrderId,
    pub side: Side,
    pub requested_qty: i64,
    pub traded_qty: i64,
    pub price: Decimal,
    pub status: OrderStatus,
}

impl OrderState {
    /// Untraded quantity
    pub fn remaining(&self) -> i64 {
        (self.requested_qty - self.traded_qty).max(0)
    }
}

/// Closed time bar. `instant` is the bar's open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instant: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Wall-clock instant at which the bar closed
    pub fn close_instant(&self, period: Duration) -> NaiveDateTime {
        self.instant + period
    }
}

/// Top-of-book snapshot. Prices stay on the venue's decimal grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub instant: NaiveDateTime,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    /// Last traded price, when the feed carries one
    #[serde(default)]
    pub last_price: Option<Decimal>,
}

impl Quote {
    /// Both sides present (the feed uses -1 / 0 for missing levels)
    pub fn is_valid(&self) -> bool {
        self.bid_price > Decimal::ZERO && self.ask_price > Decimal::ZERO
    }

    pub fn mid(&self) -> Option<Decimal> {
        self.is_valid()
            .then(|| (self.bid_price + self.ask_price) / Decimal::TWO)
    }

    /// Last traded price, falling back to the midpoint
    pub fn reference_price(&self) -> Option<Decimal> {
        match self.last_price {
            Some(p) if p > Decimal::ZERO => Some(p),
            _ => self.mid(),
        }
    }

    /// `reference_price` for the floating-point signal maths
    pub fn reference_f64(&self) -> Option<f64> {
        self.reference_price().and_then(|p| p.to_f64())
    }
}

/// Why a target was produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetReason {
    /// Momentum z-score entry at the session-open slot
    MomentumEntry { z_score: f64 },
    /// Close out the whole position (session close / flatten slot / outside session)
    Flatten,
    /// Reversion ladder breakout
    LadderBreakout { level: i64 },
    /// Reversion take-profit when price crosses back through the anchor
    TakeProfitAtAnchor,
    /// Offset computed while reconciling at boot
    BootReconcile,
    /// Boot offset parked until price turned favourable
    DeferredOffset,
    /// Untraded remainder handed back after a venue cancel or reject
    Remainder,
}

impl TargetReason {
    /// Targets that only reduce exposure are allowed outside the session
    pub fn is_risk_reducing(&self) -> bool {
        matches!(
            self,
            Self::Flatten | Self::TakeProfitAtAnchor | Self::Remainder
        )
    }
}

impl fmt::Display for TargetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetReason::MomentumEntry { z_score } => write!(f, "MOMENTUM_ENTRY(z={:.4})", z_score),
            TargetReason::Flatten => write!(f, "FLATTEN"),
            TargetReason::LadderBreakout { level } => write!(f, "LADDER_BREAKOUT(level={})", level),
            TargetReason::TakeProfitAtAnchor => write!(f, "TAKE_PROFIT_AT_ANCHOR"),
            TargetReason::BootReconcile => write!(f, "BOOT_RECONCILE"),
            TargetReason::DeferredOffset => write!(f, "DEFERRED_OFFSET"),
            TargetReason::Remainder => write!(f, "REMAINDER"),
        }
    }
}

/// Signed position change the chase engine must work
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSignal {
    pub delta: i64,
    pub reason: TargetReason,
}

impl TargetSignal {
    pub fn new(delta: i64, reason: TargetReason) -> Self {
        Self { delta, reason }
    }

    /// Target that closes `position`
    pub fn flatten(position: i64) -> Self {
        Self::new(-position, TargetReason::Flatten)
    }

    pub fn side(&self) -> Option<Side> {
        Side::from_delta(self.delta)
    }

    pub fn quantity(&self) -> i64 {
        self.delta.abs()
    }

    pub fn is_flatten(&self) -> bool {
        matches!(self.reason, TargetReason::Flatten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn quote_validity_rejects_sentinels() {
        let mut q = Quote {
            instant: at(10, 0, 0),
            bid_price: dec!(-1),
            ask_price: dec!(101.0),
            last_price: None,
        };
        assert!(!q.is_valid());
        assert_eq!(q.mid(), None);

        q.bid_price = dec!(99.0);
        assert!(q.is_valid());
        assert_eq!(q.mid(), Some(dec!(100)));
    }

    #[test]
    fn reference_price_prefers_last_then_mid() {
        let mut q = Quote {
            instant: at(10, 0, 0),
            bid_price: dec!(99.0),
            ask_price: dec!(101.0),
            last_price: Some(dec!(100.5)),
        };
        assert_eq!(q.reference_price(), Some(dec!(100.5)));
        assert_eq!(q.reference_f64(), Some(100.5));

        q.last_price = Some(dec!(-1));
        assert_eq!(q.reference_price(), Some(dec!(100)));
    }

    #[test]
    fn flatten_target_inverts_position() {
        let t = TargetSignal::flatten(7);
        assert_eq!(t.delta, -7);
        assert_eq!(t.side(), Some(Side::Short));
        assert_eq!(t.quantity(), 7);
        assert!(t.is_flatten());
        assert!(t.reason.is_risk_reducing());
        assert!(!TargetReason::LadderBreakout { level: 1 }.is_risk_reducing());
    }

    #[test]
    fn bar_close_instant_adds_period() {
        let bar = Bar {
            instant: at(10, 0, 0),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        assert_eq!(bar.close_instant(Duration::minutes(30)), at(10, 30, 0));
    }
}
