//! Chase state machine types

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderId, Side};

/// The one order the engine is working
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub quantity: i64,
    /// Traded quantity as last reported by the venue
    pub traded: i64,
    /// Instant of the quote the order was priced from
    pub submitted_at: NaiveDateTime,
}

impl OrderIntent {
    pub fn remaining(&self) -> i64 {
        (self.quantity - self.traded).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChaseState {
    #[default]
    Idle,
    /// Submitted, no venue acknowledgement yet
    Placing { order: OrderIntent },
    /// Acknowledged and live
    Resting { order: OrderIntent },
    /// Cancel requested for `order`; `remainder` still has to be worked
    Chasing {
        order: OrderIntent,
        remainder: i64,
        /// Cancelled by the stall override rather than price drift
        stalled: bool,
        /// Resubmit the remainder once the cancel lands
        replace: bool,
        /// Venue confirmed the cancel (or the stall override stood in for it)
        cancel_confirmed: bool,
    },
    /// Replacement submitted for the remainder, awaiting acknowledgement
    Replacing { order: OrderIntent },
    /// Venue connectivity lost; no new orders until restart. `order` is whatever was
    /// live when the halt hit and keeps absorbing fills until the venue finishes it.
    Halted {
        reason: String,
        order: Option<OrderIntent>,
    },
}

impl ChaseState {
    pub fn name(&self) -> &'static str {
        match self {
            ChaseState::Idle => "IDLE",
            ChaseState::Placing { .. } => "PLACING",
            ChaseState::Resting { .. } => "RESTING",
            ChaseState::Chasing { .. } => "CHASING",
            ChaseState::Replacing { .. } => "REPLACING",
            ChaseState::Halted { .. } => "HALTED",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ChaseState::Idle)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, ChaseState::Halted { .. })
    }

    /// Order currently owned by the machine
    pub fn live_order(&self) -> Option<&OrderIntent> {
        match self {
            ChaseState::Placing { order }
            | ChaseState::Resting { order }
            | ChaseState::Chasing { order, .. }
            | ChaseState::Replacing { order } => Some(order),
            ChaseState::Halted { order, .. } => order.as_ref(),
            ChaseState::Idle => None,
        }
    }

    pub(crate) fn live_order_mut(&mut self) -> Option<&mut OrderIntent> {
        match self {
            ChaseState::Placing { order }
            | ChaseState::Resting { order }
            | ChaseState::Chasing { order, .. }
            | ChaseState::Replacing { order } => Some(order),
            ChaseState::Halted { order, .. } => order.as_mut(),
            ChaseState::Idle => None,
        }
    }

    pub fn chasing_side(&self) -> Option<Side> {
        match self {
            ChaseState::Chasing { order, .. } | ChaseState::Replacing { order } => Some(order.side),
            _ => None,
        }
    }

    pub fn pending_replace_qty(&self) -> i64 {
        match self {
            ChaseState::Chasing {
                remainder,
                replace: true,
                ..
            } => *remainder,
            _ => 0,
        }
    }

    pub fn last_order_id(&self) -> Option<&OrderId> {
        self.live_order().map(|o| &o.order_id)
    }

    pub fn fake_stall_flag(&self) -> bool {
        matches!(self, ChaseState::Chasing { stalled: true, .. })
    }

    pub fn cancel_in_flight(&self) -> bool {
        matches!(
            self,
            ChaseState::Chasing {
                cancel_confirmed: false,
                ..
            }
        )
    }

    /// Cancel has landed and a replacement is still owed
    pub fn awaiting_replacement(&self) -> bool {
        matches!(
            self,
            ChaseState::Chasing {
                cancel_confirmed: true,
                replace: true,
                ..
            }
        )
    }

    /// Side, quantity, price and id for the audit record
    pub(crate) fn audit_fields(&self) -> Option<(Side, i64, Decimal, OrderId)> {
        match self {
            ChaseState::Chasing {
                order, remainder, ..
            } => Some((order.side, *remainder, order.price, order.order_id.clone())),
            _ => self
                .live_order()
                .map(|o| (o.side, o.remaining(), o.price, o.order_id.clone())),
        }
    }
}

impl std::fmt::Display for ChaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One audited state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub at: NaiveDateTime,
    pub instrument: String,
    pub event: String,
    pub side: Option<Side>,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub order_id: Option<OrderId>,
    pub from: String,
    pub to: String,
    pub reason: String,
}
