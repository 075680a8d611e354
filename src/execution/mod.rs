//! Order chase engine
//!
//! Works a target delta through at most one live order per instrument. The order is
//! placed passively, cancelled when the touch drifts more than `algo_limit_spread`
//! away from it (or when it sits unfilled past `chase_interval`), and the untraded
//! remainder is resubmitted at a fresh passive price once the cancel is confirmed.
//!
//! All venue commands are fire-and-forget. State only moves on the matching venue
//! event, except for the stall override which abandons an order the venue never
//! acknowledged.

mod state;

pub use state::{ChaseState, OrderIntent, TransitionRecord};

use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionConfig, MAX_CHASE_INTERVAL_SECS};
use crate::error::EngineError;
use crate::types::{OrderId, OrderState, OrderStatus, Quote, Side, TargetReason, TargetSignal};
use crate::venue::{Venue, VenueError};

#[derive(Debug, Clone)]
pub struct ChaseParams {
    /// Improvement over the touch when pricing an order
    pub algo_limit_place: Decimal,
    /// Allowed distance between the order and the touch before chasing
    pub algo_limit_spread: Decimal,
    /// Zero-fill age after which an order is treated as stalled
    pub chase_interval: Duration,
    pub max_consecutive_rejects: u32,
}

impl ChaseParams {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            algo_limit_place: cfg.algo_limit_place,
            algo_limit_spread: cfg.algo_limit_spread,
            chase_interval: Duration::seconds(
                cfg.chase_interval_secs.min(MAX_CHASE_INTERVAL_SECS) as i64,
            ),
            max_consecutive_rejects: cfg.max_consecutive_rejects,
        }
    }
}

/// Terminal order ids kept to silence duplicate events
const RETIRED_CAPACITY: usize = 1024;

/// Bounded set of finished order ids, oldest evicted first
#[derive(Debug)]
struct RetiredOrders {
    order: VecDeque<OrderId>,
    ids: HashSet<OrderId>,
    capacity: usize,
}

impl RetiredOrders {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, id: OrderId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &OrderId) -> bool {
        self.ids.contains(id)
    }
}

enum Submitted {
    Live(OrderIntent),
    Refused(OrderId),
}

pub struct OrderChaseEngine {
    instrument: String,
    params: ChaseParams,
    state: ChaseState,
    last_quote: Option<Quote>,
    /// Orders whose terminal event has been handled
    retired: RetiredOrders,
    /// Orders dropped by the stall override, with the traded quantity last seen
    abandoned: HashMap<OrderId, i64>,
    consecutive_rejects: u32,
    journal: Vec<TransitionRecord>,
}

impl OrderChaseEngine {
    pub fn new(instrument: impl Into<String>, params: ChaseParams) -> Self {
        Self {
            instrument: instrument.into(),
            params,
            state: ChaseState::Idle,
            last_quote: None,
            retired: RetiredOrders::with_capacity(RETIRED_CAPACITY),
            abandoned: HashMap::new(),
            consecutive_rejects: 0,
            journal: Vec::new(),
        }
    }

    pub fn state(&self) -> &ChaseState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn is_halted(&self) -> bool {
        self.state.is_halted()
    }

    /// Whether `order_id` belongs to this engine (live or abandoned)
    pub fn owns(&self, order_id: &OrderId) -> bool {
        self.state.last_order_id() == Some(order_id) || self.abandoned.contains_key(order_id)
    }

    /// Silence future events for an order this engine did not place
    pub fn ignore_order(&mut self, order_id: OrderId) {
        self.retired.insert(order_id);
    }

    pub fn drain_journal(&mut self) -> Vec<TransitionRecord> {
        std::mem::take(&mut self.journal)
    }

    fn passive_price(&self, side: Side, quote: &Quote) -> Decimal {
        match side {
            Side::Long => quote.bid_price + self.params.algo_limit_place,
            Side::Short => quote.ask_price - self.params.algo_limit_place,
        }
    }

    fn drifted(&self, order: &OrderIntent, quote: &Quote) -> bool {
        if order.remaining() == 0 {
            return false;
        }
        match order.side {
            Side::Long => quote.bid_price - order.price > self.params.algo_limit_spread,
            Side::Short => order.price - quote.ask_price > self.params.algo_limit_spread,
        }
    }

    fn transition(
        &mut self,
        at: NaiveDateTime,
        event: &str,
        next: ChaseState,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        let fields = next.audit_fields().or_else(|| self.state.audit_fields());
        let (side, quantity, price, order_id) = match fields {
            Some((side, qty, price, id)) => (Some(side), qty, Some(price), Some(id)),
            None => (None, 0, None, None),
        };
        let from = self.state.name();
        let to = next.name();

        info!(
            target: "audit",
            instrument = %self.instrument,
            event,
            side = %side.map(|s| s.to_string()).unwrap_or_default(),
            quantity,
            price = %price.map(|p| p.to_string()).unwrap_or_default(),
            order_id = order_id.as_ref().map(|id| id.as_str()).unwrap_or(""),
            from,
            to,
            reason = %reason,
            "Chase transition"
        );

        self.journal.push(TransitionRecord {
            at,
            instrument: self.instrument.clone(),
            event: event.to_string(),
            side,
            quantity,
            price,
            order_id,
            from: from.to_string(),
            to: to.to_string(),
            reason,
        });
        self.state = next;
    }

    fn submit(
        &mut self,
        venue: &mut dyn Venue,
        side: Side,
        quantity: i64,
        quote: &Quote,
    ) -> Result<Submitted, EngineError> {
        let price = self.passive_price(side, quote);
        match venue.submit_order(side, price, quantity) {
            Ok(order_id) => Ok(Submitted::Live(OrderIntent {
                order_id,
                side,
                price,
                quantity,
                traded: 0,
                submitted_at: quote.instant,
            })),
            Err(VenueError::Rejected { order_id, reason }) => {
                warn!(order_id = %order_id, side = %side, price = %price, quantity, reason = %reason, "Order refused by venue");
                self.retired.insert(order_id.clone());
                Ok(Submitted::Refused(order_id))
            }
            Err(VenueError::Disconnected(reason)) => {
                self.halt(quote.instant, &reason);
                Err(EngineError::VenueDisconnected(reason))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count a reject and hand the remainder back unless the limit was hit
    fn reject_remainder(&mut self, side: Side, quantity: i64) -> Option<TargetSignal> {
        self.consecutive_rejects += 1;
        if self.consecutive_rejects >= self.params.max_consecutive_rejects {
            error!(
                instrument = %self.instrument,
                side = %side,
                quantity,
                rejects = self.consecutive_rejects,
                "Too many consecutive rejects, dropping remainder"
            );
            self.consecutive_rejects = 0;
            return None;
        }
        (quantity > 0).then(|| TargetSignal::new(side.sign() * quantity, TargetReason::Remainder))
    }

    /// Convert a target into the first order. Only valid while idle.
    ///
    /// Returns the target back when the venue refused the order synchronously so the
    /// caller can retry it against a later quote.
    pub fn on_target(
        &mut self,
        target: &TargetSignal,
        quote: &Quote,
        venue: &mut dyn Venue,
    ) -> Result<Option<TargetSignal>, EngineError> {
        if let ChaseState::Halted { reason, .. } = &self.state {
            return Err(EngineError::VenueDisconnected(reason.clone()));
        }
        if !self.state.is_idle() {
            error!(state = %self.state, "Target offered while an order is live, ignoring");
            return Ok(Some(*target));
        }
        let Some(side) = target.side() else {
            return Ok(None);
        };
        if !venue.is_trading_enabled() {
            return Err(EngineError::SessionViolation(venue.now().time()));
        }
        if !quote.is_valid() {
            return Err(EngineError::StaleQuote {
                bid: quote.bid_price,
                ask: quote.ask_price,
            });
        }
        self.last_quote = Some(quote.clone());

        match self.submit(venue, side, target.quantity(), quote)? {
            Submitted::Live(order) => {
                self.transition(quote.instant, "submit", ChaseState::Placing { order }, target.reason.to_string());
                Ok(None)
            }
            Submitted::Refused(order_id) => {
                let err = EngineError::VenueReject(order_id);
                warn!(error = %err, "Target will be re-evaluated on the next quote");
                self.consecutive_rejects += 1;
                if self.consecutive_rejects >= self.params.max_consecutive_rejects {
                    error!(rejects = self.consecutive_rejects, reason = %target.reason, "Too many consecutive rejects, dropping target");
                    self.consecutive_rejects = 0;
                    return Ok(None);
                }
                Ok(Some(*target))
            }
        }
    }

    /// Drift and stall checks against a fresh quote
    pub fn on_quote(
        &mut self,
        quote: &Quote,
        venue: &mut dyn Venue,
    ) -> Result<Option<TargetSignal>, EngineError> {
        if quote.is_valid() {
            self.last_quote = Some(quote.clone());
        }

        if self.state.awaiting_replacement() {
            if quote.is_valid() {
                return self.replace(quote, venue);
            }
            return Ok(None);
        }

        let (order, acked) = match &self.state {
            ChaseState::Placing { order } | ChaseState::Replacing { order } => (order.clone(), false),
            ChaseState::Resting { order } => (order.clone(), true),
            _ => return Ok(None),
        };

        let age = quote.instant - order.submitted_at;
        let stalled = order.traded == 0 && age > self.params.chase_interval;
        if stalled && !acked {
            return self.stall_override(order, age, quote, venue);
        }
        if !acked {
            return Ok(None);
        }

        let (event, reason) = if stalled {
            warn!(
                order_id = %order.order_id,
                age_secs = age.num_seconds(),
                "Resting order stalled without fills, chasing"
            );
            ("stall", format!("no fill for {}s", age.num_seconds()))
        } else if quote.is_valid() && self.drifted(&order, quote) {
            debug!(
                order_id = %order.order_id,
                price = %order.price,
                bid = %quote.bid_price,
                ask = %quote.ask_price,
                "Touch drifted away from resting order"
            );
            ("cancel", format!("price drift beyond {}", self.params.algo_limit_spread))
        } else {
            return Ok(None);
        };

        venue.cancel_order(&order.order_id);
        let remainder = order.remaining();
        self.transition(
            quote.instant,
            event,
            ChaseState::Chasing {
                order,
                remainder,
                stalled,
                replace: true,
                cancel_confirmed: false,
            },
            reason,
        );
        Ok(None)
    }

    /// Abandon an order the venue never acknowledged and replace it at once
    fn stall_override(
        &mut self,
        order: OrderIntent,
        age: Duration,
        quote: &Quote,
        venue: &mut dyn Venue,
    ) -> Result<Option<TargetSignal>, EngineError> {
        warn!(
            order_id = %order.order_id,
            age_secs = age.num_seconds(),
            "Unacknowledged order stalled, abandoning"
        );
        venue.cancel_order(&order.order_id);
        self.abandoned.insert(order.order_id.clone(), order.traded);
        let remainder = order.remaining();
        self.transition(
            quote.instant,
            "stall",
            ChaseState::Chasing {
                order,
                remainder,
                stalled: true,
                replace: true,
                cancel_confirmed: true,
            },
            format!("no acknowledgement for {}s", age.num_seconds()),
        );
        if quote.is_valid() {
            return self.replace(quote, venue);
        }
        Ok(None)
    }

    /// Submit the remainder of a confirmed chase at a fresh passive price
    fn replace(
        &mut self,
        quote: &Quote,
        venue: &mut dyn Venue,
    ) -> Result<Option<TargetSignal>, EngineError> {
        let (side, remainder) = match &self.state {
            ChaseState::Chasing {
                order, remainder, ..
            } => (order.side, *remainder),
            _ => return Ok(None),
        };
        if remainder <= 0 {
            self.transition(quote.instant, "complete", ChaseState::Idle, "nothing left to replace");
            return Ok(None);
        }
        match self.submit(venue, side, remainder, quote)? {
            Submitted::Live(order) => {
                self.transition(
                    quote.instant,
                    "replace",
                    ChaseState::Replacing { order },
                    "resubmit remainder",
                );
                Ok(None)
            }
            Submitted::Refused(_) => {
                self.transition(quote.instant, "reject", ChaseState::Idle, "replacement refused");
                Ok(self.reject_remainder(side, remainder))
            }
        }
    }

    /// Apply a venue order event
    pub fn on_order_update(
        &mut self,
        update: &OrderState,
        venue: &mut dyn Venue,
    ) -> Result<Option<TargetSignal>, EngineError> {
        let id = &update.order_id;
        let at = venue.now();

        if self.retired.contains(id) {
            debug!(order_id = %id, status = %update.status, "Update for retired order ignored");
            return Ok(None);
        }
        if let Some(seen) = self.abandoned.get(id).copied() {
            self.on_abandoned_update(update, seen, at, venue);
            return Ok(None);
        }

        let order = match self.state.live_order() {
            Some(o) if o.order_id == *id => o.clone(),
            _ => {
                warn!(order_id = %id, status = %update.status, state = %self.state, "Update for unknown order");
                return Err(EngineError::UnknownOrder(id.clone()));
            }
        };

        let filled_now = (update.traded_qty - order.traded).max(0);
        if filled_now > 0 {
            info!(
                order_id = %id,
                side = %order.side,
                filled_now,
                traded = update.traded_qty,
                requested = order.quantity,
                price = %order.price,
                "Order fill"
            );
            self.consecutive_rejects = 0;
        }
        if let Some(live) = self.state.live_order_mut() {
            live.traded = live.traded.max(update.traded_qty);
        }
        if let ChaseState::Chasing { remainder, .. } = &mut self.state {
            *remainder -= filled_now;
        }

        if let ChaseState::Halted { reason, .. } = &self.state {
            if update.status.is_terminal() {
                let reason = reason.clone();
                self.retired.insert(id.clone());
                self.transition(
                    at,
                    "venue_terminal",
                    ChaseState::Halted {
                        reason,
                        order: None,
                    },
                    format!("venue {} while halted", update.status),
                );
            }
            return Ok(None);
        }

        match update.status {
            OrderStatus::Filled => {
                self.retired.insert(id.clone());
                self.transition(at, "filled", ChaseState::Idle, "order fully traded");
                Ok(None)
            }
            OrderStatus::New | OrderStatus::PartiallyFilled => {
                let acked = match &self.state {
                    ChaseState::Placing { order } | ChaseState::Replacing { order } => {
                        Some(order.clone())
                    }
                    _ => None,
                };
                if let Some(order) = acked {
                    self.consecutive_rejects = 0;
                    self.transition(at, "ack", ChaseState::Resting { order }, "venue acknowledged");
                }
                Ok(None)
            }
            OrderStatus::Cancelled | OrderStatus::Rejected => {
                self.retired.insert(id.clone());
                self.on_terminal(update, at, venue)
            }
        }
    }

    fn on_terminal(
        &mut self,
        update: &OrderState,
        at: NaiveDateTime,
        venue: &mut dyn Venue,
    ) -> Result<Option<TargetSignal>, EngineError> {
        if let ChaseState::Chasing {
            order,
            remainder,
            stalled,
            replace,
            ..
        } = &self.state
        {
            let (order, remainder, stalled, replace) = (order.clone(), *remainder, *stalled, *replace);
            if !replace || remainder <= 0 {
                self.transition(at, "cancel_confirmed", ChaseState::Idle, "chase finished");
                return Ok(None);
            }
            self.transition(
                at,
                "cancel_confirmed",
                ChaseState::Chasing {
                    order,
                    remainder,
                    stalled,
                    replace,
                    cancel_confirmed: true,
                },
                format!("venue {}", update.status),
            );
            return match self.last_quote.clone() {
                Some(quote) if quote.is_valid() => self.replace(&quote, venue),
                _ => Ok(None),
            };
        }

        let order = match self.state.live_order() {
            Some(o) => o.clone(),
            None => return Ok(None),
        };
        let remaining = order.remaining();
        self.transition(at, "venue_terminal", ChaseState::Idle, format!("venue {}", update.status));
        if update.status == OrderStatus::Rejected {
            warn!(error = %EngineError::VenueReject(update.order_id.clone()), "Re-evaluating on next quote");
            return Ok(self.reject_remainder(order.side, remaining));
        }
        Ok((remaining > 0)
            .then(|| TargetSignal::new(order.side.sign() * remaining, TargetReason::Remainder)))
    }

    /// Late activity on an order dropped by the stall override
    fn on_abandoned_update(
        &mut self,
        update: &OrderState,
        seen: i64,
        at: NaiveDateTime,
        venue: &mut dyn Venue,
    ) {
        let id = &update.order_id;
        if update.status.is_terminal() {
            self.abandoned.remove(id);
            self.retired.insert(id.clone());
        } else {
            self.abandoned.insert(id.clone(), update.traded_qty.max(seen));
        }
        let late = (update.traded_qty - seen).max(0);
        if late == 0 {
            debug!(order_id = %id, status = %update.status, "Abandoned order update absorbed");
            return;
        }
        warn!(order_id = %id, late, "Late fill on abandoned order, shrinking live work");

        match self.state.clone() {
            ChaseState::Chasing {
                order,
                remainder,
                stalled,
                replace,
                cancel_confirmed,
            } => {
                let remainder = remainder - late;
                if cancel_confirmed && remainder <= 0 {
                    self.transition(at, "complete", ChaseState::Idle, "filled by abandoned order");
                } else {
                    self.state = ChaseState::Chasing {
                        order,
                        remainder,
                        stalled,
                        replace,
                        cancel_confirmed,
                    };
                }
            }
            ChaseState::Placing { order }
            | ChaseState::Resting { order }
            | ChaseState::Replacing { order } => {
                let needed = order.remaining() - late;
                venue.cancel_order(&order.order_id);
                self.transition(
                    at,
                    "cancel",
                    ChaseState::Chasing {
                        order,
                        remainder: needed,
                        stalled: false,
                        replace: needed > 0,
                        cancel_confirmed: false,
                    },
                    "late fill on abandoned order",
                );
            }
            ChaseState::Idle | ChaseState::Halted { .. } => {
                warn!(order_id = %id, late, "Abandoned order filled while idle, position overshoot");
            }
        }
    }

    /// Cancel the live order without replacing it
    pub fn force_cancel(&mut self, reason: &str, venue: &mut dyn Venue) {
        let at = venue.now();
        match self.state.clone() {
            ChaseState::Placing { order }
            | ChaseState::Resting { order }
            | ChaseState::Replacing { order } => {
                venue.cancel_order(&order.order_id);
                let remainder = order.remaining();
                self.transition(
                    at,
                    "force_cancel",
                    ChaseState::Chasing {
                        order,
                        remainder,
                        stalled: false,
                        replace: false,
                        cancel_confirmed: false,
                    },
                    reason,
                );
            }
            ChaseState::Chasing {
                cancel_confirmed: true,
                ..
            } => {
                self.transition(at, "force_cancel", ChaseState::Idle, reason);
            }
            ChaseState::Chasing {
                order,
                remainder,
                stalled,
                cancel_confirmed: false,
                ..
            } => {
                self.transition(
                    at,
                    "force_cancel",
                    ChaseState::Chasing {
                        order,
                        remainder,
                        stalled,
                        replace: false,
                        cancel_confirmed: false,
                    },
                    reason,
                );
            }
            ChaseState::Idle | ChaseState::Halted { .. } => {}
        }
    }

    /// Stop placing orders for this instrument. A live order stays tracked so its
    /// fills are still applied.
    pub fn halt(&mut self, at: NaiveDateTime, reason: &str) {
        if self.state.is_halted() {
            return;
        }
        error!(instrument = %self.instrument, reason, state = %self.state, "Trading halted");
        let order = match &self.state {
            ChaseState::Chasing {
                cancel_confirmed: true,
                ..
            } => None,
            other => other.live_order().cloned(),
        };
        self.transition(
            at,
            "halt",
            ChaseState::Halted {
                reason: reason.to_string(),
                order,
            },
            reason,
        );
    }

    /// Rebuild from a saved state, checked against the venue's view of the order.
    ///
    /// Returns the untraded remainder of a saved order that finished while offline,
    /// for the caller to work again.
    pub fn restore(&mut self, saved: ChaseState, venue: &mut dyn Venue) -> Option<TargetSignal> {
        let at = venue.now();
        let Some(mut order) = saved.live_order().cloned() else {
            if saved.is_halted() {
                info!("Clearing halt from previous run");
            }
            return None;
        };

        let live = venue.get_order(&order.order_id);
        let filled_offline = live
            .as_ref()
            .map_or(0, |st| (st.traded_qty - order.traded).max(0));
        order.traded += filled_offline;

        let finished = match &live {
            None => {
                warn!(order_id = %order.order_id, "Saved order unknown to venue");
                true
            }
            Some(st) if st.status.is_terminal() => {
                info!(order_id = %order.order_id, status = %st.status, filled_offline, "Saved order finished while offline");
                true
            }
            Some(_) => false,
        };

        if finished {
            self.retired.insert(order.order_id.clone());
            return match saved {
                ChaseState::Chasing {
                    remainder,
                    stalled,
                    replace: true,
                    ..
                } if remainder - filled_offline > 0 => {
                    self.transition(
                        at,
                        "restore",
                        ChaseState::Chasing {
                            order,
                            remainder: remainder - filled_offline,
                            stalled,
                            replace: true,
                            cancel_confirmed: true,
                        },
                        "cancel confirmed while offline",
                    );
                    None
                }
                ChaseState::Chasing { .. } => None,
                _ => {
                    let remaining = order.remaining();
                    (remaining > 0).then(|| {
                        info!(order_id = %order.order_id, remaining, "Handing back remainder of finished order");
                        TargetSignal::new(order.side.sign() * remaining, TargetReason::Remainder)
                    })
                }
            };
        }

        let next = match saved {
            ChaseState::Chasing {
                remainder,
                stalled,
                replace,
                ..
            } => {
                venue.cancel_order(&order.order_id);
                ChaseState::Chasing {
                    order,
                    remainder: remainder - filled_offline,
                    stalled,
                    replace,
                    cancel_confirmed: false,
                }
            }
            _ => ChaseState::Resting { order },
        };
        self.transition(at, "restore", next, "restored from snapshot");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{PaperMode, PaperVenue};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn quote(t: NaiveDateTime, bid: Decimal, ask: Decimal) -> Quote {
        Quote {
            instant: t,
            bid_price: bid,
            ask_price: ask,
            last_price: None,
        }
    }

    fn engine() -> OrderChaseEngine {
        OrderChaseEngine::new(
            "rb",
            ChaseParams {
                algo_limit_place: dec!(0.0),
                algo_limit_spread: dec!(1.0),
                chase_interval: Duration::seconds(20),
                max_consecutive_rejects: 3,
            },
        )
    }

    fn pump(engine: &mut OrderChaseEngine, venue: &mut PaperVenue) -> Vec<TargetSignal> {
        let mut out = Vec::new();
        loop {
            let events = venue.drain_events();
            if events.is_empty() {
                return out;
            }
            for ev in events {
                if let Ok(Some(t)) = engine.on_order_update(&ev, venue) {
                    out.push(t);
                }
            }
        }
    }

    #[test]
    fn places_passively_and_rests_on_ack() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        venue.apply_quote(&q);
        e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        assert_eq!(e.state().name(), "PLACING");
        pump(&mut e, &mut venue);
        let order = e.state().live_order().unwrap();
        assert_eq!(order.price, dec!(100.0));
        assert_eq!(order.quantity, 5);
        assert_eq!(e.state().name(), "RESTING");
    }

    #[test]
    fn stale_quote_does_not_place() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(-1.0), dec!(100.5));
        let res = e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue);
        assert!(matches!(res, Err(EngineError::StaleQuote { .. })));
        assert!(e.is_idle());
        assert!(venue.submitted().is_empty());
    }

    #[test]
    fn short_order_chases_when_ask_drops() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(99.5), dec!(100.0));
        e.on_target(&TargetSignal::new(-2, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        pump(&mut e, &mut venue);

        e.on_quote(&quote(at(10, 30, 5), dec!(98.0), dec!(98.5)), &mut venue).unwrap();
        assert!(e.state().cancel_in_flight());
        assert_eq!(e.state().chasing_side(), Some(Side::Short));
        pump(&mut e, &mut venue);
        let order = e.state().live_order().unwrap();
        assert_eq!(order.price, dec!(98.5));
        assert_eq!(order.quantity, 2);
    }

    #[test]
    fn partial_fill_then_cancel_replaces_only_remainder() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        pump(&mut e, &mut venue);
        let first = e.state().last_order_id().unwrap().clone();
        venue.fill(&first, 2);
        pump(&mut e, &mut venue);

        e.on_quote(&quote(at(10, 30, 5), dec!(101.6), dec!(102.0)), &mut venue).unwrap();
        assert_eq!(e.state().pending_replace_qty(), 3);
        pump(&mut e, &mut venue);
        let order = e.state().live_order().unwrap();
        assert_ne!(order.order_id, first);
        assert_eq!(order.quantity, 3);
        assert_eq!(order.price, dec!(101.6));
    }

    #[test]
    fn unacked_stall_replaces_without_waiting_for_confirmation() {
        let mut venue = PaperVenue::new("rb");
        venue.set_mode(PaperMode::Unacked);
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        pump(&mut e, &mut venue);
        assert_eq!(e.state().name(), "PLACING");
        let first = e.state().last_order_id().unwrap().clone();

        // exactly at the interval is not yet a stall
        e.on_quote(&quote(at(10, 30, 20), dec!(100.0), dec!(100.5)), &mut venue).unwrap();
        assert_eq!(e.state().name(), "PLACING");

        e.on_quote(&quote(at(10, 30, 21), dec!(100.0), dec!(100.5)), &mut venue).unwrap();
        assert_eq!(e.state().name(), "REPLACING");
        assert_ne!(e.state().last_order_id(), Some(&first));
        assert!(e.owns(&first));

        // the abandoned order's cancel is absorbed
        assert!(pump(&mut e, &mut venue).is_empty());
        assert_eq!(e.state().name(), "REPLACING");
        assert!(!e.owns(&first));
        assert_eq!(venue.get_active_order_ids().len(), 1);
    }

    #[test]
    fn resting_stall_cancels_before_replacing() {
        let mut venue = PaperVenue::new("rb");
        venue.set_mode(PaperMode::Stalled);
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        pump(&mut e, &mut venue);
        assert_eq!(e.state().name(), "RESTING");
        let first = e.state().last_order_id().unwrap().clone();

        e.on_quote(&quote(at(10, 30, 21), dec!(100.0), dec!(100.5)), &mut venue).unwrap();
        assert!(e.state().cancel_in_flight());
        assert!(e.state().fake_stall_flag());
        assert_eq!(venue.submitted().len(), 1);

        pump(&mut e, &mut venue);
        assert_eq!(e.state().name(), "RESTING");
        assert_ne!(e.state().last_order_id(), Some(&first));
        assert_eq!(e.state().live_order().unwrap().quantity, 5);
        assert_eq!(venue.get_active_order_ids().len(), 1);
    }

    #[test]
    fn retired_orders_evict_oldest_past_capacity() {
        let mut retired = RetiredOrders::with_capacity(3);
        for n in 1..=4 {
            retired.insert(OrderId::new(format!("o-{}", n)));
        }
        // duplicates do not push anything out
        retired.insert(OrderId::new("o-4"));

        assert!(!retired.contains(&OrderId::new("o-1")));
        for n in 2..=4 {
            assert!(retired.contains(&OrderId::new(format!("o-{}", n))));
        }
        assert_eq!(retired.order.len(), 3);
        assert_eq!(retired.ids.len(), 3);
    }

    #[test]
    fn chase_interval_is_clamped() {
        let cfg = ExecutionConfig {
            algo_limit_place: dec!(0.0),
            algo_limit_spread: dec!(1.0),
            chase_interval_secs: u64::MAX,
            max_consecutive_rejects: 3,
        };
        let params = ChaseParams::from_config(&cfg);
        assert_eq!(
            params.chase_interval,
            Duration::seconds(MAX_CHASE_INTERVAL_SECS as i64)
        );
    }

    #[test]
    fn venue_reject_hands_back_remainder_until_limit() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        venue.reject_next(3);

        let mut target = TargetSignal::new(4, TargetReason::Flatten);
        for attempt in 1..=3 {
            e.on_target(&target, &q, &mut venue).unwrap();
            let handed_back = pump(&mut e, &mut venue);
            assert!(e.is_idle());
            if attempt < 3 {
                assert_eq!(handed_back.len(), 1);
                target = handed_back[0];
                assert_eq!(target.delta, 4);
                assert_eq!(target.reason, TargetReason::Remainder);
            } else {
                assert!(handed_back.is_empty());
            }
        }
    }

    #[test]
    fn unknown_order_is_reported_not_fatal() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let stray = OrderState {
            order_id: OrderId::new("elsewhere-9"),
            side: Side::Long,
            requested_qty: 1,
            traded_qty: 1,
            price: dec!(1.0),
            status: OrderStatus::Filled,
        };
        let res = e.on_order_update(&stray, &mut venue);
        assert!(matches!(res, Err(EngineError::UnknownOrder(_))));
        assert!(e.is_idle());
    }

    #[test]
    fn force_cancel_goes_idle_on_confirmation() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        pump(&mut e, &mut venue);
        e.force_cancel("session close", &mut venue);
        assert_eq!(e.state().pending_replace_qty(), 0);
        pump(&mut e, &mut venue);
        assert!(e.is_idle());
        assert_eq!(venue.submitted().len(), 1);
    }

    #[test]
    fn disconnect_halts() {
        let mut venue = PaperVenue::new("rb");
        venue.set_mode(PaperMode::Disconnected);
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        let res = e.on_target(&TargetSignal::new(1, TargetReason::Flatten), &q, &mut venue);
        assert!(matches!(res, Err(EngineError::VenueDisconnected(_))));
        assert!(e.is_halted());
        let journal = e.drain_journal();
        assert_eq!(journal.last().unwrap().to, "HALTED");
    }

    #[test]
    fn restore_resumes_resting_order() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        e.on_target(&TargetSignal::new(5, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        pump(&mut e, &mut venue);
        let saved = e.state().clone();
        let id = saved.last_order_id().unwrap().clone();
        venue.fill(&id, 1);
        venue.drain_events();

        let mut restarted = engine();
        assert_eq!(restarted.restore(saved, &mut venue), None);
        let order = restarted.state().live_order().unwrap();
        assert_eq!(restarted.state().name(), "RESTING");
        assert_eq!(order.traded, 1);
        assert!(restarted.owns(&id));
    }

    #[test]
    fn restore_hands_back_remainder_of_unknown_order() {
        let mut venue = PaperVenue::new("rb");
        let mut e = engine();
        let q = quote(at(10, 30, 0), dec!(100.0), dec!(100.5));
        e.on_target(&TargetSignal::new(-4, TargetReason::Flatten), &q, &mut venue)
            .unwrap();
        let saved = e.state().clone();
        assert_eq!(saved.name(), "PLACING");

        let mut fresh = PaperVenue::new("rb");
        let mut restarted = engine();
        let handed_back = restarted.restore(saved, &mut fresh);
        assert_eq!(
            handed_back,
            Some(TargetSignal::new(-4, TargetReason::Remainder))
        );
        assert!(restarted.is_idle());
    }
}
