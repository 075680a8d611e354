//! In-memory paper venue
//!
//! Acknowledges orders, fills resting limits when a quote crosses them and queues the
//! resulting `OrderState` events for the caller to drain. Can be put into a stalled
//! mode (acks but never fills), an unacked mode (accepts orders silently) or a
//! disconnected mode (refuses commands).

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use super::{Venue, VenueError};
use crate::types::{OrderId, OrderState, OrderStatus, Quote, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperMode {
    Normal,
    /// Orders are acknowledged but never fill
    Stalled,
    /// Orders are accepted but never acknowledged or filled; cancels still confirm
    Unacked,
    /// Every command fails with `VenueError::Disconnected`
    Disconnected,
}

pub struct PaperVenue {
    instrument: String,
    now: NaiveDateTime,
    trading_enabled: bool,
    mode: PaperMode,
    position: i64,
    orders: BTreeMap<OrderId, OrderState>,
    events: VecDeque<OrderState>,
    next_id: u64,
    reject_next: u32,
    submitted: Vec<OrderId>,
}

impl PaperVenue {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            now: NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            trading_enabled: true,
            mode: PaperMode::Normal,
            position: 0,
            orders: BTreeMap::new(),
            events: VecDeque::new(),
            next_id: 1,
            reject_next: 0,
            submitted: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    pub fn set_mode(&mut self, mode: PaperMode) {
        info!(?mode, "[PAPER] Venue mode changed");
        self.mode = mode;
    }

    pub fn set_trading_enabled(&mut self, enabled: bool) {
        self.trading_enabled = enabled;
    }

    pub fn set_now(&mut self, now: NaiveDateTime) {
        self.now = now;
    }

    /// Reject the next `n` submissions
    pub fn reject_next(&mut self, n: u32) {
        self.reject_next = n;
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    /// Every id ever handed out, in submission order
    pub fn submitted(&self) -> &[OrderId] {
        &self.submitted
    }

    pub fn order(&self, order_id: &OrderId) -> Option<&OrderState> {
        self.orders.get(order_id)
    }

    /// Advance the clock and fill any resting order the quote crosses
    pub fn apply_quote(&mut self, quote: &Quote) {
        self.now = quote.instant;
        if self.mode != PaperMode::Normal || !quote.is_valid() {
            return;
        }
        let crossed: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .filter(|o| match o.side {
                Side::Long => quote.ask_price <= o.price,
                Side::Short => quote.bid_price >= o.price,
            })
            .map(|o| o.order_id.clone())
            .collect();
        for id in crossed {
            let remaining = self.orders.get(&id).map(|o| o.remaining()).unwrap_or(0);
            self.fill(&id, remaining);
        }
    }

    /// Fill `quantity` of an active order at its limit price
    pub fn fill(&mut self, order_id: &OrderId, quantity: i64) {
        let Some(order) = self.orders.get_mut(order_id) else {
            warn!(order_id = %order_id, "[PAPER] Fill for unknown order");
            return;
        };
        if !order.status.is_active() || quantity <= 0 {
            return;
        }
        let qty = quantity.min(order.remaining());
        order.traded_qty += qty;
        order.status = if order.remaining() == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.position += order.side.sign() * qty;
        info!(
            order_id = %order_id,
            side = %order.side,
            qty,
            price = %order.price,
            traded = order.traded_qty,
            position = self.position,
            "[PAPER] Order filled"
        );
        self.events.push_back(order.clone());
    }

    /// Cancel confirmation raised by the venue itself (expiry, risk check, ...)
    pub fn venue_cancel(&mut self, order_id: &OrderId) {
        if let Some(order) = self.orders.get_mut(order_id) {
            if order.status.is_active() {
                order.status = OrderStatus::Cancelled;
                self.events.push_back(order.clone());
            }
        }
    }

    /// Queue an arbitrary event, for duplicate / out-of-order delivery
    pub fn push_event(&mut self, event: OrderState) {
        self.events.push_back(event);
    }

    pub fn drain_events(&mut self) -> Vec<OrderState> {
        self.events.drain(..).collect()
    }
}

impl Venue for PaperVenue {
    fn now(&self) -> NaiveDateTime {
        self.now
    }

    fn is_trading_enabled(&self) -> bool {
        self.trading_enabled
    }

    fn get_position(&self, instrument: &str) -> Result<i64, VenueError> {
        if self.mode == PaperMode::Disconnected {
            return Err(VenueError::Disconnected("paper venue offline".into()));
        }
        if instrument != self.instrument {
            debug!(instrument, "[PAPER] Position requested for other instrument");
            return Ok(0);
        }
        Ok(self.position)
    }

    fn get_order(&self, order_id: &OrderId) -> Option<OrderState> {
        self.orders.get(order_id).cloned()
    }

    fn get_active_order_ids(&self) -> HashSet<OrderId> {
        self.orders
            .values()
            .filter(|o| o.status.is_active())
            .map(|o| o.order_id.clone())
            .collect()
    }

    fn submit_order(
        &mut self,
        side: Side,
        price: Decimal,
        quantity: i64,
    ) -> Result<OrderId, VenueError> {
        if self.mode == PaperMode::Disconnected {
            return Err(VenueError::Disconnected("paper venue offline".into()));
        }
        let order_id = OrderId::new(format!("paper-{}", self.next_id));
        self.next_id += 1;
        self.submitted.push(order_id.clone());

        let status = if self.reject_next > 0 {
            self.reject_next -= 1;
            OrderStatus::Rejected
        } else {
            OrderStatus::New
        };
        let order = OrderState {
            order_id: order_id.clone(),
            side,
            requested_qty: quantity,
            traded_qty: 0,
            price,
            status,
        };
        debug!(
            order_id = %order_id,
            side = %side,
            price = %price,
            quantity,
            status = %status,
            "[PAPER] Order submitted"
        );
        if self.mode != PaperMode::Unacked || status == OrderStatus::Rejected {
            self.events.push_back(order.clone());
        }
        self.orders.insert(order_id.clone(), order);
        Ok(order_id)
    }

    fn cancel_order(&mut self, order_id: &OrderId) {
        if self.mode == PaperMode::Disconnected {
            warn!(order_id = %order_id, "[PAPER] Cancel dropped, venue offline");
            return;
        }
        match self.orders.get_mut(order_id) {
            Some(order) if order.status.is_active() => {
                order.status = OrderStatus::Cancelled;
                self.events.push_back(order.clone());
            }
            Some(_) => debug!(order_id = %order_id, "[PAPER] Cancel for finished order"),
            None => warn!(order_id = %order_id, "[PAPER] Cancel for unknown order"),
        }
    }

    fn cancel_all(&mut self) {
        let active: Vec<OrderId> = self.get_active_order_ids().into_iter().collect();
        for id in active {
            self.cancel_order(&id);
        }
    }

    fn observe_quote(&mut self, quote: &Quote) {
        self.apply_quote(quote);
    }

    fn poll_events(&mut self) -> Vec<OrderState> {
        self.drain_events()
    }
}
