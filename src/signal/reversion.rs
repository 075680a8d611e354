//! Anchored multi-level mean reversion
//!
//! The close of the bar ending at the session start becomes the anchor. While the
//! session runs, each idle quote is checked against a ladder of levels spaced
//! `thre * anchor` apart: breaking out above the next short level adds a short
//! tranche, breaking below the next long level adds a long tranche, and crossing back
//! through the anchor takes profit on everything.

use chrono::{Duration, NaiveTime};
use tracing::{debug, info, warn};

use super::{BusyPolicy, SignalContext, SignalEngine, SignalState};
use crate::config::ReversionConfig;
use crate::error::EngineError;
use crate::session::{parse_time_of_day, BarSlot, TimeWindow};
use crate::types::{Bar, Quote, TargetReason, TargetSignal};

#[derive(Debug, Clone)]
pub struct ReversionParams {
    pub session: TimeWindow,
    /// Wall-clock time at which any leftover position is closed
    pub flatten_at: NaiveTime,
    pub thre: f64,
    pub limit_pos: i64,
    pub trade_size: i64,
    pub bar_period: Duration,
}

impl ReversionParams {
    pub fn from_config(cfg: &ReversionConfig) -> Result<Self, EngineError> {
        if !(cfg.thre.is_finite() && cfg.thre > 0.0) {
            return Err(EngineError::Config(format!(
                "reversion.thre must be positive, got {}",
                cfg.thre
            )));
        }
        if cfg.trade_size <= 0 {
            return Err(EngineError::Config(format!(
                "reversion.trade_size must be positive, got {}",
                cfg.trade_size
            )));
        }
        if cfg.limit_pos < cfg.trade_size {
            return Err(EngineError::Config(format!(
                "reversion.limit_pos ({}) must be at least trade_size ({})",
                cfg.limit_pos, cfg.trade_size
            )));
        }
        if cfg.bar_minutes == 0 {
            return Err(EngineError::Config("reversion.bar_minutes must be positive".into()));
        }
        Ok(Self {
            session: TimeWindow::new(
                parse_time_of_day(&cfg.trading_start_time)?,
                parse_time_of_day(&cfg.trading_end_time)?,
            ),
            flatten_at: parse_time_of_day(&cfg.close_all_position_time)?,
            thre: cfg.thre,
            limit_pos: cfg.limit_pos,
            trade_size: cfg.trade_size,
            bar_period: Duration::minutes(i64::from(cfg.bar_minutes)),
        })
    }

    /// Window between the forced flatten and the next session start
    pub fn flat_window(&self) -> TimeWindow {
        TimeWindow::new(self.flatten_at, self.session.start)
    }
}

enum Breakout {
    Short,
    Long,
}

pub struct ReversionSignal {
    params: ReversionParams,
    anchor_slot: BarSlot,
    stop_slot: BarSlot,
    flatten_slot: BarSlot,
    anchor: Option<f64>,
    /// Set after the position-limit warning so it is logged once per excursion
    limit_reached: bool,
}

impl ReversionSignal {
    pub fn new(params: ReversionParams) -> Self {
        Self {
            anchor_slot: BarSlot::new(params.session.start, params.bar_period),
            stop_slot: BarSlot::new(params.session.end, params.bar_period),
            flatten_slot: BarSlot::new(params.flatten_at, params.bar_period),
            anchor: None,
            limit_reached: false,
            params,
        }
    }

    pub fn anchor(&self) -> Option<f64> {
        self.anchor
    }

    pub fn limit_reached(&self) -> bool {
        self.limit_reached
    }

    /// Ladder level for `position`, starting at 1
    fn level(&self, position: i64) -> i64 {
        position.abs() / self.params.trade_size + 1
    }

    fn short_level(&self, anchor: f64, level: i64) -> f64 {
        anchor * (1.0 + self.params.thre * level as f64)
    }

    fn long_level(&self, anchor: f64, level: i64) -> f64 {
        anchor * (1.0 - self.params.thre * level as f64)
    }

    fn breakout(&self, anchor: f64, price: f64, position: i64) -> Option<Breakout> {
        let level = self.level(position);
        if price > self.short_level(anchor, level) {
            Some(Breakout::Short)
        } else if price < self.long_level(anchor, level) {
            Some(Breakout::Long)
        } else {
            None
        }
    }
}

impl SignalEngine for ReversionSignal {
    fn name(&self) -> &'static str {
        "reversion"
    }

    fn trading_window(&self) -> TimeWindow {
        self.params.session
    }

    fn busy_policy(&self) -> BusyPolicy {
        BusyPolicy::Queue
    }

    fn bar_period(&self) -> Duration {
        self.params.bar_period
    }

    fn warmup_days(&self) -> u32 {
        6
    }

    fn on_closed_bar(
        &mut self,
        bar: &Bar,
        ctx: &SignalContext,
    ) -> Result<Option<TargetSignal>, EngineError> {
        if self.anchor_slot.matches(bar) {
            self.anchor = Some(bar.close);
            self.limit_reached = false;
            info!(
                anchor = bar.close,
                bar = %bar.instant,
                short_level = self.short_level(bar.close, 1),
                long_level = self.long_level(bar.close, 1),
                "Anchor price set"
            );
        }

        if self.stop_slot.matches(bar) && self.anchor.take().is_some() {
            info!(bar = %bar.instant, "Trading window ended, anchor cleared");
        }

        if self.flatten_slot.matches(bar) {
            self.anchor = None;
            if ctx.position != 0 {
                info!(position = ctx.position, "Flatten time reached, closing position");
                return Ok(Some(TargetSignal::flatten(ctx.position)));
            }
        }

        Ok(None)
    }

    fn on_quote(&mut self, quote: &Quote, ctx: &SignalContext) -> Option<TargetSignal> {
        let anchor = self.anchor?;
        if !quote.is_valid() || !self.params.session.in_trading_period(ctx.now.time()) {
            return None;
        }
        let price = quote.reference_f64()?;
        let position = ctx.position;

        if (position > 0 && price > anchor) || (position < 0 && price < anchor) {
            info!(position, price, anchor, "Price crossed anchor, taking profit");
            self.limit_reached = false;
            return Some(TargetSignal::new(-position, TargetReason::TakeProfitAtAnchor));
        }

        let side = match self.breakout(anchor, price, position) {
            Some(side) => side,
            None => {
                self.limit_reached = false;
                return None;
            }
        };

        if position.abs() >= self.params.limit_pos {
            if !self.limit_reached {
                warn!(
                    position,
                    limit_pos = self.params.limit_pos,
                    price,
                    "Position limit reached, ignoring breakout"
                );
                self.limit_reached = true;
            }
            return None;
        }
        self.limit_reached = false;

        let level = self.level(position);
        let delta = match side {
            Breakout::Short => -self.params.trade_size,
            Breakout::Long => self.params.trade_size,
        };
        info!(
            position,
            price,
            anchor,
            level,
            delta,
            "Ladder breakout"
        );
        Some(TargetSignal::new(delta, TargetReason::LadderBreakout { level }))
    }

    fn boot_target(&mut self, quote: &Quote, ctx: &SignalContext) -> Option<TargetSignal> {
        let now = ctx.now.time();
        let in_session = self.params.session.in_trading_period(now);

        if !in_session {
            if ctx.position != 0 && self.params.flat_window().in_trading_period(now) {
                info!(
                    position = ctx.position,
                    "Position held outside trading window, flattening"
                );
                return Some(TargetSignal::flatten(ctx.position));
            }
            debug!(position = ctx.position, "Outside session, nothing to reconcile");
            return None;
        }

        let anchor = match self.anchor {
            Some(a) => a,
            None => {
                info!("No anchor yet, nothing to reconcile");
                return None;
            }
        };
        let price = quote.reference_f64()?;

        let mut implied = 0i64;
        while implied.abs() < self.params.limit_pos {
            match self.breakout(anchor, price, implied) {
                Some(Breakout::Short) => implied -= self.params.trade_size,
                Some(Breakout::Long) => implied += self.params.trade_size,
                None => break,
            }
        }

        let offset = implied - ctx.position;
        info!(
            anchor,
            price,
            implied,
            position = ctx.position,
            offset,
            "Boot ladder reconciliation"
        );
        (offset != 0).then(|| TargetSignal::new(offset, TargetReason::BootReconcile))
    }

    fn export_state(&self) -> SignalState {
        SignalState {
            anchor_price: self.anchor,
            limit_reached: self.limit_reached,
            ..SignalState::default()
        }
    }

    fn import_state(&mut self, state: SignalState) {
        self.anchor = state.anchor_price;
        self.limit_reached = state.limit_reached;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn engine() -> ReversionSignal {
        ReversionSignal::new(ReversionParams {
            session: TimeWindow::parse("14:35", "09:05").unwrap(),
            flatten_at: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            thre: 0.01,
            limit_pos: 6,
            trade_size: 2,
            bar_period: Duration::minutes(5),
        })
    }

    fn bar(instant: NaiveDateTime, close: f64) -> Bar {
        Bar {
            instant,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn quote(price: f64) -> Quote {
        let last = Decimal::from_f64(price).unwrap();
        Quote {
            instant: at(15, 0),
            bid_price: last - dec!(0.5),
            ask_price: last + dec!(0.5),
            last_price: Some(last),
        }
    }

    fn ctx(position: i64, now: NaiveDateTime) -> SignalContext {
        SignalContext { position, now }
    }

    fn anchored(anchor: f64) -> ReversionSignal {
        let mut e = engine();
        e.on_closed_bar(&bar(at(14, 30), anchor), &ctx(0, at(14, 35)))
            .unwrap();
        assert_eq!(e.anchor(), Some(anchor));
        e
    }

    #[test]
    fn ladder_adds_short_tranches_per_level() {
        let mut e = anchored(100.0);
        let now = at(15, 0);

        let sig = e.on_quote(&quote(103.0), &ctx(0, now)).unwrap();
        assert_eq!(sig.delta, -2);
        assert_eq!(sig.reason, TargetReason::LadderBreakout { level: 1 });

        let sig = e.on_quote(&quote(103.0), &ctx(-2, now)).unwrap();
        assert_eq!(sig.delta, -2);
        assert_eq!(sig.reason, TargetReason::LadderBreakout { level: 2 });

        // level 3 short threshold is 103
        assert_eq!(e.on_quote(&quote(103.0), &ctx(-4, now)), None);
    }

    #[test]
    fn long_breakout_below_anchor() {
        let mut e = anchored(100.0);
        let sig = e.on_quote(&quote(98.5), &ctx(0, at(15, 0))).unwrap();
        assert_eq!(sig.delta, 2);
    }

    #[test]
    fn position_limit_warns_once_and_stops() {
        let mut e = anchored(100.0);
        let now = at(15, 0);
        assert_eq!(e.on_quote(&quote(110.0), &ctx(-6, now)), None);
        assert!(e.limit_reached());
        assert_eq!(e.on_quote(&quote(111.0), &ctx(-6, now)), None);
        assert!(e.limit_reached());

        // back inside the band resets the latch
        assert_eq!(e.on_quote(&quote(100.5), &ctx(-6, now)), None);
        assert!(!e.limit_reached());
    }

    #[test]
    fn crossing_anchor_takes_profit() {
        let mut e = anchored(100.0);
        let sig = e.on_quote(&quote(99.9), &ctx(-4, at(15, 0))).unwrap();
        assert_eq!(sig.delta, 4);
        assert_eq!(sig.reason, TargetReason::TakeProfitAtAnchor);

        let sig = e.on_quote(&quote(100.1), &ctx(2, at(15, 0))).unwrap();
        assert_eq!(sig.delta, -2);
    }

    #[test]
    fn no_signal_without_anchor_or_outside_session() {
        let mut e = engine();
        assert_eq!(e.on_quote(&quote(150.0), &ctx(0, at(15, 0))), None);

        let mut e = anchored(100.0);
        assert_eq!(e.on_quote(&quote(150.0), &ctx(0, at(12, 0))), None);
    }

    #[test]
    fn stop_and_flatten_slots_clear_anchor() {
        let mut e = anchored(100.0);
        assert_eq!(
            e.on_closed_bar(&bar(at(9, 0), 101.0), &ctx(-2, at(9, 5)))
                .unwrap(),
            None
        );
        assert_eq!(e.anchor(), None);

        let sig = e
            .on_closed_bar(&bar(at(9, 25), 101.0), &ctx(-2, at(9, 30)))
            .unwrap()
            .unwrap();
        assert_eq!(sig.delta, 2);
        assert!(sig.is_flatten());
    }

    #[test]
    fn boot_walks_the_ladder_from_flat() {
        let mut e = anchored(100.0);
        // 103.5 clears levels 1 (101) and 2 (102) and 3 (103), capped at limit 6
        let sig = e.boot_target(&quote(103.5), &ctx(0, at(15, 0))).unwrap();
        assert_eq!(sig.delta, -6);
        assert_eq!(sig.reason, TargetReason::BootReconcile);

        let sig = e.boot_target(&quote(102.5), &ctx(-2, at(15, 0))).unwrap();
        assert_eq!(sig.delta, -2);

        assert_eq!(e.boot_target(&quote(100.5), &ctx(0, at(15, 0))), None);
    }

    #[test]
    fn boot_in_flat_window_flattens() {
        let mut e = engine();
        let sig = e.boot_target(&quote(100.0), &ctx(4, at(10, 0))).unwrap();
        assert_eq!(sig.delta, -4);
        assert!(sig.is_flatten());

        // between session end and flatten time nothing happens
        assert_eq!(e.boot_target(&quote(100.0), &ctx(4, at(9, 15))), None);
    }
}
