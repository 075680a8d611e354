//! Time-of-day momentum
//!
//! Once per session, at the bar closing on the session-open slot, the close is pushed
//! into a rolling window and scored against it. `z < thre` opens a long of
//! `fixed_size`, `z > thre` a short, equality leaves the book alone. The bar closing
//! on the session-close slot flattens whatever is held.

use chrono::{Duration, NaiveTime};
use tracing::{debug, info, warn};

use super::{BusyPolicy, PriceWindow, SignalContext, SignalEngine, SignalState};
use crate::config::MomentumConfig;
use crate::error::EngineError;
use crate::session::{parse_time_of_day, BarSlot, TimeWindow};
use crate::types::{Bar, Quote, TargetReason, TargetSignal};

#[derive(Debug, Clone)]
pub struct MomentumParams {
    pub session: TimeWindow,
    pub window: usize,
    pub thre: f64,
    pub fixed_size: i64,
    pub bar_period: Duration,
}

impl MomentumParams {
    pub fn from_config(cfg: &MomentumConfig) -> Result<Self, EngineError> {
        if cfg.window < 2 {
            return Err(EngineError::Config(format!(
                "momentum.window must be at least 2, got {}",
                cfg.window
            )));
        }
        if !(cfg.thre.is_finite() && cfg.thre > 0.0) {
            return Err(EngineError::Config(format!(
                "momentum.thre must be positive, got {}",
                cfg.thre
            )));
        }
        if cfg.fixed_size <= 0 {
            return Err(EngineError::Config(format!(
                "momentum.fixed_size must be positive, got {}",
                cfg.fixed_size
            )));
        }
        if cfg.bar_minutes == 0 {
            return Err(EngineError::Config("momentum.bar_minutes must be positive".into()));
        }
        Ok(Self {
            session: TimeWindow::new(
                parse_time_of_day(&cfg.open_time)?,
                parse_time_of_day(&cfg.close_time)?,
            ),
            window: cfg.window,
            thre: cfg.thre,
            fixed_size: cfg.fixed_size,
            bar_period: Duration::minutes(i64::from(cfg.bar_minutes)),
        })
    }
}

pub struct MomentumSignal {
    params: MomentumParams,
    open_slot: BarSlot,
    close_slot: BarSlot,
    window: PriceWindow,
    /// Close of the latest session-open bar
    snap_price: Option<f64>,
    session_target: i64,
    deferred_offset: i64,
    last_z_score: Option<f64>,
}

impl MomentumSignal {
    pub fn new(params: MomentumParams) -> Self {
        Self {
            open_slot: BarSlot::new(params.session.start, params.bar_period),
            close_slot: BarSlot::new(params.session.end, params.bar_period),
            window: PriceWindow::new(params.window),
            snap_price: None,
            session_target: 0,
            deferred_offset: 0,
            last_z_score: None,
            params,
        }
    }

    pub fn window(&self) -> &PriceWindow {
        &self.window
    }

    pub fn session_target(&self) -> i64 {
        self.session_target
    }

    pub fn deferred_offset(&self) -> i64 {
        self.deferred_offset
    }

    fn on_session_open(&mut self, bar: &Bar) -> Result<Option<TargetSignal>, EngineError> {
        self.window.push(bar.close);
        self.snap_price = Some(bar.close);
        debug!(
            bar = %bar.instant,
            close = bar.close,
            count = self.window.len(),
            "Session-open bar pushed into window"
        );

        if self.window.len() < self.params.window {
            info!(
                count = self.window.len(),
                required = self.params.window,
                "Window not yet full, no momentum signal"
            );
            self.session_target = 0;
            return Ok(None);
        }

        let z = match self.window.z_score() {
            Ok(z) => z,
            Err(e) => {
                self.session_target = 0;
                self.last_z_score = None;
                return Err(e);
            }
        };
        self.last_z_score = Some(z);
        info!(
            z_score = z,
            mean = self.window.mean().unwrap_or_default(),
            stddev = self.window.sample_std().unwrap_or_default(),
            close = bar.close,
            thre = self.params.thre,
            "Momentum z-score computed"
        );

        let delta = if z < self.params.thre {
            self.params.fixed_size
        } else if z > self.params.thre {
            -self.params.fixed_size
        } else {
            0
        };
        self.session_target = delta;

        if delta == 0 {
            info!(z_score = z, "z-score equals threshold, no position change");
            return Ok(None);
        }
        Ok(Some(TargetSignal::new(
            delta,
            TargetReason::MomentumEntry { z_score: z },
        )))
    }

    fn favourable(&self, offset: i64, price: f64) -> bool {
        match self.snap_price {
            Some(snap) if offset > 0 => price < snap,
            Some(snap) if offset < 0 => price > snap,
            Some(_) => false,
            None => true,
        }
    }

    fn now_in_session(&self, ctx: &SignalContext) -> bool {
        self.params.session.in_trading_period(ctx.now.time())
    }
}

impl SignalEngine for MomentumSignal {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn trading_window(&self) -> TimeWindow {
        self.params.session
    }

    fn busy_policy(&self) -> BusyPolicy {
        BusyPolicy::DropUnlessFlatten
    }

    fn bar_period(&self) -> Duration {
        self.params.bar_period
    }

    fn warmup_days(&self) -> u32 {
        // one sample per trading day; pad for weekends
        let days = self.params.window as u32 + 1;
        days + days * 2 / 5 + 2
    }

    fn on_closed_bar(
        &mut self,
        bar: &Bar,
        ctx: &SignalContext,
    ) -> Result<Option<TargetSignal>, EngineError> {
        let mut signal = None;

        if self.open_slot.matches(bar) {
            signal = self.on_session_open(bar)?;
        }

        if self.close_slot.matches(bar) {
            if signal.is_some() {
                warn!("Session-close slot overrides the concurrent momentum entry");
            }
            self.session_target = 0;
            self.deferred_offset = 0;
            info!(
                position = ctx.position,
                close_time = %self.params.session.end.format("%H:%M"),
                "Session close, flattening"
            );
            signal = Some(TargetSignal::flatten(ctx.position));
        }

        Ok(signal)
    }

    fn on_quote(&mut self, quote: &Quote, ctx: &SignalContext) -> Option<TargetSignal> {
        if self.deferred_offset == 0 || !quote.is_valid() || !self.now_in_session(ctx) {
            return None;
        }
        let price = quote.reference_f64()?;
        if !self.favourable(self.deferred_offset, price) {
            return None;
        }
        let delta = std::mem::take(&mut self.deferred_offset);
        info!(
            delta,
            price,
            snap_price = self.snap_price.unwrap_or_default(),
            "Price turned favourable, releasing deferred offset"
        );
        Some(TargetSignal::new(delta, TargetReason::DeferredOffset))
    }

    fn boot_target(&mut self, quote: &Quote, ctx: &SignalContext) -> Option<TargetSignal> {
        let now: NaiveTime = ctx.now.time();

        if ctx.position != 0 && self.params.session.in_close_period(now) {
            info!(
                position = ctx.position,
                "Outstanding position outside trading period, flattening"
            );
            return Some(TargetSignal::flatten(ctx.position));
        }

        if !self.params.session.in_trading_period(now) || ctx.position != 0 {
            info!(position = ctx.position, "Position unchanged at boot");
            return None;
        }

        let offset = self.session_target - ctx.position;
        if offset == 0 {
            info!("Position unchanged at boot, no further action");
            return None;
        }

        let price = match quote.reference_f64() {
            Some(p) => p,
            None => {
                warn!(offset, "No usable price at boot, deferring offset");
                self.deferred_offset = offset;
                return None;
            }
        };

        if self.favourable(offset, price) {
            info!(
                offset,
                price,
                snap_price = self.snap_price.unwrap_or_default(),
                "Applying boot offset"
            );
            Some(TargetSignal::new(offset, TargetReason::BootReconcile))
        } else {
            info!(
                offset,
                price,
                snap_price = self.snap_price.unwrap_or_default(),
                "Price not favourable for boot offset, deferring"
            );
            self.deferred_offset = offset;
            None
        }
    }

    fn export_state(&self) -> SignalState {
        SignalState {
            price_window: Some(self.window.clone()),
            anchor_price: self.snap_price,
            session_target: self.session_target,
            deferred_offset: self.deferred_offset,
            last_z_score: self.last_z_score,
            limit_reached: false,
        }
    }

    fn import_state(&mut self, state: SignalState) {
        self.window = match state.price_window {
            Some(w) if w.capacity() == self.params.window => w,
            Some(w) => {
                warn!(
                    saved = w.capacity(),
                    configured = self.params.window,
                    "Saved window capacity differs from configuration, re-windowing"
                );
                let mut resized = PriceWindow::new(self.params.window);
                for c in w.closes() {
                    resized.push(c);
                }
                resized
            }
            None => PriceWindow::new(self.params.window),
        };
        self.snap_price = state.anchor_price;
        self.session_target = state.session_target;
        self.deferred_offset = state.deferred_offset;
        self.last_z_score = state.last_z_score;
    }
}
