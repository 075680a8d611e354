//! Strategy controller
//!
//! Owns one instrument's signal engine, chase engine and venue handle, and routes the
//! serialized stream of bars, quotes and order events between them:
//! - warm-up on init, snapshot restore and order reconciliation on start
//! - boot reconciliation of the implied target against the live position on the
//!   first usable quote
//! - at most one pending target, gated by the trading window and the engine's busy
//!   policy
//! - snapshot + audit trail written whenever state changes

pub mod runner;

pub use runner::{spawn_strategy, StrategyEvent};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::execution::{ChaseParams, ChaseState, OrderChaseEngine};
use crate::feed::BarHistory;
use crate::persistence::{saved_now, AuditTrail, SnapshotStore, StrategySnapshot, SNAPSHOT_VERSION};
use crate::signal::{build_signal_engine, BusyPolicy, SignalContext, SignalEngine, SignalState};
use crate::types::{Bar, OrderId, OrderState, OrderStatus, Quote, TargetSignal};
use crate::venue::Venue;

/// Counters for the end-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub bars: u64,
    pub quotes: u64,
    pub targets: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub suppressed: u64,
    pub transitions: u64,
}

pub struct StrategyController<V: Venue> {
    instrument: String,
    signal: Box<dyn SignalEngine>,
    chase: OrderChaseEngine,
    venue: V,
    store: Option<SnapshotStore>,
    audit: Option<AuditTrail>,
    position: i64,
    pending: Option<TargetSignal>,
    last_target: Option<TargetSignal>,
    last_bar_at: Option<NaiveDateTime>,
    /// Warm-up bars kept for replay on top of a restored snapshot
    warmup: Vec<Bar>,
    boot_pending: bool,
    last_saved: Option<StrategySnapshot>,
    stats: ControllerStats,
}

impl<V: Venue> StrategyController<V> {
    pub fn new(
        instrument: impl Into<String>,
        signal: Box<dyn SignalEngine>,
        chase: OrderChaseEngine,
        venue: V,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            signal,
            chase,
            venue,
            store: None,
            audit: None,
            position: 0,
            pending: None,
            last_target: None,
            last_bar_at: None,
            warmup: Vec::new(),
            boot_pending: false,
            last_saved: None,
            stats: ControllerStats::default(),
        }
    }

    pub fn from_config(config: &AppConfig, venue: V) -> Result<Self, EngineError> {
        config.validate()?;
        let signal = build_signal_engine(&config.strategy)?;
        let chase = OrderChaseEngine::new(
            config.instrument.symbol.clone(),
            ChaseParams::from_config(&config.execution),
        );
        Ok(Self::new(config.instrument.symbol.clone(), signal, chase, venue))
    }

    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn pending_target(&self) -> Option<TargetSignal> {
        self.pending
    }

    pub fn last_target(&self) -> Option<TargetSignal> {
        self.last_target
    }

    pub fn chase_state(&self) -> &ChaseState {
        self.chase.state()
    }

    pub fn signal_state(&self) -> SignalState {
        self.signal.export_state()
    }

    pub fn is_halted(&self) -> bool {
        self.chase.is_halted()
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    pub fn venue_mut(&mut self) -> &mut V {
        &mut self.venue
    }

    fn context(&self) -> SignalContext {
        SignalContext {
            position: self.position,
            now: self.venue.now(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Fetch and replay warm-up history. Signals produced here are discarded.
    pub async fn on_init(&mut self, history: &dyn BarHistory) -> Result<()> {
        let days = self.signal.warmup_days();
        let mut bars = history
            .get_closed_bars(&self.instrument, days)
            .await
            .context("Failed to fetch warm-up bars")?;
        bars.sort_by_key(|b| b.instant);

        for bar in &bars {
            self.feed_warmup(bar);
        }
        self.last_bar_at = bars.last().map(|b| b.instant);
        info!(
            instrument = %self.instrument,
            strategy = self.signal.name(),
            lookback_days = days,
            bars = bars.len(),
            "🔥 Warm-up complete"
        );
        self.warmup = bars;
        Ok(())
    }

    fn feed_warmup(&mut self, bar: &Bar) {
        let ctx = SignalContext {
            position: 0,
            now: bar.close_instant(self.signal.bar_period()),
        };
        match self.signal.on_closed_bar(bar, &ctx) {
            Ok(Some(t)) => debug!(bar = %bar.instant, delta = t.delta, reason = %t.reason, "Warm-up signal discarded"),
            Ok(None) => {}
            Err(e) => debug!(bar = %bar.instant, error = %e, "Warm-up bar skipped"),
        }
    }

    /// Load the venue position, restore the snapshot and reconcile orders
    pub fn on_start(&mut self) -> Result<()> {
        self.position = self
            .venue
            .get_position(&self.instrument)
            .map_err(EngineError::from)
            .context("Failed to read venue position")?;

        let snapshot = match &self.store {
            Some(store) => store.load()?,
            None => None,
        };
        match snapshot {
            Some(snap) if snap.instrument == self.instrument => self.restore(snap),
            Some(snap) => warn!(
                saved = %snap.instrument,
                configured = %self.instrument,
                "Snapshot belongs to another instrument, ignoring"
            ),
            None => {}
        }

        self.cancel_orphans();
        self.boot_pending = true;
        info!(
            instrument = %self.instrument,
            position = self.position,
            chase_state = %self.chase.state(),
            "🚀 Strategy started, reconciling on first quote"
        );
        self.drain_venue()?;
        self.flush();
        Ok(())
    }

    fn restore(&mut self, snap: StrategySnapshot) {
        self.signal.import_state(snap.signal);
        self.last_target = snap.last_target;

        let resume_after = snap.last_bar_at;
        let newer: Vec<Bar> = self
            .warmup
            .iter()
            .filter(|b| resume_after.map_or(true, |t| b.instant > t))
            .cloned()
            .collect();
        for bar in &newer {
            self.feed_warmup(bar);
        }
        self.last_bar_at = newer.last().map(|b| b.instant).or(resume_after);
        info!(
            saved_at = %snap.saved_at,
            replayed = newer.len(),
            "Signal state restored from snapshot"
        );

        if let Some(remainder) = self.chase.restore(snap.chase_state, &mut self.venue) {
            self.accept_target(remainder);
        }
    }

    /// Cancel venue orders this engine does not own
    fn cancel_orphans(&mut self) {
        let orphans: Vec<OrderId> = self
            .venue
            .get_active_order_ids()
            .into_iter()
            .filter(|id| !self.chase.owns(id))
            .collect();
        for id in orphans {
            warn!(order_id = %id, "Cancelling orphan order");
            self.venue.cancel_order(&id);
            self.chase.ignore_order(id);
        }
    }

    pub fn on_stop(&mut self) -> Result<()> {
        info!(
            instrument = %self.instrument,
            position = self.position,
            chase_state = %self.chase.state(),
            "🛑 Stopping, cancelling all orders"
        );
        self.venue.cancel_all();
        if let Err(e) = self.drain_venue() {
            warn!(error = %e, "Venue error while stopping");
        }
        self.flush();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn on_bar(&mut self, bar: &Bar) -> Result<(), EngineError> {
        if let Some(last) = self.last_bar_at {
            if bar.instant <= last {
                debug!(bar = %bar.instant, last = %last, "Bar already processed");
                return Ok(());
            }
        }
        self.last_bar_at = Some(bar.instant);
        self.stats.bars += 1;

        let ctx = self.context();
        match self.signal.on_closed_bar(bar, &ctx) {
            Ok(Some(target)) => self.accept_target(target),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(bar = %bar.instant, error = %e, "Bar skipped"),
        }
        self.flush();
        Ok(())
    }

    pub fn on_tick(&mut self, quote: &Quote) -> Result<(), EngineError> {
        self.stats.quotes += 1;
        if self.chase.is_halted() {
            // no new orders, but fills on the order held at halt still count
            if let Err(e) = self.drain_venue() {
                debug!(error = %e, "Venue still unavailable while halted");
            }
            self.flush();
            return Ok(());
        }
        self.venue.observe_quote(quote);
        self.drain_venue()?;
        self.refresh_position()?;

        let handed_back = self.chase.on_quote(quote, &mut self.venue);
        self.absorb(handed_back)?;
        self.drain_venue()?;

        if self.boot_pending && self.chase.is_idle() && quote.is_valid() {
            self.boot_pending = false;
            let ctx = self.context();
            match self.signal.boot_target(quote, &ctx) {
                Some(target) => {
                    info!(delta = target.delta, position = self.position, "Boot reconciliation target");
                    self.accept_target(target);
                }
                None => info!(position = self.position, "Boot reconciliation: position consistent"),
            }
        }

        if !self.boot_pending && self.chase.is_idle() && self.pending.is_none() {
            let ctx = self.context();
            if let Some(target) = self.signal.on_quote(quote, &ctx) {
                self.accept_target(target);
            }
        }

        self.dispatch(quote)?;
        self.drain_venue()?;
        self.flush();
        Ok(())
    }

    pub fn on_order_update(&mut self, update: &OrderState) -> Result<(), EngineError> {
        self.handle_order_update(update)?;
        self.drain_venue()?;
        self.flush();
        Ok(())
    }

    /// Venue connectivity lost: halt new orders, keep state queryable
    pub fn on_disconnect(&mut self, reason: &str) {
        self.chase.halt(self.venue.now(), reason);
        self.flush();
    }

    fn handle_order_update(&mut self, update: &OrderState) -> Result<(), EngineError> {
        let res = self.chase.on_order_update(update, &mut self.venue);
        if matches!(
            update.status,
            OrderStatus::Filled | OrderStatus::PartiallyFilled
        ) {
            self.refresh_position()?;
        }
        self.absorb(res)
    }

    /// Process events queued by in-process adapters
    fn drain_venue(&mut self) -> Result<(), EngineError> {
        loop {
            let events = self.venue.poll_events();
            if events.is_empty() {
                return Ok(());
            }
            for event in &events {
                self.handle_order_update(event)?;
            }
        }
    }

    fn refresh_position(&mut self) -> Result<(), EngineError> {
        match self.venue.get_position(&self.instrument) {
            Ok(position) => {
                if position != self.position {
                    debug!(from = self.position, to = position, "Position updated");
                    self.position = position;
                }
                Ok(())
            }
            Err(e) => {
                let err = EngineError::from(e);
                self.chase.halt(self.venue.now(), &err.to_string());
                self.flush();
                Err(err)
            }
        }
    }

    /// Fold a chase engine result back into controller state
    fn absorb(&mut self, res: Result<Option<TargetSignal>, EngineError>) -> Result<(), EngineError> {
        match res {
            Ok(Some(target)) => {
                self.accept_target(target);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(EngineError::UnknownOrder(id)) => {
                warn!(order_id = %id, "Ignoring event for unknown order");
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.chase.halt(self.venue.now(), &e.to_string());
                self.flush();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Recoverable chase error");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    fn accept_target(&mut self, target: TargetSignal) {
        self.last_target = Some(target);
        self.stats.targets += 1;
        info!(
            delta = target.delta,
            reason = %target.reason,
            position = self.position,
            chase_state = %self.chase.state(),
            "🎯 Target received"
        );

        if !self.chase.is_idle() {
            match self.signal.busy_policy() {
                BusyPolicy::Queue => {}
                BusyPolicy::DropUnlessFlatten if target.is_flatten() => {
                    self.chase
                        .force_cancel(&format!("{} overrides working order", target.reason), &mut self.venue);
                }
                BusyPolicy::DropUnlessFlatten => {
                    info!(reason = %target.reason, "Order still working, target dropped");
                    self.stats.dropped += 1;
                    return;
                }
            }
        }

        match self.pending {
            Some(existing) if existing.is_flatten() && !target.is_flatten() => {
                info!(reason = %target.reason, "Flatten pending, target dropped");
                self.stats.dropped += 1;
            }
            Some(existing) => {
                info!(old = %existing.reason, new = %target.reason, "Pending target superseded");
                self.pending = Some(target);
            }
            None => self.pending = Some(target),
        }
    }

    /// Hand the pending target to an idle chase engine
    fn dispatch(&mut self, quote: &Quote) -> Result<(), EngineError> {
        let Some(target) = self.pending else {
            return Ok(());
        };
        if !self.chase.is_idle() {
            return Ok(());
        }

        // Flatten closes whatever is held now, not what was held when it was emitted
        let delta = if target.is_flatten() {
            -self.position
        } else {
            target.delta
        };
        if delta == 0 {
            debug!(reason = %target.reason, "Target already satisfied");
            self.pending = None;
            return Ok(());
        }

        let now = self.venue.now();
        if !target.reason.is_risk_reducing()
            && !self.signal.trading_window().in_trading_period(now.time())
        {
            let err = EngineError::SessionViolation(now.time());
            warn!(
                error = %err,
                reason = %target.reason,
                delta,
                window = %self.signal.trading_window(),
                "Target suppressed outside trading window"
            );
            self.pending = None;
            self.stats.suppressed += 1;
            return Ok(());
        }

        let order_target = TargetSignal::new(delta, target.reason);
        match self.chase.on_target(&order_target, quote, &mut self.venue) {
            Ok(retry) => {
                if retry.is_none() && !self.chase.is_idle() {
                    self.stats.dispatched += 1;
                }
                self.pending = retry;
                Ok(())
            }
            Err(e @ (EngineError::StaleQuote { .. } | EngineError::SessionViolation(_))) => {
                debug!(error = %e, "Target kept pending");
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.flush();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Target dispatch failed");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            version: SNAPSHOT_VERSION,
            instrument: self.instrument.clone(),
            signal: self.signal.export_state(),
            chase_state: self.chase.state().clone(),
            last_target: self.last_target,
            last_bar_at: self.last_bar_at,
            saved_at: saved_now(),
        }
    }

    /// Write audit rows and, if anything changed, the snapshot
    fn flush(&mut self) {
        let records = self.chase.drain_journal();
        self.stats.transitions += records.len() as u64;
        if let Some(audit) = &mut self.audit {
            if let Err(e) = audit.append(&records) {
                warn!(error = %e, "Failed to append audit rows");
            }
        }

        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.snapshot();
        if self
            .last_saved
            .as_ref()
            .map_or(false, |saved| saved.same_state(&snapshot))
        {
            return;
        }
        match store.save(&snapshot) {
            Ok(()) => self.last_saved = Some(snapshot),
            Err(e) => warn!(error = %e, "Failed to save snapshot"),
        }
    }
}
