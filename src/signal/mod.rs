//! Signal engines
//!
//! Turn closed bars (and, for some variants, idle quotes) into target deltas.
//! Two interchangeable variants share the `SignalEngine` trait:
//! - `MomentumSignal`: z-score of the session-open close against a rolling window
//! - `ReversionSignal`: multi-level ladder around an anchor captured at session start

mod momentum;
mod reversion;
mod window;

pub use momentum::{MomentumParams, MomentumSignal};
pub use reversion::{ReversionParams, ReversionSignal};
pub use window::PriceWindow;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::{StrategyConfig, StrategyKind};
use crate::error::EngineError;
use crate::session::TimeWindow;
use crate::types::{Bar, Quote, TargetSignal};

/// What the controller does with a target that arrives while an order is being worked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Hold it until the chase engine is idle again
    Queue,
    /// Drop it, except flatten targets which force-cancel the working order
    DropUnlessFlatten,
}

/// Inputs shared by every signal callback
#[derive(Debug, Clone, Copy)]
pub struct SignalContext {
    /// Venue-reported position
    pub position: i64,
    /// Venue clock
    pub now: NaiveDateTime,
}

/// Restart-relevant signal state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalState {
    #[serde(default)]
    pub price_window: Option<PriceWindow>,
    #[serde(default)]
    pub anchor_price: Option<f64>,
    /// Position change decided for the current session
    #[serde(default)]
    pub session_target: i64,
    /// Boot offset waiting for a favourable price
    #[serde(default)]
    pub deferred_offset: i64,
    #[serde(default)]
    pub last_z_score: Option<f64>,
    #[serde(default)]
    pub limit_reached: bool,
}

pub trait SignalEngine: Send {
    fn name(&self) -> &'static str;

    /// Window in which new exposure may be opened
    fn trading_window(&self) -> TimeWindow;

    fn busy_policy(&self) -> BusyPolicy;

    fn bar_period(&self) -> Duration;

    /// Calendar days of history needed to warm up
    fn warmup_days(&self) -> u32;

    /// Process a closed bar
    fn on_closed_bar(
        &mut self,
        bar: &Bar,
        ctx: &SignalContext,
    ) -> Result<Option<TargetSignal>, EngineError>;

    /// Process a quote while no order is being worked
    fn on_quote(&mut self, quote: &Quote, ctx: &SignalContext) -> Option<TargetSignal>;

    /// Target implied by restored state, reconciled against the live position
    fn boot_target(&mut self, quote: &Quote, ctx: &SignalContext) -> Option<TargetSignal>;

    fn export_state(&self) -> SignalState;

    fn import_state(&mut self, state: SignalState);
}

/// Build the configured engine
pub fn build_signal_engine(config: &StrategyConfig) -> Result<Box<dyn SignalEngine>, EngineError> {
    match config.kind {
        StrategyKind::Momentum => Ok(Box::new(MomentumSignal::new(
            MomentumParams::from_config(&config.momentum)?,
        ))),
        StrategyKind::Reversion => Ok(Box::new(ReversionSignal::new(
            ReversionParams::from_config(&config.reversion)?,
        ))),
    }
}
