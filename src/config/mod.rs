//! Configuration management for ChaseBot
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::EngineError;
use crate::session::parse_time_of_day;

/// Upper bound for `execution.chase_interval_secs` (one day)
pub const MAX_CHASE_INTERVAL_SECS: u64 = 86_400;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub strategy: StrategyConfig,
    pub execution: ExecutionConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    /// Venue symbol of the single traded instrument
    pub symbol: String,
}

/// Which signal engine drives the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Momentum,
    Reversion,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Momentum => write!(f, "momentum"),
            StrategyKind::Reversion => write!(f, "reversion"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub momentum: MomentumConfig,
    pub reversion: ReversionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MomentumConfig {
    /// Session open, "HH:MM[:SS]"
    pub open_time: String,
    /// Session close, "HH:MM[:SS]"
    pub close_time: String,
    /// Number of session-open closes in the rolling window
    pub window: usize,
    /// z-score threshold
    pub thre: f64,
    /// Contracts per entry
    pub fixed_size: i64,
    pub bar_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReversionConfig {
    pub trading_start_time: String,
    pub trading_end_time: String,
    /// Time at which any leftover position is closed
    pub close_all_position_time: String,
    /// Ladder spacing as a fraction of the anchor
    pub thre: f64,
    /// Absolute position cap
    pub limit_pos: i64,
    /// Contracts per ladder level
    pub trade_size: i64,
    pub bar_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Price improvement over the touch when placing (non-negative)
    pub algo_limit_place: Decimal,
    /// Drift tolerance before a resting order is chased (non-negative)
    pub algo_limit_spread: Decimal,
    /// Seconds without a fill before an order counts as stalled
    pub chase_interval_secs: u64,
    /// Consecutive venue rejects after which a remainder is dropped
    pub max_consecutive_rejects: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Snapshot file name inside `data_dir`
    pub snapshot_file: String,
    /// Audit CSV file name inside `data_dir`
    pub audit_csv: String,
}

impl PersistenceConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.snapshot_file)
    }

    pub fn audit_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.audit_csv)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when RUST_LOG is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("instrument.symbol", "rb2410")?
            .set_default("strategy.kind", "momentum")?
            // Momentum defaults
            .set_default("strategy.momentum.open_time", "10:30:00")?
            .set_default("strategy.momentum.close_time", "22:30:00")?
            .set_default("strategy.momentum.window", 23)?
            .set_default("strategy.momentum.thre", 1.2)?
            .set_default("strategy.momentum.fixed_size", 5)?
            .set_default("strategy.momentum.bar_minutes", 30)?
            // Reversion defaults
            .set_default("strategy.reversion.trading_start_time", "14:35:00")?
            .set_default("strategy.reversion.trading_end_time", "09:05:00")?
            .set_default("strategy.reversion.close_all_position_time", "09:30:00")?
            .set_default("strategy.reversion.thre", 0.01)?
            .set_default("strategy.reversion.limit_pos", 6)?
            .set_default("strategy.reversion.trade_size", 2)?
            .set_default("strategy.reversion.bar_minutes", 5)?
            // Execution defaults
            .set_default("execution.algo_limit_place", "0.0")?
            .set_default("execution.algo_limit_spread", "1.0")?
            .set_default("execution.chase_interval_secs", 20)?
            .set_default("execution.max_consecutive_rejects", 3)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.snapshot_file", "snapshot.json")?
            .set_default("persistence.audit_csv", "audit.csv")?
            // Logging defaults
            .set_default("logging.filter", "info,chasebot=debug")?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (CHASEBOT_*)
            .add_source(Environment::with_prefix("CHASEBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Reject values the engines cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.instrument.symbol.trim().is_empty() {
            return Err(EngineError::Config("instrument.symbol is empty".into()));
        }

        let m = &self.strategy.momentum;
        parse_time_of_day(&m.open_time)?;
        parse_time_of_day(&m.close_time)?;
        let r = &self.strategy.reversion;
        parse_time_of_day(&r.trading_start_time)?;
        parse_time_of_day(&r.trading_end_time)?;
        parse_time_of_day(&r.close_all_position_time)?;

        // Only the selected engine's numeric parameters must be usable
        match self.strategy.kind {
            StrategyKind::Momentum => {
                crate::signal::MomentumParams::from_config(m)?;
            }
            StrategyKind::Reversion => {
                crate::signal::ReversionParams::from_config(r)?;
            }
        }

        let e = &self.execution;
        if e.algo_limit_place.is_sign_negative() {
            return Err(EngineError::Config(format!(
                "execution.algo_limit_place must be non-negative, got {}",
                e.algo_limit_place
            )));
        }
        if e.algo_limit_spread.is_sign_negative() {
            return Err(EngineError::Config(format!(
                "execution.algo_limit_spread must be non-negative, got {}",
                e.algo_limit_spread
            )));
        }
        if e.chase_interval_secs == 0 || e.chase_interval_secs > MAX_CHASE_INTERVAL_SECS {
            return Err(EngineError::Config(format!(
                "execution.chase_interval_secs must be within 1..={}, got {}",
                MAX_CHASE_INTERVAL_SECS, e.chase_interval_secs
            )));
        }
        if e.max_consecutive_rejects == 0 {
            return Err(EngineError::Config(
                "execution.max_consecutive_rejects must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Generate a one-line digest of the config for logging
    pub fn digest(&self) -> String {
        let params = match self.strategy.kind {
            StrategyKind::Momentum => {
                let m = &self.strategy.momentum;
                format!(
                    "session={}-{} window={} thre={} size={}",
                    m.open_time, m.close_time, m.window, m.thre, m.fixed_size
                )
            }
            StrategyKind::Reversion => {
                let r = &self.strategy.reversion;
                format!(
                    "session={}-{} flat_at={} thre={} trade={} limit={}",
                    r.trading_start_time,
                    r.trading_end_time,
                    r.close_all_position_time,
                    r.thre,
                    r.trade_size,
                    r.limit_pos
                )
            }
        };
        format!(
            "instrument={} strategy={} {} place={} spread={} chase={}s",
            self.instrument.symbol,
            self.strategy.kind,
            params,
            self.execution.algo_limit_place,
            self.execution.algo_limit_spread,
            self.execution.chase_interval_secs
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> AppConfig {
        AppConfig {
            instrument: InstrumentConfig {
                symbol: "rb2410".into(),
            },
            strategy: StrategyConfig {
                kind: StrategyKind::Reversion,
                momentum: MomentumConfig {
                    open_time: "10:30:00".into(),
                    close_time: "22:30:00".into(),
                    window: 23,
                    thre: 1.2,
                    fixed_size: 5,
                    bar_minutes: 30,
                },
                reversion: ReversionConfig {
                    trading_start_time: "14:35:00".into(),
                    trading_end_time: "09:05:00".into(),
                    close_all_position_time: "09:30:00".into(),
                    thre: 0.01,
                    limit_pos: 6,
                    trade_size: 2,
                    bar_minutes: 5,
                },
            },
            execution: ExecutionConfig {
                algo_limit_place: dec!(0.0),
                algo_limit_spread: dec!(1.0),
                chase_interval_secs: 20,
                max_consecutive_rejects: 3,
            },
            persistence: PersistenceConfig {
                data_dir: "./data".into(),
                snapshot_file: "snapshot.json".into(),
                audit_csv: "audit.csv".into(),
            },
            logging: LoggingConfig {
                filter: "info".into(),
                json: false,
            },
        }
    }

    #[test]
    fn defaults_validate() {
        let cfg = sample();
        assert!(cfg.validate().is_ok());
        assert!(cfg.digest().contains("strategy=reversion"));
        assert!(cfg.digest().contains("place=0.0 spread=1.0 chase=20s"));
    }

    #[test]
    fn bad_time_is_rejected() {
        let mut cfg = sample();
        cfg.strategy.reversion.trading_end_time = "9h05".into();
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn limit_below_trade_size_is_rejected() {
        let mut cfg = sample();
        cfg.strategy.reversion.limit_pos = 1;
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn negative_offsets_are_rejected() {
        let mut cfg = sample();
        cfg.execution.algo_limit_spread = dec!(-0.5);
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn chase_interval_outside_bounds_is_rejected() {
        let mut cfg = sample();
        cfg.execution.chase_interval_secs = MAX_CHASE_INTERVAL_SECS;
        assert!(cfg.validate().is_ok());

        cfg.execution.chase_interval_secs = MAX_CHASE_INTERVAL_SECS + 1;
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));

        cfg.execution.chase_interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn non_positive_momentum_window_is_rejected() {
        let mut cfg = sample();
        cfg.strategy.kind = StrategyKind::Momentum;
        cfg.strategy.momentum.window = 0;
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }
}
