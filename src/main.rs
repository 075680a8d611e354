//! ChaseBot replay runner
//!
//! Loads configuration, replays `bars.csv` / `quotes.csv` from the data directory
//! against the paper venue and logs a summary.

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chasebot::config::{AppConfig, LoggingConfig, StrategyKind};
use chasebot::feed::{CsvReplay, ReplayItem};
use chasebot::persistence::{AuditTrail, SnapshotStore};
use chasebot::strategy::{spawn_strategy, StrategyController, StrategyEvent};
use chasebot::venue::PaperVenue;

fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set global tracing subscriber: {}", e))?;
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set global tracing subscriber: {}", e))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("🤖 Starting ChaseBot");
    info!("Config: {}", config);
    config
        .validate()
        .context("Configuration validation failed")?;

    let bar_minutes = match config.strategy.kind {
        StrategyKind::Momentum => config.strategy.momentum.bar_minutes,
        StrategyKind::Reversion => config.strategy.reversion.bar_minutes,
    };
    let replay = CsvReplay::load(
        &config.persistence.data_dir,
        Duration::minutes(i64::from(bar_minutes)),
    )?;

    let venue = PaperVenue::new(config.instrument.symbol.clone());
    let mut controller = StrategyController::from_config(&config, venue)?
        .with_store(SnapshotStore::new(config.persistence.snapshot_path()))
        .with_audit(AuditTrail::open(config.persistence.audit_path())?);

    controller.on_init(&replay).await?;
    controller.on_start()?;

    let (tx, rx) = mpsc::channel(1024);
    let handle = spawn_strategy(controller, rx);

    let feed = async {
        for (_, item) in replay.events() {
            let event = match item {
                ReplayItem::Bar(bar) => StrategyEvent::Bar(bar),
                ReplayItem::Quote(quote) => StrategyEvent::Quote(quote),
            };
            tx.send(event)
                .await
                .context("Strategy task stopped early")?;
        }
        Ok::<(), anyhow::Error>(())
    };
    tokio::select! {
        res = feed => res?,
        _ = tokio::signal::ctrl_c() => warn!("⚠️ Ctrl-C received, stopping replay early"),
    }
    tx.send(StrategyEvent::Shutdown)
        .await
        .context("Strategy task stopped early")?;

    let controller = handle.await.context("Strategy task panicked")?;
    let stats = controller.stats();
    info!("═══════════════════════════════════════════");
    info!("📊 REPLAY SUMMARY [{}]", controller.instrument());
    info!("  Bars processed:      {}", stats.bars);
    info!("  Quotes processed:    {}", stats.quotes);
    info!("  Targets emitted:     {}", stats.targets);
    info!("  Orders dispatched:   {}", stats.dispatched);
    info!("  Targets dropped:     {}", stats.dropped);
    info!("  Targets suppressed:  {}", stats.suppressed);
    info!("  Chase transitions:   {}", stats.transitions);
    info!("  Final position:      {}", controller.position());
    info!("  Final chase state:   {}", controller.chase_state());
    info!("  Halted:              {}", controller.is_halted());
    info!("═══════════════════════════════════════════");
    Ok(())
}
