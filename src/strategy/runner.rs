//! Per-instrument event loop
//!
//! Bars, quotes, order events and connectivity changes for one instrument arrive on a
//! single channel and are applied to the controller strictly in order.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::StrategyController;
use crate::types::{Bar, OrderState, Quote};
use crate::venue::Venue;

#[derive(Debug, Clone)]
pub enum StrategyEvent {
    Bar(Bar),
    Quote(Quote),
    Order(OrderState),
    Disconnected(String),
    Shutdown,
}

/// Run `controller` until `Shutdown` or the sender side is dropped.
///
/// The controller is handed back once stopped so callers can inspect its state.
pub fn spawn_strategy<V>(
    mut controller: StrategyController<V>,
    mut rx: mpsc::Receiver<StrategyEvent>,
) -> JoinHandle<StrategyController<V>>
where
    V: Venue + 'static,
{
    tokio::spawn(async move {
        info!(instrument = %controller.instrument(), "Strategy task running");
        while let Some(event) = rx.recv().await {
            let res = match event {
                StrategyEvent::Bar(bar) => controller.on_bar(&bar),
                StrategyEvent::Quote(quote) => controller.on_tick(&quote),
                StrategyEvent::Order(update) => controller.on_order_update(&update),
                StrategyEvent::Disconnected(reason) => {
                    controller.on_disconnect(&reason);
                    Ok(())
                }
                StrategyEvent::Shutdown => break,
            };
            if let Err(e) = res {
                if e.is_fatal() {
                    error!(instrument = %controller.instrument(), error = %e, "Trading halted for instrument");
                } else {
                    warn!(error = %e, "Event failed");
                }
            }
        }
        if let Err(e) = controller.on_stop() {
            error!(error = %e, "Error while stopping strategy");
        }
        controller
    })
}
