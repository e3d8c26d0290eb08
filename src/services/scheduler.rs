//! Scheduled task driver
//!
//! Owns the aggregate-departed and ageout tickers and feeds synthetic tick
//! messages into the engine's input stream, so all timer work serializes
//! with read processing.

use crate::domain::events::epoch_ms;
use crate::services::engine::EngineMessage;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Ageout scan cadence
const AGEOUT_TICK: Duration = Duration::from_secs(3600);

/// Run the scheduler until shutdown. `aggregate_tick_ms` is the departed
/// aggregation threshold divided by five.
pub async fn run_scheduler(
    engine_tx: mpsc::Sender<EngineMessage>,
    aggregate_tick_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut aggregate_ticker = interval(Duration::from_millis(aggregate_tick_ms.max(100)));
    let mut ageout_ticker = interval(AGEOUT_TICK);
    // the first tick of a tokio interval fires immediately; swallow both
    aggregate_ticker.tick().await;
    ageout_ticker.tick().await;

    info!(aggregate_tick_ms = %aggregate_tick_ms, "scheduler_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler_stopped");
                    return;
                }
            }
            _ = aggregate_ticker.tick() => {
                debug!("aggregate_departed_tick");
                send_tick(&engine_tx, EngineMessage::AggregateDepartedTick { now: epoch_ms() });
            }
            _ = ageout_ticker.tick() => {
                debug!("ageout_tick");
                send_tick(&engine_tx, EngineMessage::AgeoutTick { now: epoch_ms() });
            }
        }
    }
}

/// Ticks are droppable: a missed tick is retried at the next cadence, so a
/// full engine queue must not block the scheduler
fn send_tick(engine_tx: &mpsc::Sender<EngineMessage>, msg: EngineMessage) {
    if engine_tx.try_send(msg).is_err() {
        warn!("engine queue full, tick skipped");
    }
}
