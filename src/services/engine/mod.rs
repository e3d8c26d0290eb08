//! Tag engine: the serialized core of the service
//!
//! The engine is the single owner of the in-memory TagRef map, the sensor
//! registry, the scheduler gate, and the event aggregator. It consumes
//! messages from one bounded channel in receipt order, so the state machine
//! needs no internal locks, and a read's full transition (state change,
//! history append, derived events, outbound enqueue) is one atomic step.

mod handlers;

use crate::domain::epc::TagDecoder;
use crate::domain::events::{epoch_ms, InventoryEvent, TagEvent};
use crate::domain::types::{
    InventoryData, SchedulerRunState, SensorConfigNotification,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::io::store::TagStore;
use crate::services::aggregator::EventAggregator;
use crate::services::sensors::SensorRegistry;
use crate::services::tagref::TagRef;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Everything the engine consumes over its single input channel
#[derive(Debug)]
pub enum EngineMessage {
    /// Validated read batch from one sensor
    Reads(InventoryData),
    SensorConfig(SensorConfigNotification),
    RunState(SchedulerRunState),
    /// Scheduler tick: evaluate Exiting ageouts and flush due departeds
    AggregateDepartedTick { now: u64 },
    /// Scheduler tick: age out silent Present tags
    AgeoutTick { now: u64 },
}

/// Central processor for tag state and lifecycle events
pub struct TagEngine {
    /// Active TagRefs by EPC
    pub(crate) tags: FxHashMap<String, TagRef>,
    pub(crate) registry: Arc<SensorRegistry>,
    pub(crate) aggregator: EventAggregator,
    pub(crate) store: Arc<dyn TagStore>,
    pub(crate) config: Config,
    pub(crate) decoders: Vec<TagDecoder>,
    pub(crate) metrics: Arc<Metrics>,
    /// Egress sender (optional so tests can run without a publisher)
    pub(crate) egress: Option<EgressSender>,
    /// Scheduler gate: true while run_state != RUNNING
    pub(crate) suspended: bool,
}

impl TagEngine {
    pub fn new(
        config: Config,
        registry: Arc<SensorRegistry>,
        store: Arc<dyn TagStore>,
        metrics: Arc<Metrics>,
        egress: Option<EgressSender>,
    ) -> Self {
        let aggregator = EventAggregator::new(config.aggregate_departed_threshold_ms());
        let decoders = TagDecoder::chain(config.decoder_order(), config.proprietary_prefix());
        Self {
            tags: FxHashMap::default(),
            registry,
            aggregator,
            store,
            config,
            decoders,
            metrics,
            egress,
            suspended: false,
        }
    }

    /// Consume messages until the channel closes or shutdown fires, then
    /// drain the queue and force-flush pending departeds
    pub async fn run(
        &mut self,
        mut rx: mpsc::Receiver<EngineMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("engine_started");

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.process_message(msg).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain whatever made it into the queue before the close
        while let Ok(msg) = rx.try_recv() {
            self.process_message(msg).await;
        }

        let leftovers = self.aggregator.flush_all();
        if !leftovers.is_empty() {
            info!(count = %leftovers.len(), "engine_final_flush");
            self.publish(leftovers);
        }

        info!("engine_stopped");
    }

    /// Process a single message, dispatching to the appropriate handler
    pub async fn process_message(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::Reads(data) => self.handle_inventory_data(data).await,
            EngineMessage::SensorConfig(notification) => self.handle_sensor_config(&notification),
            EngineMessage::RunState(state) => self.handle_run_state(&state),
            EngineMessage::AggregateDepartedTick { now } => self.handle_aggregate_tick(now).await,
            EngineMessage::AgeoutTick { now } => self.handle_ageout_tick(now).await,
        }

        self.metrics.set_active_tag_refs(self.tags.len() as u64);
        self.metrics.set_pending_departed(self.aggregator.pending_departed_count() as u64);
    }

    /// Wrap events in an envelope and hand them to the publisher
    pub(crate) fn publish(&self, events: Vec<TagEvent>) {
        if events.is_empty() {
            return;
        }
        self.metrics.record_events_emitted(events.len() as u64);

        let Some(ref egress) = self.egress else {
            return;
        };
        let envelope = InventoryEvent::new(epoch_ms(), 0, events);
        if egress.send_inventory_event(envelope) {
            self.metrics.record_envelope_published();
        } else {
            warn!("inventory_event_dropped: egress channel full");
        }
    }

    /// Upsert every dirty TagRef's persistent projection in one bulk call
    pub(crate) async fn persist_dirty(&mut self) {
        let dirty: Vec<_> =
            self.tags.values().filter(|r| r.dirty).map(|r| r.tag.clone()).collect();
        if dirty.is_empty() {
            return;
        }

        match self.store.replace(&dirty).await {
            Ok(()) => {
                for tagref in self.tags.values_mut() {
                    tagref.dirty = false;
                }
                debug!(count = %dirty.len(), "tags_persisted");
            }
            Err(e) => {
                // refs stay dirty; the next batch or tick retries
                self.metrics.record_store_error();
                warn!(error = %e, count = %dirty.len(), "tag_persist_failed");
            }
        }
    }

    /// Number of active TagRefs
    pub fn active_tags(&self) -> usize {
        self.tags.len()
    }
}
