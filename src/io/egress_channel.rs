//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand outbound envelopes to the publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::events::{epoch_ms, InventoryEvent};
use crate::infra::metrics::MetricsSummary;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Batched inventory lifecycle events
    Inventory(InventoryEvent),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for metrics snapshots
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub readings_received: u64,
    pub reads_processed: u64,
    pub reads_per_interval: u64,
    pub events_emitted: u64,
    pub envelopes_published: u64,
    pub active_tag_refs: u64,
    pub pending_departed: u64,
    pub running: bool,
}

impl From<MetricsSummary> for MetricsPayload {
    fn from(summary: MetricsSummary) -> Self {
        Self {
            ts: epoch_ms(),
            readings_received: summary.readings_received,
            reads_processed: summary.reads_processed,
            reads_per_interval: summary.reads_in_interval,
            events_emitted: summary.events_emitted,
            envelopes_published: summary.envelopes_published,
            active_tag_refs: summary.active_tag_refs,
            pending_departed: summary.pending_departed,
            running: summary.running,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>) -> Self {
        Self { tx }
    }

    /// Send an inventory event envelope for publishing.
    /// Returns false if the channel was full and the envelope was dropped.
    pub fn send_inventory_event(&self, envelope: InventoryEvent) -> bool {
        self.tx.try_send(EgressMessage::Inventory(envelope)).is_ok()
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let _ = self.tx.try_send(EgressMessage::Metrics(summary.into()));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(buffer_size: usize) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx), rx)
}
