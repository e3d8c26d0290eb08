//! Inventory lifecycle events emitted by the tag engine

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Lifecycle event classification for a single tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagEventType {
    Arrived,
    Moved,
    Departed,
    Returned,
    CycleCount,
}

impl TagEventType {
    /// String form used on the wire and in the persisted `event` field
    pub fn as_str(&self) -> &'static str {
        match self {
            TagEventType::Arrived => "arrived",
            TagEventType::Moved => "moved",
            TagEventType::Departed => "departed",
            TagEventType::Returned => "returned",
            TagEventType::CycleCount => "cycle_count",
        }
    }
}

/// A single tag lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct TagEvent {
    /// SGTIN EPC code (24 hex chars)
    pub epc: String,
    /// Tag manufacturer ID, if reported by the read
    pub tid: String,
    pub event_type: TagEventType,
    /// Facility the event applies to (the old facility for a departure)
    pub facility_id: String,
    /// Antenna alias "<device_id>-<antenna_id>"
    pub location: String,
    /// Epoch ms of the triggering read (or last read for timer departures)
    pub timestamp: u64,
}

/// Batched outbound envelope published as `inventory_event`
#[derive(Debug, Clone, Serialize)]
pub struct InventoryEvent {
    pub sent_on: u64,
    pub period: u64,
    pub data: Vec<TagEvent>,
}

impl InventoryEvent {
    pub fn new(sent_on: u64, period: u64, data: Vec<TagEvent>) -> Self {
        Self { sent_on, period, data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
