//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving bus readings
//! - `mqtt_egress` - MQTT publisher for inventory events and metrics
//! - `egress_channel` - Typed channel for egress messages
//! - `store` - Tag persistence port and in-memory implementation
//! - `alerts` - HTTP poster for the RFID alert service
//! - `prometheus` - Prometheus text endpoint

pub mod alerts;
pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod store;

// Re-export commonly used types
pub use alerts::AlertClient;
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt::{start_ingest_client, IngestContext};
pub use mqtt_egress::MqttPublisher;
pub use store::{MemoryTagStore, StoreError, TagFilter, TagStore};
