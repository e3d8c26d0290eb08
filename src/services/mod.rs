//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - serialized tag state machine and event emission
//! - `tagref` - per-EPC working state and location estimation
//! - `rssi` - bounded RSSI sample windows
//! - `sensors` - sensor registry and personalities
//! - `aggregator` - outbound event batching and departed pooling
//! - `reconciler` - ASN reconciliation against the store
//! - `scheduler` - timer task feeding the engine

pub mod aggregator;
pub mod engine;
pub mod reconciler;
pub mod rssi;
pub mod scheduler;
pub mod sensors;
pub mod tagref;

// Re-export commonly used types
pub use engine::{EngineMessage, TagEngine};
pub use reconciler::AsnReconciler;
pub use sensors::{Personality, Sensor, SensorRegistry};
pub use tagref::{TagRef, TagState};
