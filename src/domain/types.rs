//! Wire types for inbound bus readings
//!
//! Every inbound message is a tagged reading: a `type` discriminator plus a
//! base64-encoded JSON `value`. Each payload type carries a `validate()`
//! contract; readings failing validation are rejected and counted, and the
//! pipeline continues.

use serde::Deserialize;
use thiserror::Error;

/// Reading kinds recognized on the inbound bus
pub const READING_INVENTORY_DATA: &str = "inventory_data";
pub const READING_DEVICE_ALERT: &str = "device_alert";
pub const READING_CONTROLLER_HEARTBEAT: &str = "controller_heartbeat";
pub const READING_SENSOR_CONFIG: &str = "sensor_config_notification";
pub const READING_SCHEDULER_RUN_STATE: &str = "scheduler_run_state";
pub const READING_ASN_DATA: &str = "ASN_data";
pub const READING_CONTROLLER_STATUS: &str = "rsp_controller_status_update";

/// Run state under which reads are processed; anything else suspends ingest
pub const RUN_STATE_RUNNING: &str = "RUNNING";

/// Controller status that signals sensors should be re-queried
pub const CONTROLLER_READY: &str = "controller_ready";

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing {0} field")]
    MissingField(&'static str),
}

/// Envelope for a single tagged reading off the bus
#[derive(Debug, Clone, Deserialize)]
pub struct Reading {
    #[serde(rename = "type")]
    pub kind: String,
    /// base64-encoded JSON payload
    pub value: String,
}

/// One raw tag read reported by a sensor
#[derive(Debug, Clone, Deserialize)]
pub struct TagRead {
    #[serde(default)]
    pub epc: String,
    #[serde(default)]
    pub tid: String,
    /// Antenna port the read came from; required
    pub antenna_id: Option<i32>,
    /// RSSI in integer dBm x10 (-58.0 dBm reads as -580)
    pub rssi: i64,
    /// Epoch ms the sensor stamped on the read
    #[serde(default)]
    pub last_read_on: u64,
    #[serde(default)]
    pub frequency: u32,
}

impl TagRead {
    /// Malformed reads (missing EPC or antenna) are dropped and counted
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.epc.is_empty() {
            return Err(ValidationError::MissingField("epc"));
        }
        if self.antenna_id.is_none() {
            return Err(ValidationError::MissingField("antenna_id"));
        }
        Ok(())
    }
}

/// Batch of raw tag reads from one sensor
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryData {
    #[serde(default)]
    pub sent_on: u64,
    #[serde(default)]
    pub period: u64,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub data: Vec<TagRead>,
}

impl InventoryData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id.is_empty() {
            return Err(ValidationError::MissingField("device_id"));
        }
        Ok(())
    }
}

/// Sensor identity/personality update pushed by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfigNotification {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub facility_id: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub min_rssi_dbm10x: Option<i64>,
}

impl SensorConfigNotification {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id.is_empty() {
            return Err(ValidationError::MissingField("device_id"));
        }
        if self.facility_id.is_empty() {
            return Err(ValidationError::MissingField("facility_id"));
        }
        Ok(())
    }
}

/// Scheduler run-state notification; non-RUNNING states suspend reads
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerRunState {
    #[serde(default)]
    pub run_state: String,
}

impl SchedulerRunState {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.run_state.is_empty() {
            return Err(ValidationError::MissingField("run_state"));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RUN_STATE_RUNNING
    }
}

/// Device alert off the bus; the Inventory-Unload number triggers a full
/// tag wipe
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAlert {
    #[serde(default)]
    pub sent_on: u64,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub alert_number: i32,
    #[serde(default)]
    pub alert_description: String,
    #[serde(default)]
    pub severity: String,
}

impl DeviceAlert {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id.is_empty() {
            return Err(ValidationError::MissingField("device_id"));
        }
        Ok(())
    }

    pub fn is_inventory_unload(&self) -> bool {
        self.alert_number == crate::io::alerts::ALERT_INVENTORY_UNLOAD
    }
}

/// Controller liveness ping; opaque to the core
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerHeartbeat {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub sent_on: u64,
}

impl ControllerHeartbeat {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id.is_empty() {
            return Err(ValidationError::MissingField("device_id"));
        }
        Ok(())
    }
}

/// Controller lifecycle status; "controller_ready" prompts a sensor re-query
/// by the (external) sensor service
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerStatusUpdate {
    #[serde(default)]
    pub status: String,
}

impl ControllerStatusUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.status.is_empty() {
            return Err(ValidationError::MissingField("status"));
        }
        Ok(())
    }
}
