//! Sensor identity, personality, and the registry
//!
//! Sensors are created lazily on first observation (personality None, no
//! RSSI floor) and updated by `sensor_config_notification`. The engine task
//! is the only mutator; other tasks read copy-on-write snapshots.

use crate::domain::types::SensorConfigNotification;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Facility assigned to sensors observed before any config notification
pub const DEFAULT_FACILITY: &str = "DEFAULT_FACILITY";

/// Behavior class of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Personality {
    /// Ordinary inventory sensor
    #[default]
    None,
    /// Reads push Present tags toward Exiting
    Exit,
    /// Point-of-sale: reads never cause arrival
    Pos,
}

impl Personality {
    pub fn parse(s: &str) -> Personality {
        match s.to_ascii_uppercase().as_str() {
            "EXIT" => Personality::Exit,
            "POS" => Personality::Pos,
            _ => Personality::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Personality::None => "NONE",
            Personality::Exit => "EXIT",
            Personality::Pos => "POS",
        }
    }
}

/// A fixed RFID sensor
#[derive(Debug, Clone)]
pub struct Sensor {
    pub device_id: Arc<str>,
    pub facility_id: Arc<str>,
    pub personality: Personality,
    /// Reads below this floor (dBm x10) are dropped; i64::MIN disables it
    pub min_rssi_dbm10x: i64,
}

impl Sensor {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: Arc::from(device_id),
            facility_id: Arc::from(DEFAULT_FACILITY),
            personality: Personality::None,
            min_rssi_dbm10x: i64::MIN,
        }
    }

    /// Canonical location string for one of this sensor's antenna ports
    pub fn antenna_alias(&self, antenna_id: i32) -> String {
        format!("{}-{}", self.device_id, antenna_id)
    }

    pub fn accepts_rssi(&self, rssi: i64) -> bool {
        rssi >= self.min_rssi_dbm10x
    }

    pub fn is_exit(&self) -> bool {
        self.personality == Personality::Exit
    }

    pub fn is_pos(&self) -> bool {
        self.personality == Personality::Pos
    }
}

type SensorMap = FxHashMap<Arc<str>, Arc<Sensor>>;

/// Registry of known sensors keyed by device_id.
///
/// Mutations swap in a cloned map so concurrent readers holding a snapshot
/// never observe a partial update.
pub struct SensorRegistry {
    inner: RwLock<Arc<SensorMap>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Arc::new(SensorMap::default())) }
    }

    /// Current read-only snapshot of all sensors
    pub fn snapshot(&self) -> Arc<SensorMap> {
        self.inner.read().clone()
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Sensor>> {
        self.inner.read().get(device_id).cloned()
    }

    /// Look up a sensor, creating it with defaults on first observation
    pub fn get_or_create(&self, device_id: &str) -> Arc<Sensor> {
        if let Some(sensor) = self.get(device_id) {
            return sensor;
        }

        let sensor = Arc::new(Sensor::new(device_id));
        self.swap_insert(sensor.clone());
        debug!(device_id = %device_id, "sensor_auto_created");
        sensor
    }

    /// Apply a sensor config notification, preserving unset fields
    pub fn apply_config(&self, notification: &SensorConfigNotification) {
        let existing = self.get(&notification.device_id);
        let min_rssi = notification
            .min_rssi_dbm10x
            .or(existing.as_ref().map(|s| s.min_rssi_dbm10x))
            .unwrap_or(i64::MIN);

        let sensor = Arc::new(Sensor {
            device_id: Arc::from(notification.device_id.as_str()),
            facility_id: Arc::from(notification.facility_id.as_str()),
            personality: Personality::parse(&notification.personality),
            min_rssi_dbm10x: min_rssi,
        });

        info!(
            device_id = %sensor.device_id,
            facility_id = %sensor.facility_id,
            personality = %sensor.personality.as_str(),
            min_rssi_dbm10x = %sensor.min_rssi_dbm10x,
            "sensor_config_applied"
        );
        self.swap_insert(sensor);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn swap_insert(&self, sensor: Arc<Sensor>) {
        let mut guard = self.inner.write();
        let mut map = (**guard).clone();
        map.insert(sensor.device_id.clone(), sensor);
        *guard = Arc::new(map);
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_antenna_alias() {
        let cases = [
            ("RSP-3F7DAC", 0, "RSP-3F7DAC-0"),
            ("RSP-150000", 10, "RSP-150000-10"),
            ("RSP-999999", 3, "RSP-999999-3"),
        ];
        for (device_id, antenna_id, expected) in cases {
            let sensor = Sensor::new(device_id);
            assert_eq!(sensor.antenna_alias(antenna_id), expected);
        }
    }

    #[test]
    fn test_personality_parse() {
        assert_eq!(Personality::parse("EXIT"), Personality::Exit);
        assert_eq!(Personality::parse("pos"), Personality::Pos);
        assert_eq!(Personality::parse("NONE"), Personality::None);
        assert_eq!(Personality::parse(""), Personality::None);
    }

    #[test]
    fn test_auto_created_sensor_defaults() {
        let registry = SensorRegistry::new();
        let sensor = registry.get_or_create("RSP-150000");

        assert_eq!(&*sensor.facility_id, DEFAULT_FACILITY);
        assert_eq!(sensor.personality, Personality::None);
        assert!(sensor.accepts_rssi(-950));
        assert_eq!(registry.len(), 1);

        // second lookup returns the same sensor
        let again = registry.get_or_create("RSP-150000");
        assert!(Arc::ptr_eq(&sensor, &again));
    }

    #[test]
    fn test_apply_config_updates_snapshot() {
        let registry = SensorRegistry::new();
        let stale = registry.snapshot();
        registry.get_or_create("RSP-150000");

        registry.apply_config(&SensorConfigNotification {
            device_id: "RSP-150000".to_string(),
            facility_id: "salesFloor".to_string(),
            personality: "EXIT".to_string(),
            aliases: vec![],
            min_rssi_dbm10x: Some(-600),
        });

        let sensor = registry.get("RSP-150000").unwrap();
        assert_eq!(&*sensor.facility_id, "salesFloor");
        assert!(sensor.is_exit());
        assert!(sensor.accepts_rssi(-580));
        assert!(!sensor.accepts_rssi(-620));

        // old snapshot is untouched by the swap
        assert!(stale.is_empty());
    }

    #[test]
    fn test_config_preserves_min_rssi_when_unset() {
        let registry = SensorRegistry::new();
        registry.apply_config(&SensorConfigNotification {
            device_id: "RSP-150000".to_string(),
            facility_id: "salesFloor".to_string(),
            personality: "NONE".to_string(),
            aliases: vec![],
            min_rssi_dbm10x: Some(-600),
        });
        registry.apply_config(&SensorConfigNotification {
            device_id: "RSP-150000".to_string(),
            facility_id: "backStock".to_string(),
            personality: "NONE".to_string(),
            aliases: vec![],
            min_rssi_dbm10x: None,
        });

        let sensor = registry.get("RSP-150000").unwrap();
        assert_eq!(&*sensor.facility_id, "backStock");
        assert_eq!(sensor.min_rssi_dbm10x, -600);
    }
}
