//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument, defaulting
//! to config/dev.toml. A missing file falls back to defaults with a warning;
//! a file that exists but fails to parse is a fatal startup error.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

// ============================================================================
// Default value constants
// ============================================================================

const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_BROKER_MAX_CONNECTIONS: usize = 512;
const DEFAULT_BROKER_MAX_PAYLOAD_BYTES: usize = 1_048_576;
const DEFAULT_PROMETHEUS_PORT: u16 = 9090;
const DEFAULT_RESPONSE_LIMIT: usize = 10_000;
const DEFAULT_AGGREGATE_DEPARTED_THRESHOLD_MS: u64 = 30_000;
const DEFAULT_AGE_OUT_HOURS: u64 = 336;
const DEFAULT_EXITING_AGEOUT_MS: u64 = 30_000;
const DEFAULT_RSSI_WINDOW_SIZE: usize = 20;
const DEFAULT_EXIT_READ_THRESHOLD: u32 = 2;
const DEFAULT_ENGINE_QUEUE_CAPACITY: usize = 10;
const DEFAULT_METRICS_PUBLISH_INTERVAL: u64 = 5;
const DEFAULT_ENDPOINT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// TOML config structs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { name: "tagstream".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_BROKER_PORT,
            topic: "rfid/controller/readings".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    /// Connection cap for the embedded broker
    pub max_connections: usize,
    /// Largest accepted publish payload, in bytes
    pub max_payload_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_BROKER_PORT,
            max_connections: DEFAULT_BROKER_MAX_CONNECTIONS,
            max_payload_bytes: DEFAULT_BROKER_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttEgressConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub events_topic: String,
    pub metrics_topic: String,
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            port: None,
            username: None,
            password: None,
            events_topic: "tagstream/inventory-events".to_string(),
            metrics_topic: "tagstream/metrics".to_string(),
            metrics_publish_interval_secs: DEFAULT_METRICS_PUBLISH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Max rows per query response, consumed by the query surface
    pub response_limit: usize,
    /// Aggregation window for departed events (ms)
    pub aggregate_departed_threshold_ms: u64,
    /// Hours of silence before a Present tag ages out
    pub age_out_hours: u64,
    /// Per-facility ageout overrides, in minutes
    pub age_out_overrides: HashMap<String, u64>,
    /// Ms of silence before an Exiting tag departs
    pub exiting_ageout_ms: u64,
    /// RSSI window size W, in samples
    pub rssi_window_size: usize,
    /// Capacity of the ingest-to-engine channel
    pub engine_queue_capacity: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            response_limit: DEFAULT_RESPONSE_LIMIT,
            aggregate_departed_threshold_ms: DEFAULT_AGGREGATE_DEPARTED_THRESHOLD_MS,
            age_out_hours: DEFAULT_AGE_OUT_HOURS,
            age_out_overrides: HashMap::new(),
            exiting_ageout_ms: DEFAULT_EXITING_AGEOUT_MS,
            rssi_window_size: DEFAULT_RSSI_WINDOW_SIZE,
            engine_queue_capacity: DEFAULT_ENGINE_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MobilityConfig {
    /// Hysteresis margin M in dBm x10; a challenger must beat the incumbent
    /// mean by more than this to displace it
    pub hysteresis_margin: i64,
    /// Exit-personality reads required before Present goes Exiting
    pub exit_read_threshold: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsnConfig {
    /// Facility assigned to tags synthesized from shipping notices
    pub facility_id: String,
    /// EPC prefix whitelist; empty accepts everything
    pub epc_filters: Vec<String>,
}

impl Default for AsnConfig {
    fn default() -> Self {
        Self { facility_id: "ASN_Data".to_string(), epc_filters: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodersConfig {
    /// Ordered decoder names; the first matching scheme wins
    pub order: Vec<String>,
    /// Hex prefix identifying the proprietary scheme
    pub proprietary_prefix: String,
}

impl Default for DecodersConfig {
    fn default() -> Self {
        Self { order: vec!["sgtin-96".to_string()], proprietary_prefix: String::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Alert-service URL; empty disables alert posting
    pub alert_url: String,
    /// Cloud-connector URL, consumed by the external posting collaborator
    pub cloud_connector_url: String,
    pub connection_timeout_secs: u64,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            alert_url: String::new(),
            cloud_connector_url: String::new(),
            connection_timeout_secs: DEFAULT_ENDPOINT_TIMEOUT_SECS,
        }
    }
}

/// Connection parameters for the external document store adapter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub sslmode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "inventory".to_string(),
            sslmode: "disable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: DEFAULT_PROMETHEUS_PORT }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub service: ServiceConfig,
    pub mqtt: MqttConfig,
    pub broker: BrokerConfig,
    pub mqtt_egress: MqttEgressConfig,
    pub inventory: InventoryConfig,
    pub mobility: MobilityConfig,
    pub asn: AsnConfig,
    pub decoders: DecodersConfig,
    pub endpoints: EndpointsConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
}

// ============================================================================
// Main Config struct
// ============================================================================

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    service_name: String,
    config_file: String,

    // MQTT ingress
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,

    // Embedded broker
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    broker_max_connections: usize,
    broker_max_payload_bytes: usize,

    // MQTT egress
    mqtt_egress_enabled: bool,
    mqtt_egress_host: Option<String>,
    mqtt_egress_port: Option<u16>,
    mqtt_egress_username: Option<String>,
    mqtt_egress_password: Option<String>,
    mqtt_egress_events_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,

    // Inventory thresholds
    response_limit: usize,
    aggregate_departed_threshold_ms: u64,
    age_out_hours: u64,
    age_out_overrides: HashMap<String, u64>,
    exiting_ageout_ms: u64,
    rssi_window_size: usize,
    engine_queue_capacity: usize,

    // Mobility profile
    hysteresis_margin: i64,
    exit_read_threshold: u32,

    // ASN
    asn_facility_id: String,
    epc_filters: Vec<String>,

    // EPC decoders
    decoder_order: Vec<String>,
    proprietary_prefix: String,

    // Endpoints
    alert_url: String,
    cloud_connector_url: String,
    connection_timeout_secs: u64,

    // Database (consumed by the external store adapter)
    db_host: String,
    db_port: u16,
    db_user: String,
    db_password: String,
    db_name: String,
    db_sslmode: String,

    // Metrics
    metrics_interval_secs: u64,
    prometheus_port: u16,
}

/// Macro to generate simple getter methods
macro_rules! config_getters {
    // &str getters (return reference to String field)
    (str: $($name:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) -> &str {
                &self.$name
            }
        )*
    };
    // Copy type getters (return by value)
    (copy: $($name:ident -> $ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) -> $ty {
                self.$name
            }
        )*
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            service_name: toml_config.service.name,
            config_file: config_file.to_string(),
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            broker_max_connections: toml_config.broker.max_connections.max(2),
            broker_max_payload_bytes: toml_config.broker.max_payload_bytes.max(1024),
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_host: toml_config.mqtt_egress.host,
            mqtt_egress_port: toml_config.mqtt_egress.port,
            mqtt_egress_username: toml_config.mqtt_egress.username,
            mqtt_egress_password: toml_config.mqtt_egress.password,
            mqtt_egress_events_topic: toml_config.mqtt_egress.events_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
            response_limit: toml_config.inventory.response_limit,
            aggregate_departed_threshold_ms: toml_config
                .inventory
                .aggregate_departed_threshold_ms
                .max(5),
            age_out_hours: toml_config.inventory.age_out_hours,
            age_out_overrides: toml_config.inventory.age_out_overrides,
            exiting_ageout_ms: toml_config.inventory.exiting_ageout_ms,
            rssi_window_size: toml_config.inventory.rssi_window_size.max(1),
            engine_queue_capacity: toml_config.inventory.engine_queue_capacity.max(1),
            hysteresis_margin: toml_config.mobility.hysteresis_margin,
            exit_read_threshold: toml_config
                .mobility
                .exit_read_threshold
                .unwrap_or(DEFAULT_EXIT_READ_THRESHOLD)
                .max(1),
            asn_facility_id: toml_config.asn.facility_id,
            epc_filters: toml_config.asn.epc_filters,
            decoder_order: toml_config.decoders.order,
            proprietary_prefix: toml_config.decoders.proprietary_prefix,
            alert_url: toml_config.endpoints.alert_url,
            cloud_connector_url: toml_config.endpoints.cloud_connector_url,
            connection_timeout_secs: toml_config.endpoints.connection_timeout_secs,
            db_host: toml_config.database.host,
            db_port: toml_config.database.port,
            db_user: toml_config.database.user,
            db_password: toml_config.database.password,
            db_name: toml_config.database.name,
            db_sslmode: toml_config.database.sslmode,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `anyhow::Error` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration from a path. A missing file falls back to defaults
    /// with a warning; a present-but-invalid file is a fatal error.
    pub fn load_from_path(config_path: &str) -> anyhow::Result<Self> {
        if !Path::new(config_path).exists() {
            eprintln!("Warning: config file {config_path} not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(config_path)
    }

    /// Present ageout threshold in ms for a facility, honoring the
    /// per-facility minute overrides
    pub fn age_out_ms(&self, facility_id: &str) -> u64 {
        match self.age_out_overrides.get(facility_id) {
            Some(minutes) => minutes * 60_000,
            None => self.age_out_hours * 3_600_000,
        }
    }

    /// Cadence of the aggregate-departed ticker
    pub fn aggregate_departed_tick_ms(&self) -> u64 {
        self.aggregate_departed_threshold_ms / 5
    }

    // ========================================================================
    // Getters (generated via macro for simple cases)
    // ========================================================================

    config_getters!(str:
        service_name,
        config_file,
        mqtt_host,
        mqtt_topic,
        broker_bind_address,
        mqtt_egress_events_topic,
        mqtt_egress_metrics_topic,
        asn_facility_id,
        proprietary_prefix,
        alert_url,
        cloud_connector_url,
        db_host,
        db_user,
        db_password,
        db_name,
        db_sslmode,
    );

    config_getters!(copy:
        mqtt_port -> u16,
        broker_enabled -> bool,
        broker_port -> u16,
        broker_max_connections -> usize,
        broker_max_payload_bytes -> usize,
        mqtt_egress_enabled -> bool,
        mqtt_egress_metrics_interval_secs -> u64,
        response_limit -> usize,
        aggregate_departed_threshold_ms -> u64,
        age_out_hours -> u64,
        exiting_ageout_ms -> u64,
        rssi_window_size -> usize,
        engine_queue_capacity -> usize,
        hysteresis_margin -> i64,
        exit_read_threshold -> u32,
        connection_timeout_secs -> u64,
        db_port -> u16,
        metrics_interval_secs -> u64,
        prometheus_port -> u16,
    );

    #[inline]
    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    #[inline]
    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    #[inline]
    pub fn epc_filters(&self) -> &[String] {
        &self.epc_filters
    }

    #[inline]
    pub fn decoder_order(&self) -> &[String] {
        &self.decoder_order
    }

    /// Get MQTT egress host, falling back to the ingress host if not set
    #[inline]
    pub fn mqtt_egress_host(&self) -> &str {
        self.mqtt_egress_host.as_deref().unwrap_or(&self.mqtt_host)
    }

    /// Get MQTT egress port, falling back to the ingress port if not set
    #[inline]
    pub fn mqtt_egress_port(&self) -> u16 {
        self.mqtt_egress_port.unwrap_or(self.mqtt_port)
    }

    #[inline]
    pub fn mqtt_egress_username(&self) -> Option<&str> {
        self.mqtt_egress_username.as_deref().or(self.mqtt_username.as_deref())
    }

    #[inline]
    pub fn mqtt_egress_password(&self) -> Option<&str> {
        self.mqtt_egress_password.as_deref().or(self.mqtt_password.as_deref())
    }

    /// Builder method for tests to set the RSSI window size
    #[cfg(test)]
    pub fn with_rssi_window_size(mut self, size: usize) -> Self {
        self.rssi_window_size = size.max(1);
        self
    }

    /// Builder method for tests to set the exit read threshold
    #[cfg(test)]
    pub fn with_exit_read_threshold(mut self, k: u32) -> Self {
        self.exit_read_threshold = k.max(1);
        self
    }

    /// Builder method for tests to set the departed aggregation threshold
    #[cfg(test)]
    pub fn with_aggregate_departed_threshold_ms(mut self, ms: u64) -> Self {
        self.aggregate_departed_threshold_ms = ms;
        self
    }

    /// Builder method for tests to set the exiting ageout
    #[cfg(test)]
    pub fn with_exiting_ageout_ms(mut self, ms: u64) -> Self {
        self.exiting_ageout_ms = ms;
        self
    }

    /// Builder method for tests to set a per-facility ageout override
    #[cfg(test)]
    pub fn with_age_out_override(mut self, facility: &str, minutes: u64) -> Self {
        self.age_out_overrides.insert(facility.to_string(), minutes);
        self
    }
}
