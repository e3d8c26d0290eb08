//! Integration tests for configuration loading

use std::io::Write;
use tagstream::infra::Config;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[service]
name = "tagstream-test"

[mqtt]
host = "test-host"
port = 1884
topic = "test/readings"

[inventory]
aggregate_departed_threshold_ms = 10000
age_out_hours = 24
exiting_ageout_ms = 5000
rssi_window_size = 10

[inventory.age_out_overrides]
salesFloor = 90

[mobility]
hysteresis_margin = 20
exit_read_threshold = 3

[asn]
facility_id = "ASN_TEST"
epc_filters = ["3014"]

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.service_name(), "tagstream-test");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.aggregate_departed_threshold_ms(), 10_000);
    assert_eq!(config.aggregate_departed_tick_ms(), 2_000);
    assert_eq!(config.exiting_ageout_ms(), 5_000);
    assert_eq!(config.rssi_window_size(), 10);
    assert_eq!(config.hysteresis_margin(), 20);
    assert_eq!(config.exit_read_threshold(), 3);
    assert_eq!(config.asn_facility_id(), "ASN_TEST");
    assert_eq!(config.epc_filters(), &["3014".to_string()]);
    assert_eq!(config.age_out_ms("salesFloor"), 90 * 60_000);
    assert_eq!(config.age_out_ms("backStock"), 24 * 3_600_000);
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_load_from_missing_path_falls_back() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.rssi_window_size(), 20);
}

#[test]
fn test_invalid_config_is_fatal() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[mqtt\nhost = ").unwrap();
    temp_file.flush().unwrap();

    let result = Config::load_from_path(&temp_file.path().display().to_string());
    assert!(result.is_err());
}
