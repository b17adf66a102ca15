//! Configuration loading tests
//!
//! File parsing, key overrides and validation. Overrides are exercised
//! through an explicit lookup so the tests never touch the process
//! environment.

use device_status_feed::config::{
    ClientContext, ConfigError, FeedConfig, MqttSection, TransportScheme,
};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_config_loads_from_toml_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
enabled = true
host = "broker.internal"
port = 443
protocol = "wss"
path = "/ws"
username = "dashboard"
password = "secret"
client_id = "status_board"
client_context = "/proxy-status"
reconnect_enabled = true
reconnect_max_attempts = 3
reconnect_delay = 500
connect_timeout = 10000
keep_alive = 30
default_topics = ["mcs/events/ProxyService/status/+", "devices/#"]
"#
    )
    .unwrap();

    let config = FeedConfig::load_from_file(temp_file.path()).unwrap();
    let conn = config.enabled_connection().unwrap();

    assert_eq!(conn.broker_url(), "wss://broker.internal:443/ws");
    assert_eq!(conn.scheme, TransportScheme::Wss);
    assert_eq!(conn.username.as_deref(), Some("dashboard"));
    assert!(conn.client_id.starts_with("status_board_ProxyStatus_"));
    assert!(conn.reconnect_enabled);
    assert_eq!(conn.reconnect_max_attempts, 3);
    assert_eq!(conn.reconnect_delay, Duration::from_millis(500));
    assert_eq!(conn.connect_timeout, Duration::from_secs(10));
    assert_eq!(conn.keep_alive, Duration::from_secs(30));
    assert_eq!(conn.default_topics.len(), 2);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = FeedConfig::load_from_file(std::path::Path::new("/nonexistent/status-feed.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[mqtt\nhost = ").unwrap();

    let result = FeedConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_lookup_values_override_file_values() {
    let section = MqttSection {
        enabled: Some(false),
        host: Some("file-host".to_string()),
        port: Some(1883),
        ..Default::default()
    };

    let config = FeedConfig::from_section(
        section,
        lookup(&[("MQTT_ENABLED", "TRUE"), ("MQTT_HOST", "env-host")]),
    )
    .unwrap();

    assert!(config.enabled);
    assert_eq!(config.connection.host, "env-host");
    assert_eq!(config.connection.port, 1883);
}

#[test]
fn test_disabled_feed_refuses_connection_config() {
    let config = FeedConfig::from_section(MqttSection::default(), lookup(&[])).unwrap();

    assert!(!config.enabled);
    assert!(matches!(
        config.enabled_connection(),
        Err(ConfigError::FeatureDisabled)
    ));
}

#[test]
fn test_malformed_values_are_errors() {
    let bad_port = FeedConfig::from_section(MqttSection::default(), lookup(&[("MQTT_PORT", "http")]));
    assert!(matches!(bad_port, Err(ConfigError::InvalidValue { .. })));

    let bad_scheme =
        FeedConfig::from_section(MqttSection::default(), lookup(&[("MQTT_PROTOCOL", "gopher")]));
    assert!(matches!(bad_scheme, Err(ConfigError::InvalidValue { .. })));
}

#[test]
fn test_only_literal_true_enables_flags() {
    let config = FeedConfig::from_section(
        MqttSection::default(),
        lookup(&[("MQTT_ENABLED", "yes"), ("MQTT_RECONNECT_ENABLED", "1")]),
    )
    .unwrap();

    assert!(!config.enabled);
    assert!(!config.connection.reconnect_enabled);
}

#[test]
fn test_client_context_derivation() {
    assert_eq!(ClientContext::from_path("/proxy-status"), ClientContext::ProxyStatus);
    assert_eq!(ClientContext::from_path("/devices/12"), ClientContext::Devices);
    assert_eq!(ClientContext::from_path("/debug"), ClientContext::Debug);
    assert_eq!(ClientContext::from_path("/settings"), ClientContext::General);
}
