//! Status feed configuration
//!
//! Connection parameters are read once at startup from environment-style
//! key/value pairs, optionally layered over a TOML file. Nothing here is
//! re-read after the client has been constructed.

use crate::protocol::topics::{validate_topic_filter, STATUS_TOPIC_FILTER};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8093;
const DEFAULT_PATH: &str = "/mqtt";
const DEFAULT_CLIENT_ID_SEED: &str = "frontend_mqtt_client";
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("MQTT status feed is disabled (MQTT_ENABLED is not 'true')")]
    FeatureDisabled,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Transport scheme used to reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportScheme {
    /// Plaintext websocket
    #[default]
    Ws,
    /// Websocket over TLS
    Wss,
    /// Plain TCP
    Mqtt,
    /// TCP over TLS
    Mqtts,
}

impl TransportScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportScheme::Ws => "ws",
            TransportScheme::Wss => "wss",
            TransportScheme::Mqtt => "mqtt",
            TransportScheme::Mqtts => "mqtts",
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, TransportScheme::Ws | TransportScheme::Wss)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, TransportScheme::Wss | TransportScheme::Mqtts)
    }
}

impl std::str::FromStr for TransportScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ws" => Ok(TransportScheme::Ws),
            "wss" => Ok(TransportScheme::Wss),
            "mqtt" | "tcp" => Ok(TransportScheme::Mqtt),
            "mqtts" | "ssl" => Ok(TransportScheme::Mqtts),
            _ => Err(ConfigError::InvalidValue {
                key: "MQTT_PROTOCOL".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Part of the application a client instance serves; folded into the client id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientContext {
    ProxyStatus,
    Devices,
    Debug,
    #[default]
    General,
}

impl ClientContext {
    /// Derive the context from a route-like path (`/proxy-status`, `/devices`, ...)
    pub fn from_path(path: &str) -> Self {
        if path.contains("/proxy-status") || path.contains("/ProxyStatus") {
            ClientContext::ProxyStatus
        } else if path.contains("/device") || path.contains("/DeviceManagement") {
            ClientContext::Devices
        } else if path.contains("/debug") {
            ClientContext::Debug
        } else {
            ClientContext::General
        }
    }

    /// Parse either a literal tag or a path
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "ProxyStatus" => ClientContext::ProxyStatus,
            "devices" => ClientContext::Devices,
            "debug" => ClientContext::Debug,
            "general" | "" => ClientContext::General,
            other => Self::from_path(other),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ClientContext::ProxyStatus => "ProxyStatus",
            ClientContext::Devices => "devices",
            ClientContext::Debug => "debug",
            ClientContext::General => "general",
        }
    }
}

/// Build a session-unique client identifier: `{seed}_{context}_{timestamp}`
pub fn derive_client_id(seed: &str, context: ClientContext, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%Y-%m-%d_%H-%M-%S-%3fZ");
    format!("{seed}_{}_{timestamp}", context.tag())
}

/// Immutable connection parameters for one client instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub scheme: TransportScheme,
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub reconnect_enabled: bool,
    pub reconnect_max_attempts: u32,
    /// Fixed delay between reconnect attempts
    #[serde(with = "duration_millis")]
    pub reconnect_delay: Duration,
    pub logging_enabled: bool,
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,
    /// Filters subscribed automatically after every successful connect
    pub default_topics: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            scheme: TransportScheme::default(),
            path: DEFAULT_PATH.to_string(),
            username: None,
            password: None,
            client_id: derive_client_id(
                DEFAULT_CLIENT_ID_SEED,
                ClientContext::General,
                Utc::now(),
            ),
            reconnect_enabled: false,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            logging_enabled: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            default_topics: vec![STATUS_TOPIC_FILTER.to_string()],
        }
    }
}

impl ConnectionConfig {
    /// Broker URL, e.g. `ws://localhost:8093/mqtt`
    pub fn broker_url(&self) -> String {
        if self.scheme.is_websocket() {
            format!(
                "{}://{}:{}{}",
                self.scheme.as_str(),
                self.host,
                self.port,
                self.path
            )
        } else {
            format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be non-zero".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client id cannot be empty".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "connect timeout must be non-zero".to_string(),
            ));
        }
        if self.scheme.is_websocket() && !self.path.starts_with('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "websocket path must start with '/': {}",
                self.path
            )));
        }
        for topic in &self.default_topics {
            validate_topic_filter(topic).map_err(|e| {
                ConfigError::InvalidConfig(format!("default topic '{topic}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Copy of the configuration safe to print
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `[mqtt]` table of the config file; every key optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSection {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<TransportScheme>,
    pub path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_context: Option<String>,
    pub reconnect_enabled: Option<bool>,
    pub reconnect_max_attempts: Option<u32>,
    /// Milliseconds
    pub reconnect_delay: Option<u64>,
    pub logging_enabled: Option<bool>,
    /// Milliseconds
    pub connect_timeout: Option<u64>,
    /// Seconds
    pub keep_alive: Option<u64>,
    pub default_topics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    mqtt: MqttSection,
}

/// Top-level feed configuration: the master switch plus connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub enabled: bool,
    pub connection: ConnectionConfig,
}

impl FeedConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_section(MqttSection::default(), |key| std::env::var(key).ok())
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)?;
        Self::from_section(file.mqtt, |key| std::env::var(key).ok())
    }

    /// Build from a file section and a key lookup; lookup values win
    pub fn from_section<F>(section: MqttSection, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = section.overlay(&lookup)?;

        let context = ClientContext::parse(section.client_context.as_deref().unwrap_or_default());
        let seed = section
            .client_id
            .unwrap_or_else(|| DEFAULT_CLIENT_ID_SEED.to_string());

        let connection = ConnectionConfig {
            host: section.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: section.port.unwrap_or(DEFAULT_PORT),
            scheme: section.protocol.unwrap_or_default(),
            path: section.path.unwrap_or_else(|| DEFAULT_PATH.to_string()),
            username: section.username.filter(|u| !u.is_empty()),
            password: section.password.filter(|p| !p.is_empty()),
            client_id: derive_client_id(&seed, context, Utc::now()),
            reconnect_enabled: section.reconnect_enabled.unwrap_or(false),
            reconnect_max_attempts: section
                .reconnect_max_attempts
                .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS),
            reconnect_delay: Duration::from_millis(
                section.reconnect_delay.unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            logging_enabled: section.logging_enabled.unwrap_or(false),
            connect_timeout: Duration::from_millis(
                section.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            keep_alive: Duration::from_secs(section.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE_SECS)),
            default_topics: section
                .default_topics
                .unwrap_or_else(|| vec![STATUS_TOPIC_FILTER.to_string()]),
        };
        connection.validate()?;

        Ok(FeedConfig {
            enabled: section.enabled.unwrap_or(false),
            connection,
        })
    }

    /// Connection parameters, or `FeatureDisabled` when the master switch is off
    pub fn enabled_connection(&self) -> Result<&ConnectionConfig, ConfigError> {
        if self.enabled {
            Ok(&self.connection)
        } else {
            Err(ConfigError::FeatureDisabled)
        }
    }
}

impl MqttSection {
    fn overlay<F>(mut self, lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MQTT_ENABLED") {
            self.enabled = Some(parse_flag(&v));
        }
        if let Some(v) = lookup("MQTT_HOST") {
            self.host = Some(v);
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.port = Some(parse_number("MQTT_PORT", &v)?);
        }
        if let Some(v) = lookup("MQTT_PROTOCOL") {
            self.protocol = Some(v.parse()?);
        }
        if let Some(v) = lookup("MQTT_PATH") {
            self.path = Some(v);
        }
        if let Some(v) = lookup("MQTT_USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = lookup("MQTT_PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = lookup("MQTT_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = lookup("MQTT_CLIENT_CONTEXT") {
            self.client_context = Some(v);
        }
        if let Some(v) = lookup("MQTT_RECONNECT_ENABLED") {
            self.reconnect_enabled = Some(parse_flag(&v));
        }
        if let Some(v) = lookup("MQTT_RECONNECT_MAX_ATTEMPTS") {
            self.reconnect_max_attempts = Some(parse_number("MQTT_RECONNECT_MAX_ATTEMPTS", &v)?);
        }
        if let Some(v) = lookup("MQTT_RECONNECT_DELAY") {
            self.reconnect_delay = Some(parse_number("MQTT_RECONNECT_DELAY", &v)?);
        }
        if let Some(v) = lookup("MQTT_LOGGING_ENABLED") {
            self.logging_enabled = Some(parse_flag(&v));
        }
        if let Some(v) = lookup("MQTT_CONNECT_TIMEOUT") {
            self.connect_timeout = Some(parse_number("MQTT_CONNECT_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("MQTT_KEEP_ALIVE") {
            self.keep_alive = Some(parse_number("MQTT_KEEP_ALIVE", &v)?);
        }
        Ok(self)
    }
}

/// Only the literal `true` (any case) enables a flag
fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
