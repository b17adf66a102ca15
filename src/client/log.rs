//! Client log entries and their diagnostic mirror

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target used when log entries are mirrored to `tracing`
pub const LOG_MIRROR_TARGET: &str = "device_status_feed::mqtt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => f.write_str("info"),
            LogLevel::Warn => f.write_str("warn"),
            LogLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        }
    }

    /// Forward to the `tracing` diagnostic sink
    pub fn mirror(&self) {
        let details = self.details.as_ref().map(Value::to_string).unwrap_or_default();
        match self.level {
            LogLevel::Info => {
                tracing::info!(target: LOG_MIRROR_TARGET, details = %details, "{}", self.message)
            }
            LogLevel::Warn => {
                tracing::warn!(target: LOG_MIRROR_TARGET, details = %details, "{}", self.message)
            }
            LogLevel::Error => {
                tracing::error!(target: LOG_MIRROR_TARGET, details = %details, "{}", self.message)
            }
        }
    }
}
