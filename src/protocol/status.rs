//! Proxy service status records
//!
//! Status updates are published by the remote system as JSON under the
//! reserved status namespace. The flags arrive as strings (`"1"` / `"0"`), and
//! some publishers send numbers instead, so decoding is lenient about scalar
//! types while still requiring a well-formed JSON object with a message.

use super::topics::device_id_from_status_topic;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Status payload decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed status payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Status update as pushed over the message bus
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyStatus {
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxyid: Option<i64>,
    pub message: String,
    #[serde(
        rename = "proxyServiceAlive",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_service_alive: Option<String>,
    #[serde(
        rename = "proxyServiceStart",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_service_start: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_ip: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_port: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub remark: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
}

impl ProxyStatus {
    /// Decode a status payload received on `topic`.
    ///
    /// When the payload carries no `proxyid`, the device identifier is taken
    /// from the last topic level if it is numeric.
    pub fn decode(topic: &str, payload: &str) -> Result<Self, DecodeError> {
        let mut status: ProxyStatus = serde_json::from_str(payload)?;
        if status.proxyid.is_none() {
            status.proxyid = device_id_from_status_topic(topic).and_then(|id| id.parse().ok());
        }
        Ok(status)
    }

    /// Classify this update
    pub fn kind(&self) -> StatusKind {
        StatusKind::classify(
            &self.message,
            self.proxy_service_alive.as_deref().unwrap_or_default(),
            self.proxy_service_start.as_deref().unwrap_or_default(),
        )
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Bool(b)) => Some(if b { "1" } else { "0" }.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("proxyid out of range: {n}"))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("proxyid is not numeric: {s}"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected proxyid value: {other}"
        ))),
    }
}

/// Operational class of a proxy derived from its status fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Running,
    Stopped,
    Error,
    Timeout,
    Unknown,
}

impl StatusKind {
    pub fn classify(message: &str, alive: &str, started: &str) -> Self {
        let is_alive = alive == "1";
        let is_started = started == "1";

        if message == "OK" && is_alive && is_started {
            StatusKind::Running
        } else if message.starts_with("HTTP") || message.starts_with("Error") {
            StatusKind::Error
        } else if message == "NG_Timeout" {
            StatusKind::Timeout
        } else if !is_alive || !is_started {
            StatusKind::Stopped
        } else {
            StatusKind::Unknown
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusKind::Running => "running",
            StatusKind::Stopped => "stopped",
            StatusKind::Error => "error",
            StatusKind::Timeout => "timeout",
            StatusKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Full status row for one device, as served by the device list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyStatusRecord {
    pub proxyid: i64,
    pub message: String,
    #[serde(rename = "proxyServiceAlive")]
    pub proxy_service_alive: String,
    #[serde(rename = "proxyServiceStart")]
    pub proxy_service_start: String,
    pub controller_type: String,
    pub proxy_ip: String,
    pub proxy_port: String,
    pub remark: String,
}

impl ProxyStatusRecord {
    pub fn new(proxyid: i64) -> Self {
        Self {
            proxyid,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> StatusKind {
        StatusKind::classify(
            &self.message,
            &self.proxy_service_alive,
            &self.proxy_service_start,
        )
    }

    /// Merge a pushed update; only fields the update carries are overwritten
    pub fn apply(&mut self, update: &ProxyStatus) {
        self.message = update.message.clone();
        let fields = [
            (&mut self.proxy_service_alive, &update.proxy_service_alive),
            (&mut self.proxy_service_start, &update.proxy_service_start),
            (&mut self.controller_type, &update.controller_type),
            (&mut self.proxy_ip, &update.proxy_ip),
            (&mut self.proxy_port, &update.proxy_port),
            (&mut self.remark, &update.remark),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
    }
}

/// Per-class counts over a set of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub error: usize,
    pub timeout: usize,
    pub unknown: usize,
}

impl StatusSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ProxyStatusRecord>) -> Self {
        let mut summary = StatusSummary::default();
        for record in records {
            summary.total += 1;
            match record.kind() {
                StatusKind::Running => summary.running += 1,
                StatusKind::Stopped => summary.stopped += 1,
                StatusKind::Error => summary.error += 1,
                StatusKind::Timeout => summary.timeout += 1,
                StatusKind::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}

/// Record filter; every populated criterion must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    /// `None` means all classes
    pub status: Option<StatusKind>,
    /// Case-insensitive substring of the controller type
    pub controller_type: Option<String>,
    /// Case-insensitive substring of ip, remark, controller type or message
    pub search: Option<String>,
}

impl StatusFilter {
    pub fn matches(&self, record: &ProxyStatusRecord) -> bool {
        if let Some(kind) = self.status {
            if record.kind() != kind {
                return false;
            }
        }

        if let Some(controller_type) = &self.controller_type {
            if !contains_ignore_case(&record.controller_type, controller_type) {
                return false;
            }
        }

        if let Some(search) = &self.search {
            let hit = [
                &record.proxy_ip,
                &record.remark,
                &record.controller_type,
                &record.message,
            ]
            .iter()
            .any(|field| contains_ignore_case(field, search));
            if !hit {
                return false;
            }
        }

        true
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    ProxyId,
    Message,
    ProxyServiceAlive,
    ProxyServiceStart,
    ControllerType,
    ProxyIp,
    ProxyPort,
    Remark,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl StatusSort {
    pub fn compare(&self, a: &ProxyStatusRecord, b: &ProxyStatusRecord) -> Ordering {
        let ordering = match self.field {
            SortField::ProxyId => a.proxyid.cmp(&b.proxyid),
            SortField::Message => a.message.cmp(&b.message),
            SortField::ProxyServiceAlive => a.proxy_service_alive.cmp(&b.proxy_service_alive),
            SortField::ProxyServiceStart => a.proxy_service_start.cmp(&b.proxy_service_start),
            SortField::ControllerType => a.controller_type.cmp(&b.controller_type),
            SortField::ProxyIp => a.proxy_ip.cmp(&b.proxy_ip),
            SortField::ProxyPort => a.proxy_port.cmp(&b.proxy_port),
            SortField::Remark => a.remark.cmp(&b.remark),
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}
