//! Inbound messages as stored in history and handed to listeners

use crate::protocol::status::ProxyStatus;
use crate::transport::QosLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub topic: String,
    /// Payload decoded as UTF-8, invalid sequences replaced
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub qos: QosLevel,
    pub retain: bool,
    /// Decoded record for messages under the status namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProxyStatus>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: &[u8], qos: QosLevel, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            received_at: Utc::now(),
            qos,
            retain,
            status: None,
        }
    }
}
