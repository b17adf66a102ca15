//! Connection state snapshot and subscription records

use crate::transport::QosLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable connection state, handed to listeners as a snapshot
///
/// At most one of `is_connected` / `is_connecting` is set, and
/// `is_reconnecting` is never set together with `is_connected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_reconnecting: bool,
    pub connection_error: Option<String>,
    /// Attempts within the current reconnect cycle
    pub reconnect_attempts: u32,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Coarse state derived from the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn phase(&self) -> ConnectionPhase {
        if self.is_connected {
            ConnectionPhase::Connected
        } else if self.is_connecting {
            ConnectionPhase::Connecting
        } else if self.is_reconnecting {
            ConnectionPhase::Reconnecting
        } else {
            ConnectionPhase::Disconnected
        }
    }

    /// Flag combination is one the client can actually be in
    pub fn is_consistent(&self) -> bool {
        !(self.is_connected && self.is_connecting) && !(self.is_connected && self.is_reconnecting)
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Active subscription, keyed by topic filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub qos: QosLevel,
}

/// Insert or update by topic; never duplicates an entry
pub(crate) fn upsert_subscription(subscriptions: &mut Vec<Subscription>, topic: &str, qos: QosLevel) {
    match subscriptions.iter_mut().find(|s| s.topic == topic) {
        Some(existing) => existing.qos = qos,
        None => subscriptions.push(Subscription {
            topic: topic.to_string(),
            qos,
        }),
    }
}

pub(crate) fn remove_subscription(subscriptions: &mut Vec<Subscription>, topic: &str) -> bool {
    let before = subscriptions.len();
    subscriptions.retain(|s| s.topic != topic);
    subscriptions.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_precedence() {
        let mut state = ConnectionState::default();
        assert_eq!(state.phase(), ConnectionPhase::Disconnected);

        state.is_reconnecting = true;
        assert_eq!(state.phase(), ConnectionPhase::Reconnecting);

        state.is_connecting = true;
        assert_eq!(state.phase(), ConnectionPhase::Connecting);
        assert!(state.is_consistent());

        state.is_connecting = false;
        state.is_reconnecting = false;
        state.is_connected = true;
        assert_eq!(state.phase(), ConnectionPhase::Connected);
        assert!(state.is_consistent());

        state.is_reconnecting = true;
        assert!(!state.is_consistent());
    }

    #[test]
    fn test_subscription_set_semantics() {
        let mut subs = Vec::new();
        upsert_subscription(&mut subs, "a/+", QosLevel::AtMostOnce);
        upsert_subscription(&mut subs, "b/#", QosLevel::AtMostOnce);
        upsert_subscription(&mut subs, "a/+", QosLevel::AtLeastOnce);

        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].qos, QosLevel::AtLeastOnce);

        assert!(remove_subscription(&mut subs, "a/+"));
        assert!(!remove_subscription(&mut subs, "a/+"));
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_value(ConnectionState::default()).unwrap();
        assert_eq!(json["isConnected"], false);
        assert_eq!(json["reconnectAttempts"], 0);
    }
}
