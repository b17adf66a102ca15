//! Broker transport seam
//!
//! The client never talks to a network library directly. It asks a
//! [`BrokerConnector`] to open a session and then drives that session through
//! [`BrokerSession`] while consuming the ordered [`SessionEvent`] stream the
//! connector hands back. The production implementation lives in [`mqtt`];
//! tests plug in `crate::testing::mocks::MockConnector`.

use crate::config::ConnectionConfig;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Transport level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Request could not be sent")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Rejected by broker: {0}")]
    Rejected(String),
    #[error("Session closed before acknowledgement")]
    SessionClosed,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

impl TransportError {
    pub fn request<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TransportError::RequestFailed(Box::new(error))
    }
}

/// Delivery guarantee requested for a subscribe or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// Returned when a numeric QoS is outside 0..=2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for QosLevel {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        qos.as_u8()
    }
}

impl std::fmt::Display for QosLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Events a session reports, in transport delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Broker acknowledged the session
    Connected,
    /// Broker pushed a message
    Message {
        topic: String,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    },
    /// Session ended without being asked to; no further events follow
    ConnectionLost { reason: String },
}

/// A live broker session
///
/// Each request completes once the broker acknowledges it. QoS 0 publishes
/// complete once handed to the network.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Close the session. Best effort; no events are emitted afterwards.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A session handle paired with its event stream
pub struct OpenedSession {
    pub session: Arc<dyn BrokerSession>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Opens broker sessions
///
/// `open` starts the handshake and returns immediately. The outcome arrives
/// on the event stream as [`SessionEvent::Connected`] or
/// [`SessionEvent::ConnectionLost`].
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn open(&self, config: &ConnectionConfig) -> Result<OpenedSession, TransportError>;
}
