//! Error types for the status feed
//!
//! Each concern carries its own enum: configuration errors live in
//! [`crate::config`], transport errors in [`crate::transport`], status decode
//! errors in [`crate::protocol::status`]. Operation errors surfaced to callers
//! of the client are [`ClientError`]; [`FeedError`] aggregates everything for
//! the binary.

use crate::config::ConfigError;
use crate::protocol::status::DecodeError;
use crate::protocol::topics::TopicError;
use crate::transport::{InvalidQos, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("No broker acknowledgement within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connect attempt cancelled by disconnect")]
    Cancelled,

    #[error("Invalid topic '{topic}': {source}")]
    InvalidTopic {
        topic: String,
        #[source]
        source: TopicError,
    },

    #[error(transparent)]
    InvalidQos(#[from] InvalidQos),

    #[error("Subscribe to '{topic}' failed")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("Unsubscribe from '{topic}' failed")]
    Unsubscribe {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("Publish to '{topic}' failed")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },
}

impl ClientError {
    pub fn invalid_topic(topic: &str, source: TopicError) -> Self {
        ClientError::InvalidTopic {
            topic: topic.to_string(),
            source,
        }
    }

    /// True for failures the broker or network produced, as opposed to misuse
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout(_)
                | ClientError::ConnectionFailed(_)
                | ClientError::Subscribe { .. }
                | ClientError::Unsubscribe { .. }
                | ClientError::Publish { .. }
        )
    }
}

/// Top-level error for the library's consumers and the binary
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_operation_errors_keep_their_source() {
        let error = ClientError::Publish {
            topic: "a/b".to_string(),
            source: TransportError::Rejected("quota exceeded".to_string()),
        };

        assert_eq!(error.to_string(), "Publish to 'a/b' failed");
        assert!(error.is_transport());
        let source = error.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Rejected by broker: quota exceeded"));
    }

    #[test]
    fn test_misuse_is_not_transport() {
        assert!(!ClientError::NotConnected.is_transport());
        assert!(!ClientError::invalid_topic("", TopicError::Empty).is_transport());
    }

    #[test]
    fn test_feed_error_conversion() {
        let error: FeedError = ClientError::NotConnected.into();
        assert!(matches!(error, FeedError::Client(ClientError::NotConnected)));
        assert_eq!(error.to_string(), "Client error: Not connected to broker");
    }
}
