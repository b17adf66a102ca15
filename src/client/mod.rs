//! Resilient pub/sub client
//!
//! [`PubSubClient`] owns one logical broker connection. It tracks the
//! connection lifecycle, keeps bounded newest-first histories of inbound
//! messages and log entries, and fans every state change, message and log
//! entry out to registered listeners.

pub mod history;
pub mod listeners;
pub mod log;
pub mod message;
pub mod pubsub;
pub mod reconnect;
pub mod state;

pub use history::{BoundedHistory, LOG_HISTORY_CAPACITY, MESSAGE_HISTORY_CAPACITY};
pub use listeners::{ListenerFailure, ListenerHandle, ListenerRegistry};
pub use log::{LogEntry, LogLevel, LOG_MIRROR_TARGET};
pub use message::InboundMessage;
pub use pubsub::{PubSubClient, WeakPubSubClient};
pub use reconnect::{ReconnectPolicy, ReconnectionDecision};
pub use state::{ConnectionPhase, ConnectionState, Subscription};
