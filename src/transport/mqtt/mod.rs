//! rumqttc-backed implementation of the broker seam
//!
//! The module separates pure pieces from I/O:
//!
//! - [`connection`] - connection config to `MqttOptions`
//! - [`message_handler`] - classification of polled rumqttc events
//! - [`acks`] - pairing requests with their acknowledgements
//! - [`session`] - the connector, the session handle and the event pump
//!
//! # Usage
//!
//! ```rust,no_run
//! use device_status_feed::config::ConnectionConfig;
//! use device_status_feed::transport::mqtt::RumqttcConnector;
//! use device_status_feed::PubSubClient;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let client = PubSubClient::new(ConnectionConfig::default(), Arc::new(RumqttcConnector::new()))?;
//! client.connect().await?;
//! client.subscribe("mcs/events/ProxyService/status/+", Default::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod acks;
pub mod connection;
pub mod message_handler;
pub mod session;

pub use acks::{AckTracker, RequestKind};
pub use connection::configure_mqtt_options;
pub use message_handler::{Ack, EventRoute, MessageHandler, SentRequest};
pub use session::{RumqttcConnector, RumqttcSession};
