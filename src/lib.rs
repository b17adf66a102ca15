//! Device Status Feed
//!
//! A resilient publish/subscribe client for device and proxy status
//! dashboards, speaking MQTT v5 over WebSockets.
//!
//! # Overview
//!
//! - [`config`] reads the connection parameters from the environment or a
//!   TOML file and derives the client identifier
//! - [`client::PubSubClient`] owns the broker connection: lifecycle state,
//!   automatic fixed-delay reconnects, bounded message and log histories, and
//!   listener fan-out
//! - [`store::FeedStore`] mirrors a client through its listeners and keeps a
//!   per-device status board
//! - [`transport`] is the broker seam, implemented on `rumqttc`
//!
//! # Quick Start
//!
//! ```no_run
//! use device_status_feed::{FeedConfig, FeedStore, PubSubClient};
//!
//! # async fn run() -> device_status_feed::FeedResult<()> {
//! let config = FeedConfig::from_env()?;
//! let client = PubSubClient::with_rumqttc(config.enabled_connection()?.clone())?;
//!
//! let store = FeedStore::new();
//! let binding = store.attach(&client);
//!
//! let updates = client.add_message_listener(|message| {
//!     if let Some(status) = &message.status {
//!         println!("{:?} is {}", status.proxyid, status.kind());
//!     }
//! });
//!
//! client.connect().await?;
//! println!("{:?}", store.summary());
//!
//! client.disconnect().await?;
//! updates.remove();
//! binding.detach();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod store;
pub mod testing;
pub mod transport;

pub use client::{
    ConnectionPhase, ConnectionState, InboundMessage, ListenerHandle, LogEntry, LogLevel,
    PubSubClient, Subscription,
};
pub use config::{ConfigError, ConnectionConfig, FeedConfig, TransportScheme};
pub use error::{ClientError, FeedError, FeedResult};
pub use protocol::*;
pub use store::{DeviceStatusBoard, FeedStore, StoreBinding};
pub use transport::{QosLevel, TransportError};
