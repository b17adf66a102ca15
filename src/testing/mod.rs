//! Testing utilities and mock implementations
//!
//! Provides an in-memory broker so the client can be exercised without a
//! running MQTT server.

pub mod mocks;

pub use mocks::*;
