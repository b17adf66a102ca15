//! Diagnostic logging for the status feed
//!
//! Client log entries are mirrored into `tracing` when logging is enabled in
//! the connection config; this module installs the subscriber that receives
//! them.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{feed_span, mqtt_span};
