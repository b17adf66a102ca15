//! Pure reconnection decisions
//!
//! The delay between attempts is fixed. Attempts are counted per reconnect
//! cycle; a successful connect resets the counter.

use crate::config::ConnectionConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            enabled: config.reconnect_enabled,
            max_attempts: config.reconnect_max_attempts,
            delay: config.reconnect_delay,
        }
    }

    /// Decide what follows an unrequested session loss
    pub fn decide(&self, current_attempts: u32) -> ReconnectionDecision {
        if !self.enabled {
            return ReconnectionDecision::AbortDisabled;
        }
        if current_attempts >= self.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }
        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay: self.delay,
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Schedule attempt number `attempt` after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Automatic reconnect is switched off
    AbortDisabled,
    AbortMaxAttemptsExceeded,
}
