//! Topic validation and wildcard matching for the status feed
//!
//! Implements the MQTT topic-name and topic-filter rules the client relies on
//! before anything reaches the broker, plus the reserved status namespace
//! that the remote system publishes proxy status updates under.

use thiserror::Error;

/// Namespace prefix for proxy service status updates
pub const STATUS_TOPIC_PREFIX: &str = "mcs/events/ProxyService/status/";

/// Wildcard subscription covering the status of every device
pub const STATUS_TOPIC_FILTER: &str = "mcs/events/ProxyService/status/+";

/// Maximum encoded length of a topic per MQTT
const MAX_TOPIC_LEN: usize = 65_535;

/// Topic validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("Topic name '{0}' must not contain wildcards")]
    WildcardInName(String),
    #[error("Invalid wildcard placement in filter '{0}'")]
    InvalidWildcard(String),
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}

/// Validate a topic name used for publishing (no wildcards allowed)
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInName(topic.to_string()));
    }
    Ok(())
}

/// Validate a subscription filter.
///
/// `+` must occupy a whole level. `#` must occupy a whole level and be the
/// last one.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        let has_multi = level.contains('#');
        let has_single = level.contains('+');

        if has_multi && (*level != "#" || index != last) {
            return Err(TopicError::InvalidWildcard(filter.to_string()));
        }
        if has_single && *level != "+" {
            return Err(TopicError::InvalidWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// Check whether a concrete topic matches a subscription filter.
///
/// Topics starting with `$` are never matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// True when the topic falls under the reserved status namespace
///
/// This is a prefix test, so nested levels below a device still count.
pub fn is_status_topic(topic: &str) -> bool {
    topic.starts_with(STATUS_TOPIC_PREFIX)
}

/// Extract the device identifier level from a status topic
pub fn device_id_from_status_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix(STATUS_TOPIC_PREFIX)?;
    rest.split('/').next().filter(|level| !level.is_empty())
}

/// Topic construction for the status namespace
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build a device status topic: `mcs/events/ProxyService/status/{device_id}`
    pub fn build_status_topic(device_id: impl std::fmt::Display) -> String {
        format!("{STATUS_TOPIC_PREFIX}{device_id}")
    }
}
