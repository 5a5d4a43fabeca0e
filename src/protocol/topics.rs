//! Topic templates, room identifiers and delivery guarantees
//!
//! Topic templates carry exactly one `{room_id}` placeholder which is replaced
//! by literal string interpolation. Templates are validated when configuration
//! is loaded, never at publish time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Placeholder substituted with the room identifier
pub const ROOM_PLACEHOLDER: &str = "{room_id}";

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("placeholder pattern is valid"));

/// Per-message delivery guarantee offered by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
}

impl DeliveryGuarantee {
    /// MQTT QoS level number for this guarantee
    pub fn qos_level(&self) -> u8 {
        match self {
            DeliveryGuarantee::AtMostOnce => 0,
            DeliveryGuarantee::AtLeastOnce => 1,
        }
    }
}

/// A concrete topic paired with the guarantee it is subscribed at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub topic: String,
    pub guarantee: DeliveryGuarantee,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, guarantee: DeliveryGuarantee) -> Self {
        Self {
            topic: topic.into(),
            guarantee,
        }
    }
}

/// Substitute `room_id` into `template`
///
/// ```
/// use thermoguard::protocol::resolve;
/// assert_eq!(resolve("home/{room_id}/cmd", "kitchen"), "home/kitchen/cmd");
/// ```
pub fn resolve(template: &str, room_id: &str) -> String {
    template.replacen(ROOM_PLACEHOLDER, room_id, 1)
}

/// Check that a template has exactly one `{room_id}` and nothing else to fill in
pub fn validate_template(template: &str) -> Result<(), TopicError> {
    if template.trim().is_empty() {
        return Err(TopicError::EmptyTemplate);
    }

    if template.contains('+') || template.contains('#') {
        return Err(TopicError::WildcardInTemplate(template.to_string()));
    }

    let mut room_placeholders = 0usize;
    for found in PLACEHOLDER_PATTERN.find_iter(template) {
        if found.as_str() == ROOM_PLACEHOLDER {
            room_placeholders += 1;
        } else {
            return Err(TopicError::UnknownPlaceholder {
                template: template.to_string(),
                placeholder: found.as_str().to_string(),
            });
        }
    }

    match room_placeholders {
        0 => Err(TopicError::MissingPlaceholder(template.to_string())),
        1 => Ok(()),
        count => Err(TopicError::MultiplePlaceholders {
            template: template.to_string(),
            count,
        }),
    }
}

/// Room identifiers become topic levels, so they may not contain separators
/// or wildcards.
pub fn validate_room_id(room_id: &str) -> Result<(), TopicError> {
    if room_id.is_empty() {
        return Err(TopicError::EmptyRoomId);
    }

    for ch in room_id.chars() {
        if matches!(ch, '/' | '+' | '#' | '{' | '}') || ch.is_whitespace() {
            return Err(TopicError::InvalidRoomIdChar(ch));
        }
    }

    Ok(())
}

/// Retained presence topic for a client: `iot/services/{client_id}/status`
pub fn presence_topic(client_id: &str) -> String {
    format!("iot/services/{client_id}/status")
}

/// Validated topic template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicTemplate(String);

impl TopicTemplate {
    pub fn parse(template: &str) -> Result<Self, TopicError> {
        validate_template(template)?;
        Ok(Self(template.to_string()))
    }

    pub fn resolve(&self, room_id: &str) -> String {
        resolve(&self.0, room_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TopicTemplate {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_template(&value)?;
        Ok(Self(value))
    }
}

impl From<TopicTemplate> for String {
    fn from(template: TopicTemplate) -> Self {
        template.0
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic template cannot be empty")]
    EmptyTemplate,
    #[error("Topic template '{0}' has no {{room_id}} placeholder")]
    MissingPlaceholder(String),
    #[error("Topic template '{template}' has {count} {{room_id}} placeholders, expected exactly one")]
    MultiplePlaceholders { template: String, count: usize },
    #[error("Topic template '{template}' has unsupported placeholder {placeholder}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },
    #[error("Topic template '{0}' contains an MQTT wildcard")]
    WildcardInTemplate(String),
    #[error("Topic '{0}' is resolved by more than one template")]
    DuplicateTopic(String),
    #[error("Room ID cannot be empty")]
    EmptyRoomId,
    #[error("Room ID contains invalid character: '{0}'")]
    InvalidRoomIdChar(char),
}
