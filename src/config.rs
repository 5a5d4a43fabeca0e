//! Service configuration
//!
//! Every service receives a broker descriptor and its own configuration
//! document, either from the home catalog or from a local TOML file with
//! `[broker]` and `[service]` tables. All documents are validated before any
//! connection is attempted; there are no fallback thresholds or topics.

use crate::engine::AlertThresholds;
use crate::protocol::{validate_room_id, TopicError, TopicTemplate};
use crate::routing::{TopicCategory, TopicRouter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Broker address as published by the catalog's `/mqtt` endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
}

fn default_keepalive() -> u64 {
    60
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be greater than 0".to_string(),
            ));
        }
        // MQTT carries keep-alive as a 16-bit number of seconds
        if self.keepalive > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker keepalive must be at most {} seconds, got {}",
                u16::MAX,
                self.keepalive
            )));
        }
        Ok(())
    }
}

/// A per-service configuration document
pub trait ServiceConfig: DeserializeOwned + Serialize + Send + Sync {
    /// Name the service is registered under in the catalog; also used as the
    /// broker client id.
    const SERVICE_NAME: &'static str;

    fn validate(&self) -> Result<(), ConfigError>;
}

/// Configuration of the alert engine service (`alert_strategy`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEngineConfig {
    pub input_topic_template: TopicTemplate,
    pub alert_topic_template: TopicTemplate,
    pub indicator_topic_template: TopicTemplate,
    /// Actuator echo topic; when present the service also tracks actuator state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_topic_template: Option<TopicTemplate>,
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub cooldown_s: i64,
    pub rooms: Vec<String>,
}

impl AlertEngineConfig {
    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            high_threshold: self.high_threshold,
            low_threshold: self.low_threshold,
            cooldown_s: self.cooldown_s,
        }
    }

    /// Resolve every configured template for every room
    pub fn router(&self) -> Result<TopicRouter, TopicError> {
        let mut templates = vec![
            (TopicCategory::Telemetry, self.input_topic_template.clone()),
            (TopicCategory::Alert, self.alert_topic_template.clone()),
            (
                TopicCategory::Indicator,
                self.indicator_topic_template.clone(),
            ),
        ];
        if let Some(status) = &self.status_topic_template {
            templates.push((TopicCategory::Status, status.clone()));
        }
        TopicRouter::new(&self.rooms, &templates)
    }
}

impl ServiceConfig for AlertEngineConfig {
    const SERVICE_NAME: &'static str = "alert_strategy";

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.high_threshold.is_finite() || !self.low_threshold.is_finite() {
            return Err(ConfigError::InvalidConfig(
                "thresholds must be finite numbers".to_string(),
            ));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(ConfigError::InvalidConfig(format!(
                "low_threshold ({}) must be below high_threshold ({})",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.cooldown_s < 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "cooldown_s cannot be negative, got {}",
                self.cooldown_s
            )));
        }
        validate_rooms(&self.rooms)?;
        self.router()?;
        Ok(())
    }
}

/// Configuration of the indicator connector (`arduino_indicator`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorConfig {
    pub command_topic_template: TopicTemplate,
    pub state_topic_template: TopicTemplate,
    pub device_id: String,
    pub room_id: String,
}

impl ServiceConfig for IndicatorConfig {
    const SERVICE_NAME: &'static str = "arduino_indicator";

    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("device_id", &self.device_id)?;
        validate_room_id(&self.room_id)?;
        if self.command_topic_template.resolve(&self.room_id)
            == self.state_topic_template.resolve(&self.room_id)
        {
            return Err(ConfigError::InvalidConfig(
                "command and state topics must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the HVAC connector (`hvac_connector`); same shape as the
/// indicator's
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct HvacConfig(pub IndicatorConfig);

impl ServiceConfig for HvacConfig {
    const SERVICE_NAME: &'static str = "hvac_connector";

    fn validate(&self) -> Result<(), ConfigError> {
        self.0.validate()
    }
}

/// Configuration of the simulated sensor (`rpi_temperature_publisher`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    pub topic_template: TopicTemplate,
    /// Seconds between two samples
    pub sampling_s: f64,
    pub room_id: String,
    pub device_id: String,
}

impl ServiceConfig for PublisherConfig {
    const SERVICE_NAME: &'static str = "rpi_temperature_publisher";

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.sampling_s.is_finite() || self.sampling_s <= 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "sampling_s must be a positive number, got {}",
                self.sampling_s
            )));
        }
        require_non_empty("device_id", &self.device_id)?;
        validate_room_id(&self.room_id)?;
        Ok(())
    }
}

/// Configuration of the moving-average post-processor (`postprocess_time_shift`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmootherConfig {
    pub window_size: usize,
    pub input_topic_template: TopicTemplate,
    pub output_topic_template: TopicTemplate,
    pub rooms: Vec<String>,
}

impl ServiceConfig for SmootherConfig {
    const SERVICE_NAME: &'static str = "postprocess_time_shift";

    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.input_topic_template == self.output_topic_template {
            return Err(ConfigError::InvalidConfig(
                "input and output topic templates must differ".to_string(),
            ));
        }
        validate_rooms(&self.rooms)
    }
}

/// Configuration of the observer dashboard (`dashboard_consumer`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    pub topic_templates: Vec<TopicTemplate>,
    pub rooms: Vec<String>,
}

impl ServiceConfig for MonitorConfig {
    const SERVICE_NAME: &'static str = "dashboard_consumer";

    fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_templates.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "topic_templates cannot be empty".to_string(),
            ));
        }
        validate_rooms(&self.rooms)
    }
}

/// Local configuration file: `[broker]` plus the service's own `[service]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound = "T: ServiceConfig")]
pub struct ServiceFile<T> {
    pub broker: BrokerConfig,
    pub service: T,
}

impl<T: ServiceConfig> ServiceFile<T> {
    /// Load and validate a TOML configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: ServiceFile<T> = toml::from_str(&content)?;
        file.broker.validate()?;
        file.service.validate()?;
        Ok(file)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid topic configuration: {0}")]
    Topic(#[from] TopicError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} cannot be empty"
        )));
    }
    Ok(())
}

fn validate_rooms(rooms: &[String]) -> Result<(), ConfigError> {
    if rooms.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "rooms cannot be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for room in rooms {
        validate_room_id(room)?;
        if !seen.insert(room.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "room '{room}' is listed more than once"
            )));
        }
    }
    Ok(())
}
