//! Connection state, reconnection policy and broker options
//!
//! Everything here is pure: no sockets are opened and no tasks spawned.

use crate::config::BrokerConfig;
use crate::protocol::{presence_topic, PresenceStatus};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use std::time::Duration;
use thiserror::Error;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// ConnAck received, ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Reconnection attempts exhausted
    PermanentlyDisconnected(String),
}

/// Reconnection policy: capped exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt
    pub initial_delay_ms: u64,
    /// Ceiling for the doubled delay
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Sum of all backoff delays, `None` when retries are unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Delay before `attempt` (1-based): 1s, 2s, 4s, ... capped at `max_delay_ms`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker configuration: {0}")]
    InvalidBrokerConfig(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Broker options for `client_id`, including the retained OFFLINE last will
/// on the client's presence topic
pub fn configure_mqtt_options(
    client_id: &str,
    broker: &BrokerConfig,
) -> Result<MqttOptions, MqttError> {
    broker
        .validate()
        .map_err(|e| MqttError::InvalidBrokerConfig(e.to_string()))?;

    let mut mqtt_options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    mqtt_options.set_keep_alive(Duration::from_secs(broker.keepalive));
    // Subscriptions are re-issued by the client after every ConnAck
    mqtt_options.set_clean_start(true);

    let lwt_payload =
        serde_json::to_vec(&PresenceStatus::offline()).map_err(MqttError::SerializationError)?;
    let lwt = LastWill::new(
        presence_topic(client_id),
        lwt_payload,
        QoS::AtLeastOnce,
        true,
        None,
    );
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}
