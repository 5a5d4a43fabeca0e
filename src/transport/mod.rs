//! Transport layer for service communication
//!
//! This module provides the transport abstraction and its MQTT implementation.
//! Services and adapters only talk to the [`Transport`] trait so they can run
//! against [`crate::testing::mocks::MockTransport`] in tests.

use crate::protocol::{DeliveryGuarantee, Subscription};
use serde_json::Value;

pub mod mqtt;

/// A decoded message delivered to the registered sink
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

/// Transport trait for pub/sub messaging
///
/// Implementations remember every subscription and re-issue it after a
/// reconnect, and deliver inbound payloads already decoded as JSON.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker; returns once the connection is acknowledged
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Clean disconnect; the broker does not publish the last will
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to every topic at its own delivery guarantee
    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), Self::Error>;

    /// Publish a raw payload
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<crate::transport::mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;

    /// Register the single consumer of inbound messages
    fn set_message_sender(&self, sender: tokio::sync::mpsc::Sender<InboundMessage>);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
