//! MQTT v5 client with presence announcement and supervised reconnection
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection state, backoff policy and broker options
//! - [`message_handler`] - Event routing and JSON payload boundary
//! - [`health_monitor`] - Reconnection decisions and state transitions
//! - [`client`] - The event loop supervisor and publish/subscribe I/O
//!
//! # Usage
//!
//! ```rust,no_run
//! use thermoguard::config::BrokerConfig;
//! use thermoguard::protocol::{DeliveryGuarantee, Subscription};
//! use thermoguard::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerConfig {
//!     host: "localhost".to_string(),
//!     port: 1883,
//!     keepalive: 60,
//! };
//!
//! let mut client = MqttClient::new("alert_strategy", broker)?;
//! client.connect().await?;
//! client
//!     .subscribe(&[Subscription::new(
//!         "home/kitchen/temperature",
//!         DeliveryGuarantee::AtMostOnce,
//!     )])
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{
    DecodeError, EventRoute, ForwardError, MessageForwarder, MessageHandler,
};
