//! Service runtime shared by the alert engine and the adapters
//!
//! A service is a [`ServiceHandler`] driven by a [`ServiceLifecycle`]: the
//! lifecycle owns the transport connection and feeds the handler one inbound
//! message at a time from a single consumer task.

pub mod dispatcher;
pub mod lifecycle;
pub mod runner;

pub use dispatcher::{AlertDispatcher, Clock, DispatchOutcome, SystemClock};
pub use lifecycle::ServiceLifecycle;
pub use runner::{load_config, run_service, ConfigSource, ServiceArgs};

use crate::observability::metrics;
use crate::protocol::DeliveryGuarantee;
use crate::transport::mqtt::MessageHandler;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Message-driven service logic
///
/// Handlers never see the connection: they get a shared reference to the
/// transport for publishing and are otherwise plain owned state.
#[async_trait]
pub trait ServiceHandler<T: Transport>: Send + 'static {
    async fn on_message(&mut self, transport: &T, message: InboundMessage);

    /// Period of [`ServiceHandler::on_tick`]; `None` disables ticking
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    async fn on_tick(&mut self, _transport: &T) {}
}

/// Encode `message` as compact JSON and publish it once
///
/// Failures are logged and counted, never retried. Returns whether the
/// transport accepted the message.
pub async fn publish_json<T, M>(
    transport: &T,
    topic: &str,
    message: &M,
    guarantee: DeliveryGuarantee,
    retain: bool,
) -> bool
where
    T: Transport,
    M: Serialize + Sync,
{
    let payload = match MessageHandler::encode_payload(message) {
        Ok(payload) => payload,
        Err(e) => {
            metrics().mqtt_publish_failed();
            error!(topic = %topic, error = %e, "Failed to encode message");
            return false;
        }
    };

    match transport.publish(topic, payload, guarantee, retain).await {
        Ok(()) => {
            metrics().mqtt_message_published();
            debug!(topic = %topic, retain, "Published message");
            true
        }
        Err(e) => {
            metrics().mqtt_publish_failed();
            error!(topic = %topic, error = %e, "Publish failed");
            false
        }
    }
}
