//! Observer dashboard: logs every message on the configured topics

use crate::config::MonitorConfig;
use crate::protocol::{DeliveryGuarantee, Subscription};
use crate::service::ServiceHandler;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tracing::info;

pub struct TelemetryMonitor {
    subscriptions: Vec<Subscription>,
}

impl TelemetryMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        let subscriptions = config
            .rooms
            .iter()
            .flat_map(|room| {
                config.topic_templates.iter().map(move |template| {
                    // Actuator state is retained and worth not missing
                    let guarantee = if template.as_str().ends_with("/state") {
                        DeliveryGuarantee::AtLeastOnce
                    } else {
                        DeliveryGuarantee::AtMostOnce
                    };
                    Subscription::new(template.resolve(room), guarantee)
                })
            })
            .collect();
        Self { subscriptions }
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.clone()
    }
}

/// ISO-8601 rendering of a payload's `ts`, `n/a` when absent or invalid
pub fn payload_timestamp(payload: &Value) -> String {
    payload
        .get("ts")
        .and_then(Value::as_i64)
        .filter(|ts| *ts != 0)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string())
}

#[async_trait]
impl<T: Transport + 'static> ServiceHandler<T> for TelemetryMonitor {
    async fn on_message(&mut self, _transport: &T, message: InboundMessage) {
        info!(
            topic = %message.topic,
            ts = %payload_timestamp(&message.payload),
            retained = message.retain,
            payload = %message.payload,
            "Message observed"
        );
    }
}
