//! Moving-average post-processor
//!
//! Keeps the last `window_size` valid readings per room and republishes their
//! average on the output topic with a fresh timestamp.

use super::simulator::round2;
use crate::config::SmootherConfig;
use crate::observability::metrics;
use crate::protocol::{
    unix_now, validate_room_id, DeliveryGuarantee, Subscription, TelemetryReading, TopicTemplate,
};
use crate::service::{publish_json, ServiceHandler};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

pub struct TelemetrySmoother {
    window_size: usize,
    input_topics: Vec<String>,
    output_template: TopicTemplate,
    windows: HashMap<String, VecDeque<f64>>,
}

impl TelemetrySmoother {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            window_size: config.window_size.max(1),
            input_topics: config
                .rooms
                .iter()
                .map(|room| config.input_topic_template.resolve(room))
                .collect(),
            output_template: config.output_topic_template.clone(),
            windows: HashMap::new(),
        }
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.input_topics
            .iter()
            .map(|topic| Subscription::new(topic.clone(), DeliveryGuarantee::AtMostOnce))
            .collect()
    }

    /// Add a reading to its room's window and return the smoothed reading
    pub fn smooth(&mut self, reading: &TelemetryReading) -> TelemetryReading {
        let window = self
            .windows
            .entry(reading.room_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.window_size));
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(reading.temperature_celsius);

        let average = window.iter().sum::<f64>() / window.len() as f64;
        TelemetryReading::new(
            &reading.source_id,
            unix_now(),
            &reading.room_id,
            round2(average),
        )
    }

    pub fn output_topic(&self, room_id: &str) -> String {
        self.output_template.resolve(room_id)
    }
}

#[async_trait]
impl<T: Transport + 'static> ServiceHandler<T> for TelemetrySmoother {
    async fn on_message(&mut self, transport: &T, message: InboundMessage) {
        metrics().telemetry_received();

        // the payload's room_id becomes a topic level on the way out
        let reading = match TelemetryReading::from_json(&message.payload)
            .map_err(|e| e.to_string())
            .and_then(|reading| {
                validate_room_id(&reading.room_id)
                    .map(|()| reading)
                    .map_err(|e| e.to_string())
            }) {
            Ok(reading) => reading,
            Err(reason) => {
                metrics().telemetry_rejected();
                warn!(topic = %message.topic, reason = %reason, "Skipping invalid reading");
                return;
            }
        };

        let smoothed = self.smooth(&reading);
        let topic = self.output_topic(&smoothed.room_id);
        publish_json(
            transport,
            &topic,
            &smoothed,
            DeliveryGuarantee::AtMostOnce,
            false,
        )
        .await;
    }
}
