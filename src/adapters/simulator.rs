//! Simulated temperature sensor
//!
//! Publishes a uniformly random reading in [23.5, 27.5) every `sampling_s`
//! seconds, at-most-once, like a Raspberry Pi sensor would.

use crate::config::PublisherConfig;
use crate::protocol::{unix_now, DeliveryGuarantee, TelemetryReading};
use crate::service::{publish_json, ServiceHandler};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rand::Rng;
use std::ops::Range;
use std::time::Duration;
use tracing::debug;

const TEMPERATURE_RANGE: Range<f64> = 23.5..27.5;

pub struct TemperatureSimulator {
    device_id: String,
    room_id: String,
    topic: String,
    sampling: Duration,
}

impl TemperatureSimulator {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            room_id: config.room_id.clone(),
            topic: config.topic_template.resolve(&config.room_id),
            sampling: Duration::from_secs_f64(config.sampling_s),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn sample(&self) -> TelemetryReading {
        let temperature = rand::rng().random_range(TEMPERATURE_RANGE);
        TelemetryReading::new(
            &self.device_id,
            unix_now(),
            &self.room_id,
            round2(temperature),
        )
    }
}

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
impl<T: Transport + 'static> ServiceHandler<T> for TemperatureSimulator {
    async fn on_message(&mut self, _transport: &T, _message: InboundMessage) {}

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.sampling)
    }

    async fn on_tick(&mut self, transport: &T) {
        let reading = self.sample();
        debug!(
            room_id = %reading.room_id,
            temperature_celsius = reading.temperature_celsius,
            "Publishing simulated reading"
        );
        publish_json(
            transport,
            &self.topic,
            &reading,
            DeliveryGuarantee::AtMostOnce,
            false,
        )
        .await;
    }
}
