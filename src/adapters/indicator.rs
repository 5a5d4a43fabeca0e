//! Actuator connectors: turn commands into a device state
//!
//! Every command on the room's command topic sets the state (`OFF` when the
//! command carries none) and echoes it as a retained [`ActuatorState`]. The
//! indicator LED and the HVAC unit differ only in their catalog entry.

use crate::config::{HvacConfig, IndicatorConfig};
use crate::protocol::{unix_now, ActuatorState, DeliveryGuarantee, IndicatorState, Subscription};
use crate::service::{publish_json, ServiceHandler};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use tracing::info;

pub struct IndicatorConnector {
    kind: &'static str,
    device_id: String,
    room_id: String,
    command_topic: String,
    state_topic: String,
    state: String,
}

impl IndicatorConnector {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self::with_kind("indicator", config)
    }

    pub fn hvac(config: &HvacConfig) -> Self {
        Self::with_kind("hvac", &config.0)
    }

    fn with_kind(kind: &'static str, config: &IndicatorConfig) -> Self {
        Self {
            kind,
            device_id: config.device_id.clone(),
            room_id: config.room_id.clone(),
            command_topic: config.command_topic_template.resolve(&config.room_id),
            state_topic: config.state_topic_template.resolve(&config.room_id),
            state: IndicatorState::Off.to_string(),
        }
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(
            self.command_topic.clone(),
            DeliveryGuarantee::AtLeastOnce,
        )]
    }

    /// Current device state
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn state_topic(&self) -> &str {
        &self.state_topic
    }

    /// Apply a command payload and return the state to echo
    pub fn apply_command(&mut self, message: &InboundMessage) -> ActuatorState {
        let payload = &message.payload;
        self.state = payload
            .get("state")
            .and_then(|state| state.as_str())
            .unwrap_or(IndicatorState::Off.as_str())
            .to_string();
        let reason = payload
            .get("reason")
            .and_then(|reason| reason.as_str())
            .unwrap_or("N/A");

        info!(
            kind = self.kind,
            device = %self.device_id,
            room_id = %self.room_id,
            state = %self.state,
            reason = %reason,
            "Actuator set"
        );

        ActuatorState {
            ts: unix_now(),
            device: self.device_id.clone(),
            room_id: self.room_id.clone(),
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> ServiceHandler<T> for IndicatorConnector {
    async fn on_message(&mut self, transport: &T, message: InboundMessage) {
        if message.topic != self.command_topic {
            return;
        }
        let state = self.apply_command(&message);
        publish_json(
            transport,
            &self.state_topic,
            &state,
            DeliveryGuarantee::AtLeastOnce,
            true,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TopicTemplate;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn connector() -> IndicatorConnector {
        IndicatorConnector::new(&IndicatorConfig {
            command_topic_template: TopicTemplate::parse("home/{room_id}/indicator/cmd").unwrap(),
            state_topic_template: TopicTemplate::parse("home/{room_id}/indicator/state").unwrap(),
            device_id: "arduino-1".to_string(),
            room_id: "kitchen".to_string(),
        })
    }

    fn command(payload: serde_json::Value) -> InboundMessage {
        InboundMessage {
            topic: "home/kitchen/indicator/cmd".to_string(),
            payload,
            retain: false,
        }
    }

    #[test]
    fn test_subscribes_to_command_topic_at_least_once() {
        let subscriptions = connector().subscriptions();
        assert_eq!(
            subscriptions,
            vec![Subscription::new(
                "home/kitchen/indicator/cmd",
                DeliveryGuarantee::AtLeastOnce
            )]
        );
    }

    #[test]
    fn test_missing_state_defaults_to_off() {
        let mut connector = connector();
        connector.apply_command(&command(json!({"state": "ON"})));
        assert_eq!(connector.state(), "ON");

        let echoed = connector.apply_command(&command(json!({"reason": "manual"})));
        assert_eq!(echoed.state, "OFF");
        assert_eq!(connector.state(), "OFF");
    }

    #[tokio::test]
    async fn test_command_is_echoed_as_retained_state() {
        let mut connector = connector();
        let mut transport = MockTransport::with_client_id("arduino_indicator");
        transport.connect().await.unwrap();

        connector
            .on_message(
                &transport,
                command(json!({"state": "ON", "room_id": "kitchen", "ts": 1, "reason": "OVERHEAT"})),
            )
            .await;

        let echoed = transport.published_on("home/kitchen/indicator/state");
        assert_eq!(echoed.len(), 1);
        assert!(echoed[0].retain);
        assert_eq!(echoed[0].guarantee, DeliveryGuarantee::AtLeastOnce);
        let state = echoed[0].json();
        assert_eq!(state["state"], "ON");
        assert_eq!(state["device"], "arduino-1");
        assert_eq!(state["room_id"], "kitchen");
    }

    #[tokio::test]
    async fn test_hvac_connector_uses_its_own_topics() {
        let mut connector = IndicatorConnector::hvac(&HvacConfig(IndicatorConfig {
            command_topic_template: TopicTemplate::parse("home/{room_id}/hvac/cmd").unwrap(),
            state_topic_template: TopicTemplate::parse("home/{room_id}/hvac/state").unwrap(),
            device_id: "hvac-living".to_string(),
            room_id: "living_room".to_string(),
        }));
        let mut transport = MockTransport::with_client_id("hvac_connector");
        transport.connect().await.unwrap();

        // indicator commands for the same room are not ours
        connector
            .on_message(&transport, command(json!({"state": "ON"})))
            .await;
        assert!(transport.published_on("home/living_room/hvac/state").is_empty());
        assert!(transport.published_on("home/kitchen/indicator/state").is_empty());

        connector
            .on_message(
                &transport,
                InboundMessage {
                    topic: "home/living_room/hvac/cmd".to_string(),
                    payload: json!({"state": "ON"}),
                    retain: false,
                },
            )
            .await;
        let echoed = transport.published_on("home/living_room/hvac/state");
        assert_eq!(echoed.len(), 1);
        assert!(echoed[0].retain);
        assert_eq!(echoed[0].json()["device"], "hvac-living");
        assert_eq!(connector.state(), "ON");
    }
}
