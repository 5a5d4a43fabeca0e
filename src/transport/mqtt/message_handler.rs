//! Pure message routing and payload handling for MQTT events
//!
//! Decoding happens here, at the transport boundary: a payload that is not
//! UTF-8 JSON never reaches the message sink.

use crate::protocol::DeliveryGuarantee;
use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{DisconnectReasonCode, Packet, SubscribeReasonCode};
use rumqttc::v5::{mqttbytes::QoS, ConnectionError, Event, StateError};
use rumqttc::Outgoing;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Why an inbound payload was dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    clean: matches!(
                        disconnect.reason_code,
                        DisconnectReasonCode::NormalDisconnection
                    ),
                    reason: format!("{:?}", disconnect.reason_code),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failures: suback
                        .return_codes
                        .iter()
                        .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .map(|code| format!("{code:?}"))
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// True when the event loop stopped because the broker sent DISCONNECT
    /// with the normal-disconnection reason code (pure function)
    pub fn is_normal_server_disconnect(error: &ConnectionError) -> bool {
        matches!(
            error,
            ConnectionError::MqttState(StateError::ServerDisconnect {
                reason_code: DisconnectReasonCode::NormalDisconnection,
                ..
            })
        )
    }

    /// Decode an inbound payload as UTF-8 JSON (pure function)
    pub fn decode_payload(payload: &[u8]) -> Result<Value, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Encode a message as compact JSON (pure function)
    pub fn encode_payload<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(message)
    }

    /// Map a delivery guarantee to its MQTT QoS (pure function)
    pub fn to_qos(guarantee: DeliveryGuarantee) -> QoS {
        match guarantee {
            DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
            DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker sent DISCONNECT; `clean` for the normal-disconnection reason code
    Disconnected { clean: bool, reason: String },
    /// SubAck with the reason codes of any rejected filters
    SubscriptionConfirmed { packet_id: u16, failures: Vec<String> },
    /// Our own DISCONNECT went out on the wire
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Why a decoded message did not reach the consumer
#[derive(Debug, Error, PartialEq)]
pub enum ForwardError {
    #[error("no message consumer registered")]
    NoConsumer,
    #[error("consumer queue is full")]
    QueueFull,
    #[error("message consumer has stopped")]
    ConsumerStopped,
}

/// Hands decoded messages to the single registered consumer
///
/// Forwarding never waits: the event loop that calls it also drains the
/// outgoing request channel the consumer publishes through.
#[derive(Default)]
pub struct MessageForwarder {
    sender: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        if let Ok(mut slot) = self.sender.lock() {
            *slot = Some(sender);
        }
    }

    /// Forward a decoded message to the consumer without blocking
    pub fn forward(&self, message: InboundMessage) -> Result<(), ForwardError> {
        let sender = self.sender.lock().ok().and_then(|slot| slot.clone());
        let Some(sender) = sender else {
            warn!("Received MQTT message but no message sender configured - message dropped");
            return Err(ForwardError::NoConsumer);
        };

        debug!(topic = %message.topic, "Forwarding inbound message");
        sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ForwardError::QueueFull,
            TrySendError::Closed(_) => ForwardError::ConsumerStopped,
        })
    }
}
