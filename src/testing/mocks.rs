//! Mock implementations for testing
//!
//! `MockTransport` mirrors the observable behaviour of the MQTT client
//! (presence on connect, subscription replay on reconnect, fail-fast publish
//! while disconnected) without a broker.

use crate::observability::metrics;
use crate::protocol::{presence_topic, DeliveryGuarantee, PresenceStatus, Subscription};
use crate::service::Clock;
use crate::transport::mqtt::{ConnectionState, MessageHandler};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

/// A message captured by [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub guarantee: DeliveryGuarantee,
    pub retain: bool,
}

impl PublishedMessage {
    /// Payload decoded as JSON (`Value::Null` if it is not JSON)
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Error)]
#[error("mock transport: {0}")]
pub struct MockTransportError(String);

/// Mock transport for testing
///
/// Cloning yields another handle onto the same recorded state, so a test can
/// keep one while the service under test owns the other.
#[derive(Debug, Clone)]
pub struct MockTransport {
    client_id: String,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    subscribe_log: Arc<Mutex<Vec<Subscription>>>,
    state: Arc<Mutex<Option<ConnectionState>>>,
    sender: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
    fail_connect: bool,
    fail_publish: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_client_id("mock")
    }

    pub fn with_client_id(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            published: Arc::default(),
            subscriptions: Arc::default(),
            subscribe_log: Arc::default(),
            state: Arc::default(),
            sender: Arc::default(),
            fail_connect: false,
            fail_publish: Arc::default(),
        }
    }

    /// A transport whose broker is unreachable
    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    /// Make every publish fail while the connection stays up
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.published)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear_published(&self) {
        lock(&self.published).clear();
    }

    /// Subscriptions currently remembered for replay
    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.subscriptions).clone()
    }

    /// Every subscription ever issued to the "broker", including replays
    pub fn subscribe_log(&self) -> Vec<Subscription> {
        lock(&self.subscribe_log).clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = Some(state);
    }

    /// What the real client does on every ConnAck
    fn acknowledge_connection(&self) {
        let replay = self.subscriptions();
        lock(&self.subscribe_log).extend(replay);

        if let Ok(payload) = MessageHandler::encode_payload(&PresenceStatus::online()) {
            lock(&self.published).push(PublishedMessage {
                topic: presence_topic(&self.client_id),
                payload,
                guarantee: DeliveryGuarantee::AtLeastOnce,
                retain: true,
            });
        }
        self.set_state(ConnectionState::Connected);
    }

    /// Drop the connection as a network failure would
    pub fn simulate_connection_loss(&self, reason: &str) {
        self.set_state(ConnectionState::Disconnected(reason.to_string()));
    }

    /// The supervisor is backing off before `attempt`
    pub fn simulate_reconnecting(&self, attempt: u32) {
        self.set_state(ConnectionState::Reconnecting(attempt));
    }

    /// A new ConnAck: presence is re-announced and subscriptions replayed
    pub fn simulate_reconnect(&self) {
        self.acknowledge_connection();
    }

    pub fn simulate_permanent_failure(&self, reason: &str) {
        self.set_state(ConnectionState::PermanentlyDisconnected(reason.to_string()));
    }

    /// Deliver a JSON payload as if it arrived from the broker
    ///
    /// Returns false when nothing was delivered (not connected, not
    /// subscribed, no sink or the sink has stopped).
    pub async fn inject(&self, topic: &str, payload: Value) -> bool {
        self.inject_with_retain(topic, payload, false).await
    }

    pub async fn inject_with_retain(&self, topic: &str, payload: Value, retain: bool) -> bool {
        let connected = matches!(*lock(&self.state), Some(ConnectionState::Connected));
        let subscribed = lock(&self.subscriptions).iter().any(|s| s.topic == topic);
        let sender = lock(&self.sender).clone();

        match sender {
            Some(sender) if connected && subscribed => {
                metrics().mqtt_message_received();
                sender
                    .send(InboundMessage {
                        topic: topic.to_string(),
                        payload,
                        retain,
                    })
                    .await
                    .is_ok()
            }
            _ => false,
        }
    }

    /// Deliver raw bytes through the same decoding boundary as the real client
    pub async fn inject_raw(&self, topic: &str, payload: &[u8]) -> bool {
        match MessageHandler::decode_payload(payload) {
            Ok(value) => self.inject(topic, value).await,
            Err(e) => {
                metrics().mqtt_message_received();
                metrics().malformed_payload();
                tracing::warn!(topic = %topic, error = %e, "Dropping malformed payload");
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.fail_connect {
            self.set_state(ConnectionState::Disconnected(
                "Mock broker unreachable".to_string(),
            ));
            return Err(MockTransportError("broker unreachable".to_string()));
        }
        self.acknowledge_connection();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.set_state(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));
        Ok(())
    }

    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError("not connected".to_string()));
        }
        let mut recorded = lock(&self.subscriptions);
        for subscription in subscriptions {
            match recorded.iter_mut().find(|r| r.topic == subscription.topic) {
                Some(existing) => existing.guarantee = subscription.guarantee,
                None => recorded.push(subscription.clone()),
            }
        }
        lock(&self.subscribe_log).extend_from_slice(subscriptions);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError(format!(
                "not connected: {:?}",
                self.connection_state()
            )));
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MockTransportError("publish failure".to_string()));
        }

        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            guarantee,
            retain,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(*lock(&self.state), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        lock(&self.state).clone()
    }

    fn is_permanently_disconnected(&self) -> bool {
        matches!(
            *lock(&self.state),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *lock(&self.sender) = Some(sender);
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
