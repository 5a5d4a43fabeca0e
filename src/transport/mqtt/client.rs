//! Impure I/O operations for MQTT client
//!
//! The event loop runs in a supervisor task that owns the rumqttc
//! `EventLoop`. It announces presence and re-issues subscriptions on every
//! ConnAck, decodes inbound payloads and replaces the connection with capped
//! exponential backoff after abnormal disconnects.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, ForwardError, MessageForwarder, MessageHandler};
use crate::config::BrokerConfig;
use crate::observability::metrics;
use crate::protocol::{presence_topic, DeliveryGuarantee, PresenceStatus, Subscription};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Filter;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, ConnectionError, Event, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the supervisor before aborting it
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT transport client with presence and supervised reconnection
pub struct MqttClient {
    client_id: String,
    broker: BrokerConfig,
    client: Arc<Mutex<AsyncClient>>,
    // Moved into the supervisor by `connect`; EventLoop itself is not Sync
    event_loop: Option<Mutex<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    disconnect_requested: Arc<AtomicBool>,
    reconnect_config: ReconnectConfig,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    message_forwarder: Arc<MessageForwarder>,
}

impl MqttClient {
    /// Create a client; nothing touches the network until `connect`
    pub fn new(client_id: &str, broker: BrokerConfig) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(client_id, &broker)?;

        Ok(MqttClient {
            client_id: client_id.to_string(),
            broker,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Mutex::new(event_loop)),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            disconnect_requested: Arc::new(AtomicBool::new(false)),
            reconnect_config: ReconnectConfig::default(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            message_forwarder: Arc::new(MessageForwarder::new()),
        })
    }

    /// Replace the default reconnection policy
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Result<Self, MqttError> {
        HealthMonitor::validate_connection_config(&config)
            .map_err(MqttError::InvalidBrokerConfig)?;
        self.reconnect_config = config;
        Ok(self)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Create a new client/event loop pair for the initial connection and
    /// for every reconnection attempt
    fn create_connection(
        client_id: &str,
        broker: &BrokerConfig,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(client_id, broker)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Connect to the broker and return once the first ConnAck arrives
    ///
    /// A broker that cannot be reached here is an error for the caller; the
    /// supervisor only reconnects after a connection has been established.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .map(Mutex::into_inner)
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);
        self.disconnect_requested.store(false, Ordering::SeqCst);

        info!(
            client_id = %self.client_id,
            host = %self.broker.host,
            port = self.broker.port,
            "Connecting to MQTT broker"
        );
        metrics().mqtt_connection_attempt();

        let supervisor = Supervisor {
            client_id: self.client_id.clone(),
            broker: self.broker.clone(),
            reconnect_config: self.reconnect_config.clone(),
            shared_client: self.client.clone(),
            subscriptions: self.subscriptions.clone(),
            forwarder: self.message_forwarder.clone(),
            state_tx,
            shutdown_rx,
            disconnect_requested: self.disconnect_requested.clone(),
            reconnect_attempts: 0,
            has_connected: false,
        };
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop)));

        let connection_timeout =
            HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, connection_timeout).await
        {
            metrics().mqtt_connection_failed();
            self.stop_supervisor();
            return Err(e);
        }

        Ok(())
    }

    /// Clean disconnect: the broker discards the last will, so no OFFLINE
    /// status is published here
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(mut handle) = self.event_loop_handle.take() else {
            debug!(client_id = %self.client_id, "Disconnect requested before connect");
            return Ok(());
        };

        self.disconnect_requested.store(true, Ordering::SeqCst);
        {
            let client = self.client.lock().await;
            if let Err(e) = client.disconnect().await {
                // The supervisor may already have stopped (permanent failure)
                debug!(error = %e, "Could not queue MQTT DISCONNECT");
            }
        }

        match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                if let Some(shutdown_tx) = &self.shutdown_tx {
                    let _ = shutdown_tx.send(true);
                }
                handle.abort();
            }
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(HealthMonitor::determine_next_state(
                ConnectionEvent::ClientDisconnected,
            ));
        }
        metrics().mqtt_connection_lost();

        info!(client_id = %self.client_id, "MQTT client disconnected");
        Ok(())
    }

    fn stop_supervisor(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected: state_rx is None".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    /// Subscribe to each topic at its own QoS and remember it for reconnects
    pub async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), MqttError> {
        if let Some(state_rx) = &self.state_rx {
            let current_state = state_rx.borrow().clone();
            if !HealthMonitor::can_subscribe(&current_state) {
                return Err(MqttError::NotConnected {
                    state: current_state,
                });
            }
        } else {
            return Err(MqttError::ConnectionFailedStr(
                "Client not connected: cannot subscribe".to_string(),
            ));
        }

        if subscriptions.is_empty() {
            return Ok(());
        }

        {
            let client = self.client.lock().await;
            client
                .subscribe_many(to_filters(subscriptions))
                .await
                .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        }

        let mut recorded = self.subscriptions.lock().await;
        for subscription in subscriptions {
            match recorded.iter_mut().find(|r| r.topic == subscription.topic) {
                Some(existing) => existing.guarantee = subscription.guarantee,
                None => recorded.push(subscription.clone()),
            }
            debug!(
                topic = %subscription.topic,
                qos = subscription.guarantee.qos_level(),
                "Subscribed"
            );
        }

        info!(count = subscriptions.len(), "Subscribed to topics");
        Ok(())
    }

    /// Publish a raw payload; fails fast while not connected
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let client = self.client.lock().await;
        client
            .publish(topic, MessageHandler::to_qos(guarantee), retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(
            topic = %topic,
            qos = guarantee.qos_level(),
            retain = retain,
            "Published message"
        );
        Ok(())
    }

    /// Register the consumer of decoded inbound messages
    pub fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.message_forwarder.set_sender(sender);
    }
}

fn to_filters(subscriptions: &[Subscription]) -> Vec<Filter> {
    subscriptions
        .iter()
        .map(|s| Filter::new(s.topic.clone(), MessageHandler::to_qos(s.guarantee)))
        .collect()
}

/// Owns the event loop and everything needed to replace it
struct Supervisor {
    client_id: String,
    broker: BrokerConfig,
    reconnect_config: ReconnectConfig,
    shared_client: Arc<Mutex<AsyncClient>>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    forwarder: Arc<MessageForwarder>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    disconnect_requested: Arc<AtomicBool>,
    reconnect_attempts: u32,
    has_connected: bool,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!(client_id = %self.client_id, "Starting MQTT event loop supervisor");

        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown_requested(self.shutdown_rx.clone()) => {
                    info!("Shutdown signal received, stopping reconnection supervisor");
                    break;
                }
                result = event_loop.poll() => result,
            };

            let keep_running = match polled {
                Ok(event) => self.handle_event(event, &mut event_loop).await,
                Err(e) => self.handle_error(e, &mut event_loop).await,
            };
            if !keep_running {
                break;
            }
        }

        metrics().mqtt_connection_lost();
        info!(client_id = %self.client_id, "MQTT event loop stopped");
    }

    fn set_state(&self, event: ConnectionEvent) {
        let _ = self.state_tx.send(HealthMonitor::determine_next_state(event));
    }

    fn disconnect_was_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::SeqCst)
    }

    /// Returns true to keep polling
    async fn handle_event(&mut self, event: Event, event_loop: &mut EventLoop) -> bool {
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged => {
                self.on_connack().await;
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                self.on_message(topic, &payload, retain);
                true
            }
            EventRoute::Disconnected { clean, reason } => {
                if clean || self.disconnect_was_requested() {
                    info!(reason = %reason, "Broker closed the session normally");
                    self.set_state(ConnectionEvent::ClientDisconnected);
                    return false;
                }
                self.set_state(ConnectionEvent::DisconnectedByBroker(reason));
                metrics().mqtt_connection_lost();
                self.reconnect(event_loop).await
            }
            EventRoute::DisconnectSent => {
                if self.disconnect_was_requested() {
                    self.set_state(ConnectionEvent::ClientDisconnected);
                    return false;
                }
                true
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                failures,
            } => {
                if failures.is_empty() {
                    debug!(packet_id, "Subscription confirmed");
                } else {
                    warn!(packet_id, failures = ?failures, "Broker rejected subscriptions");
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Returns true to keep polling (after a replacement connection)
    async fn handle_error(&mut self, error: ConnectionError, event_loop: &mut EventLoop) -> bool {
        if self.disconnect_was_requested() {
            debug!(error = %error, "Event loop closed after requested disconnect");
            self.set_state(ConnectionEvent::ClientDisconnected);
            return false;
        }

        if self.has_connected && MessageHandler::is_normal_server_disconnect(&error) {
            info!(error = %error, "Broker closed the session normally");
            self.set_state(ConnectionEvent::ClientDisconnected);
            return false;
        }

        self.set_state(ConnectionEvent::NetworkError(error.to_string()));

        if !self.has_connected {
            // connect() observes the Disconnected state and reports the failure
            return false;
        }

        metrics().mqtt_connection_lost();
        self.reconnect(event_loop).await
    }

    async fn on_connack(&mut self) {
        if self.reconnect_attempts > 0 {
            info!(
                attempts = self.reconnect_attempts,
                "Reconnected to MQTT broker"
            );
        }
        self.reconnect_attempts = 0;
        self.has_connected = true;
        metrics().mqtt_connection_established();

        // The event loop is not polled while we hold it here, so only the
        // non-blocking request variants are safe
        let client = self.shared_client.lock().await;

        match MessageHandler::encode_payload(&PresenceStatus::online()) {
            Ok(payload) => {
                let topic = presence_topic(&self.client_id);
                if let Err(e) = client.try_publish(topic.clone(), QoS::AtLeastOnce, true, payload)
                {
                    warn!(topic = %topic, error = %e, "Failed to publish ONLINE presence");
                } else {
                    debug!(topic = %topic, "Published ONLINE presence");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode presence status"),
        }

        let subscriptions = self.subscriptions.lock().await.clone();
        if !subscriptions.is_empty() {
            match client.try_subscribe_many(to_filters(&subscriptions)) {
                Ok(()) => info!(count = subscriptions.len(), "Re-subscribed to topics"),
                Err(e) => error!(error = %e, "Failed to re-subscribe after ConnAck"),
            }
        }
        drop(client);

        self.set_state(ConnectionEvent::ConnAckReceived);
    }

    /// Count, decode and hand off; never awaits the consumer
    fn on_message(&self, topic: String, payload: &[u8], retain: bool) {
        tracing::debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
        metrics().mqtt_message_received();

        match MessageHandler::decode_payload(payload) {
            Ok(value) => {
                let message = InboundMessage {
                    topic: topic.clone(),
                    payload: value,
                    retain,
                };
                match self.forwarder.forward(message) {
                    Ok(()) => {}
                    Err(ForwardError::QueueFull) => {
                        metrics().mqtt_message_dropped();
                        warn!(topic = %topic, "Consumer queue full, dropping inbound message");
                    }
                    Err(e) => warn!(topic = %topic, error = %e, "Inbound message not delivered"),
                }
            }
            Err(e) => {
                metrics().malformed_payload();
                warn!(topic = %topic, error = %e, "Dropping malformed payload");
            }
        }
    }

    /// Returns true once a replacement connection is in place
    async fn reconnect(&mut self, event_loop: &mut EventLoop) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.set_state(ConnectionEvent::ReconnectionStarted(attempt));
                metrics().mqtt_reconnection();

                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );

                if !interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }
                if *self.shutdown_rx.borrow() || self.disconnect_was_requested() {
                    info!("Shutdown requested, aborting reconnection");
                    return false;
                }

                metrics().mqtt_connection_attempt();
                self.apply_new_connection(event_loop).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                self.set_state(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Swap in a fresh client/event loop pair
    async fn apply_new_connection(&self, event_loop: &mut EventLoop) -> bool {
        match MqttClient::create_connection(&self.client_id, &self.broker) {
            Ok((new_client, new_event_loop)) => {
                *event_loop = new_event_loop;
                let mut client_guard = self.shared_client.lock().await;
                *client_guard = new_client;
                debug!("Installed replacement MQTT connection");
                true
            }
            Err(e) => {
                self.set_state(ConnectionEvent::PermanentFailure(e.to_string()));
                false
            }
        }
    }
}

/// Resolves once the shutdown flag is set; never resolves if the sender is gone
async fn shutdown_requested(mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, subscriptions).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, guarantee, retain).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        MqttClient::set_message_sender(self, sender)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // No async work in Drop: call disconnect() for a clean shutdown
        self.stop_supervisor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(port: u16) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_string(),
            port,
            keepalive: 60,
        }
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Reconnecting(1));
            let _ = state_tx.send(ConnectionState::Connected);
            // keep the sender alive until the waiter has observed the change
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        let _handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(state_tx);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("ConnAck") || err_msg.contains("timeout"),
            "Error should mention timeout or ConnAck, got: {err_msg}"
        );
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("Test disconnect".to_string()));
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let ((_, _), (_shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();

        assert!(interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let ((_, _), (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(shutdown_rx, 5_000).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_with_dropped_sender_still_sleeps() {
        let ((_, _), (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();
        drop(shutdown_tx);

        assert!(interruptible_sleep(shutdown_rx, 10).await);
    }

    #[test]
    fn test_new_rejects_invalid_broker() {
        let result = MqttClient::new("alert_strategy", broker(0));
        assert!(matches!(result, Err(MqttError::InvalidBrokerConfig(_))));
    }

    #[test]
    fn test_with_reconnect_config_validates() {
        let client = MqttClient::new("alert_strategy", broker(1883)).unwrap();
        let result = client.with_reconnect_config(ReconnectConfig {
            max_attempts: Some(0),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connection_state_before_connect() {
        let client = MqttClient::new("test-state", broker(1883)).unwrap();

        assert!(client.connection_state().is_none());
        assert!(!client.is_permanently_disconnected());
        assert!(!Transport::is_connected(&client));
    }

    #[tokio::test]
    async fn test_operations_fail_without_connection() {
        let mut client = MqttClient::new("test-publish-fail", broker(1883)).unwrap();

        let publish = client
            .publish(
                "home/kitchen/alerts",
                b"{}".to_vec(),
                DeliveryGuarantee::AtLeastOnce,
                false,
            )
            .await;
        assert!(publish.is_err(), "publish should fail without connection");

        let subscribe = client
            .subscribe(&[Subscription::new(
                "home/kitchen/temperature",
                DeliveryGuarantee::AtMostOnce,
            )])
            .await;
        assert!(subscribe.is_err(), "subscribe should fail without connection");
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut client = MqttClient::new("test-disc", broker(1883)).unwrap();

        assert!(client.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_is_an_error() {
        // Nothing listens on port 1 locally, so the first poll fails
        let mut client = MqttClient::new("test-unreachable", broker(1)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), client.connect())
            .await
            .expect("connect should fail fast");
        assert!(result.is_err());
        assert!(matches!(
            client.connection_state(),
            Some(ConnectionState::Disconnected(_))
        ));

        // the event loop is consumed by the first attempt
        assert!(client.connect().await.is_err());
    }
}
