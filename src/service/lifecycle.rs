//! Service lifecycle: connect, subscribe, run the consumer task, shut down
//!
//! The transport is registered with a bounded inbound queue before it
//! connects, so retained messages delivered right after the first ConnAck
//! are not lost. One worker task drains the queue into the handler; the
//! handler is never shared.

use super::ServiceHandler;
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle_span;
use crate::observability::{metrics, HealthServer};
use crate::protocol::Subscription;
use crate::transport::{InboundMessage, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the queue between the transport and the handler
const INBOUND_QUEUE_CAPACITY: usize = 256;

const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Owns a transport and drives one [`ServiceHandler`] on it
pub struct ServiceLifecycle<T>
where
    T: Transport + 'static,
{
    service_name: String,
    transport: Option<T>,
    shared: Option<Arc<T>>,
    worker: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    health_server: Option<Arc<HealthServer>>,
}

impl<T> ServiceLifecycle<T>
where
    T: Transport + 'static,
{
    pub fn new(service_name: impl Into<String>, transport: T) -> Self {
        Self {
            service_name: service_name.into(),
            transport: Some(transport),
            shared: None,
            worker: None,
            shutdown_tx: None,
            health_server: None,
        }
    }

    pub fn set_health_server(&mut self, health_server: Arc<HealthServer>) {
        self.health_server = Some(health_server);
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The transport, whether or not the service is running
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref().or(self.shared.as_deref())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        self.transport()
            .is_some_and(|transport| transport.is_permanently_disconnected())
    }

    /// Connect, subscribe and start consuming
    ///
    /// A connection failure is returned to the caller and leaves the
    /// lifecycle stopped; start-up never retries.
    pub async fn start<H>(&mut self, handler: H, subscriptions: &[Subscription]) -> ServiceResult<()>
    where
        H: ServiceHandler<T>,
    {
        let Some(mut transport) = self.transport.take() else {
            return Err(ServiceError::internal(format!(
                "service '{}' is already running",
                self.service_name
            )));
        };

        info!(service = %self.service_name, "Starting service");
        metrics().set_service_state("starting");

        let (sender, receiver) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        transport.set_message_sender(sender);

        if let Err(e) = transport.connect().await {
            error!(service = %self.service_name, error = %e, "Failed to connect to broker");
            metrics().set_service_state("failed");
            self.transport = Some(transport);
            return Err(ServiceError::transport(e));
        }

        if let Err(e) = transport.subscribe(subscriptions).await {
            error!(service = %self.service_name, error = %e, "Failed to subscribe");
            metrics().set_service_state("failed");
            if let Err(disconnect_error) = transport.disconnect().await {
                warn!(error = %disconnect_error, "Disconnect after failed subscribe also failed");
            }
            self.transport = Some(transport);
            return Err(ServiceError::transport(e));
        }
        info!(
            service = %self.service_name,
            topics = subscriptions.len(),
            "Subscribed to input topics"
        );

        let transport = Arc::new(transport);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(
            run_worker(transport.clone(), handler, receiver, shutdown_rx)
                .instrument(lifecycle_span!(service = %self.service_name)),
        );

        if let Some(health) = &self.health_server {
            health.set_mqtt_connected(transport.is_connected());
        }

        self.shared = Some(transport);
        self.worker = Some(worker);
        self.shutdown_tx = Some(shutdown_tx);
        metrics().set_service_state("running");
        info!(service = %self.service_name, "Service running");
        Ok(())
    }

    /// Block until SIGINT/SIGTERM or a permanently lost connection
    ///
    /// Also keeps the health endpoint's connection flag current.
    pub async fn run_until_shutdown(&self) -> ServiceResult<()> {
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ServiceError::internal(format!("cannot install SIGINT handler: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ServiceError::internal(format!("cannot install SIGTERM handler: {e}")))?;
        let mut connection_check = tokio::time::interval(CONNECTION_CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully...");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully...");
                    return Ok(());
                }
                _ = connection_check.tick() => {
                    self.check_connection()?;
                }
            }
        }
    }

    fn check_connection(&self) -> ServiceResult<()> {
        let Some(transport) = self.transport() else {
            return Ok(());
        };

        let connected = transport.is_connected();
        if let Some(health) = &self.health_server {
            health.set_mqtt_connected(connected);
        }
        metrics().update_health_status(connected);

        if transport.is_permanently_disconnected() {
            let reason = format!("{:?}", transport.connection_state());
            error!(service = %self.service_name, reason = %reason, "Connection permanently lost");
            return Err(ServiceError::PermanentlyDisconnected { reason });
        }
        Ok(())
    }

    /// Stop the worker and disconnect cleanly
    ///
    /// No OFFLINE message is published; a clean disconnect suppresses the
    /// last will on the broker side.
    pub async fn shutdown(&mut self) -> ServiceResult<()> {
        info!(service = %self.service_name, "Shutting down service");
        metrics().set_service_state("stopping");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!("Service worker ended abnormally: {}", e);
                }
            }
        }

        if let Some(shared) = self.shared.take() {
            match Arc::try_unwrap(shared) {
                Ok(transport) => self.transport = Some(transport),
                Err(shared) => {
                    warn!("Transport still shared after worker exit; skipping disconnect");
                    self.shared = Some(shared);
                }
            }
        }

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.disconnect().await {
                warn!(error = %e, "Disconnect failed");
            }
        }

        if let Some(health) = &self.health_server {
            health.set_mqtt_connected(false);
        }
        metrics().set_service_state("stopped");
        info!(service = %self.service_name, "Service stopped");
        Ok(())
    }
}

async fn run_worker<T, H>(
    transport: Arc<T>,
    mut handler: H,
    mut receiver: mpsc::Receiver<InboundMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: Transport + 'static,
    H: ServiceHandler<T>,
{
    let mut ticker = handler
        .tick_interval()
        .filter(|period| !period.is_zero())
        .map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!("Worker received shutdown signal");
                break;
            }
            message = receiver.recv() => match message {
                Some(message) => handler.on_message(transport.as_ref(), message).await,
                None => {
                    debug!("Inbound queue closed");
                    break;
                }
            },
            _ = next_tick(&mut ticker) => {
                handler.on_tick(transport.as_ref()).await;
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DeliveryGuarantee;
    use crate::testing::MockTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        messages: Arc<Mutex<Vec<InboundMessage>>>,
        ticks: Arc<Mutex<u32>>,
        tick_every: Option<Duration>,
    }

    #[async_trait]
    impl ServiceHandler<MockTransport> for Recorder {
        async fn on_message(&mut self, _transport: &MockTransport, message: InboundMessage) {
            self.messages.lock().unwrap().push(message);
        }

        fn tick_interval(&self) -> Option<Duration> {
            self.tick_every
        }

        async fn on_tick(&mut self, _transport: &MockTransport) {
            *self.ticks.lock().unwrap() += 1;
        }
    }

    fn subscriptions() -> Vec<Subscription> {
        vec![Subscription::new(
            "home/kitchen/temperature",
            DeliveryGuarantee::AtMostOnce,
        )]
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_start_delivers_messages_to_handler() {
        let transport = MockTransport::with_client_id("alert_strategy");
        let remote = transport.clone();
        let recorder = Recorder::default();
        let mut lifecycle = ServiceLifecycle::new("alert_strategy", transport);

        lifecycle
            .start(recorder.clone(), &subscriptions())
            .await
            .unwrap();
        assert!(lifecycle.is_running());
        assert_eq!(remote.subscriptions(), subscriptions());

        assert!(remote.inject("home/kitchen/temperature", json!({"x": 1})).await);
        wait_for(|| recorder.messages.lock().unwrap().len() == 1).await;

        lifecycle.shutdown().await.unwrap();
        assert!(!remote.is_connected());
        assert!(!lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let mut lifecycle = ServiceLifecycle::new("svc", MockTransport::new());
        lifecycle
            .start(Recorder::default(), &subscriptions())
            .await
            .unwrap();

        let result = lifecycle.start(Recorder::default(), &subscriptions()).await;
        assert!(matches!(result, Err(ServiceError::Internal { .. })));
        lifecycle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let mut lifecycle = ServiceLifecycle::new("svc", MockTransport::with_connect_failure());
        let result = lifecycle.start(Recorder::default(), &subscriptions()).await;

        assert!(matches!(result, Err(ServiceError::Transport(_))));
        assert!(!lifecycle.is_running());
        assert!(lifecycle.transport().is_some());
    }

    #[tokio::test]
    async fn test_ticks_reach_handler() {
        let recorder = Recorder {
            tick_every: Some(Duration::from_millis(10)),
            ..Recorder::default()
        };
        let mut lifecycle = ServiceLifecycle::new("svc", MockTransport::new());
        lifecycle.start(recorder.clone(), &[]).await.unwrap();

        wait_for(|| *recorder.ticks.lock().unwrap() >= 3).await;
        lifecycle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_permanent_disconnect_is_reported() {
        let transport = MockTransport::new();
        let remote = transport.clone();
        let health = Arc::new(HealthServer::new("svc", 0));
        let mut lifecycle = ServiceLifecycle::new("svc", transport);
        lifecycle.set_health_server(health);
        lifecycle
            .start(Recorder::default(), &subscriptions())
            .await
            .unwrap();

        assert!(lifecycle.check_connection().is_ok());
        remote.simulate_permanent_failure("max attempts exceeded");
        assert!(lifecycle.is_permanently_disconnected());
        assert!(matches!(
            lifecycle.check_connection(),
            Err(ServiceError::PermanentlyDisconnected { .. })
        ));
        lifecycle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_harmless() {
        let mut lifecycle = ServiceLifecycle::new("svc", MockTransport::new());
        assert!(lifecycle.shutdown().await.is_ok());
        assert_eq!(lifecycle.service_name(), "svc");
    }
}
