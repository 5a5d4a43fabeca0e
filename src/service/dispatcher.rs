//! Alert dispatcher: the single consumer of the engine service's inbound queue
//!
//! Each inbound message is classified by topic. Telemetry is validated and fed
//! to the [`AlertEngine`]; a transition publishes the alert event and the
//! indicator command for that room. Actuator echoes update the last known
//! actuator state. Everything else is dropped.

use super::{publish_json, ServiceHandler};
use crate::config::{AlertEngineConfig, ConfigError};
use crate::engine::AlertEngine;
use crate::engine_span;
use crate::observability::{metrics, HealthServer};
use crate::protocol::{
    unix_now, validate_room_id, ActuatorState, AlertKind, Subscription, TelemetryReading,
};
use crate::routing::{TopicCategory, TopicRouter};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of the arrival time handed to the engine
pub trait Clock: Send + Sync + 'static {
    /// Current time in unix seconds
    fn now(&self) -> i64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        unix_now()
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The room transitioned and the alert and command were handed to the transport
    Emitted(AlertKind),
    /// Valid telemetry that did not change the room's state
    NoTransition,
    /// Invalid telemetry or actuator payload; no state was touched
    Rejected,
    ActuatorRecorded,
    /// Our own alert or indicator output echoed back
    Ignored,
    /// Topic is not one of the configured topics
    Unrouted,
}

pub struct AlertDispatcher<C: Clock = SystemClock> {
    engine: AlertEngine,
    router: TopicRouter,
    clock: C,
    actuator_states: HashMap<String, ActuatorState>,
    health: Option<Arc<HealthServer>>,
}

impl AlertDispatcher<SystemClock> {
    pub fn from_config(config: &AlertEngineConfig) -> Result<Self, ConfigError> {
        Self::new(config, SystemClock)
    }
}

impl<C: Clock> AlertDispatcher<C> {
    pub fn new(config: &AlertEngineConfig, clock: C) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: AlertEngine::new(config.thresholds()),
            router: config.router()?,
            clock,
            actuator_states: HashMap::new(),
            health: None,
        })
    }

    /// Report telemetry arrival to the health endpoint
    pub fn with_health(mut self, health: Arc<HealthServer>) -> Self {
        self.health = Some(health);
        self
    }

    /// Telemetry for every room, plus actuator echoes when a status template is set
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut categories = vec![TopicCategory::Telemetry];
        if self.router.has_category(TopicCategory::Status) {
            categories.push(TopicCategory::Status);
        }
        self.router.subscriptions(&categories)
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Last state echoed by the room's actuator
    pub fn actuator_state(&self, room_id: &str) -> Option<&ActuatorState> {
        self.actuator_states.get(room_id)
    }

    pub async fn dispatch<T: Transport>(
        &mut self,
        transport: &T,
        message: InboundMessage,
    ) -> DispatchOutcome {
        match self.router.classify(&message.topic) {
            Some(TopicCategory::Telemetry) => self.handle_telemetry(transport, &message).await,
            Some(TopicCategory::Status) => self.handle_actuator_state(&message),
            Some(category) => {
                debug!(
                    topic = %message.topic,
                    category = category.label(),
                    "Ignoring echo of own output"
                );
                DispatchOutcome::Ignored
            }
            None => {
                debug!(topic = %message.topic, "Ignoring message on unconfigured topic");
                DispatchOutcome::Unrouted
            }
        }
    }

    async fn handle_telemetry<T: Transport>(
        &mut self,
        transport: &T,
        message: &InboundMessage,
    ) -> DispatchOutcome {
        metrics().telemetry_received();

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
                warn!(topic = %message.topic, reason = %reason, "Rejected telemetry reading");
                return DispatchOutcome::Rejected;
            }
        };

        let now = self.clock.now();
        if let Some(health) = &self.health {
            health.set_last_telemetry(u64::try_from(now).unwrap_or_default());
        }

        let outcome = engine_span!(room_id = %reading.room_id)
            .in_scope(|| self.engine.evaluate(&reading, now));
        metrics().set_rooms_tracked(self.engine.tracked_rooms());

        let Some(outcome) = outcome else {
            return DispatchOutcome::NoTransition;
        };

        let kind = outcome.kind();
        match kind {
            AlertKind::Overheat => metrics().alert_raised(&reading.room_id),
            AlertKind::Recovered => metrics().alert_recovered(&reading.room_id),
        }

        if let Some(topic) = self.router.resolve(TopicCategory::Alert, &reading.room_id) {
            publish_json(
                transport,
                &topic,
                &outcome.event,
                TopicCategory::Alert.delivery_guarantee(),
                false,
            )
            .await;
        }
        if let Some(topic) = self
            .router
            .resolve(TopicCategory::Indicator, &reading.room_id)
        {
            publish_json(
                transport,
                &topic,
                &outcome.command,
                TopicCategory::Indicator.delivery_guarantee(),
                false,
            )
            .await;
        }

        DispatchOutcome::Emitted(kind)
    }

    fn handle_actuator_state(&mut self, message: &InboundMessage) -> DispatchOutcome {
        let state: ActuatorState = match serde_json::from_value(message.payload.clone()) {
            Ok(state) => state,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Rejected actuator state");
                return DispatchOutcome::Rejected;
            }
        };

        info!(
            room_id = %state.room_id,
            device = %state.device,
            state = %state.state,
            retained = message.retain,
            "Actuator state updated"
        );
        metrics().actuator_updated();
        self.actuator_states.insert(state.room_id.clone(), state);
        DispatchOutcome::ActuatorRecorded
    }
}

#[async_trait]
impl<T: Transport + 'static, C: Clock> ServiceHandler<T> for AlertDispatcher<C> {
    async fn on_message(&mut self, transport: &T, message: InboundMessage) {
        self.dispatch(transport, message).await;
    }
}
