//! Hysteresis and cooldown state machine
//!
//! The engine is a plain value: it performs no I/O and holds no locks. The
//! dispatcher owns it and feeds it one validated reading at a time.

use super::state::RoomAlertState;
use crate::protocol::{
    AlertEvent, AlertKind, IndicatorCommand, IndicatorState, Severity, TelemetryReading,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Trigger/release thresholds and the minimum spacing between triggers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub cooldown_s: i64,
}

/// Emissions produced by a single state transition
#[derive(Debug, Clone, PartialEq)]
pub struct AlertOutcome {
    pub event: AlertEvent,
    pub command: IndicatorCommand,
}

impl AlertOutcome {
    fn new(kind: AlertKind, room_id: &str, now: i64, temperature_celsius: f64) -> Self {
        let (severity, desired_state) = match kind {
            AlertKind::Overheat => (Severity::Warn, IndicatorState::On),
            AlertKind::Recovered => (Severity::Info, IndicatorState::Off),
        };

        Self {
            event: AlertEvent {
                timestamp: now,
                room_id: room_id.to_string(),
                kind,
                severity,
                temperature_celsius,
            },
            command: IndicatorCommand {
                desired_state,
                room_id: room_id.to_string(),
                timestamp: now,
                reason: kind.to_string(),
            },
        }
    }

    pub fn kind(&self) -> AlertKind {
        self.event.kind
    }
}

/// One independent [`RoomAlertState`] per room, created on first reading
#[derive(Debug, Clone)]
pub struct AlertEngine {
    thresholds: AlertThresholds,
    rooms: HashMap<String, RoomAlertState>,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            rooms: HashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Apply one reading that arrived at wall-clock time `now`
    ///
    /// Recovery is checked first and is not subject to cooldown. A raise
    /// requires the room to be normal and the reading at or above the high
    /// threshold. Once the room has transitioned at least once, a raise also
    /// needs `cooldown_s` seconds since that transition.
    pub fn evaluate(&mut self, reading: &TelemetryReading, now: i64) -> Option<AlertOutcome> {
        let thresholds = self.thresholds;
        let temperature = reading.temperature_celsius;
        let state = self
            .rooms
            .entry(reading.room_id.clone())
            .or_insert_with(|| RoomAlertState::new(&reading.room_id));

        if state.in_alert() && temperature <= thresholds.low_threshold {
            state.leave_alert(now);
            info!(
                room_id = %reading.room_id,
                temperature_celsius = temperature,
                "Room recovered"
            );
            return Some(AlertOutcome::new(
                AlertKind::Recovered,
                &reading.room_id,
                now,
                temperature,
            ));
        }

        if !state.in_alert() && temperature >= thresholds.high_threshold {
            let elapsed = state.seconds_since_transition(now);
            if elapsed.map_or(true, |elapsed| elapsed >= thresholds.cooldown_s) {
                state.enter_alert(now);
                info!(
                    room_id = %reading.room_id,
                    temperature_celsius = temperature,
                    "Room overheating"
                );
                return Some(AlertOutcome::new(
                    AlertKind::Overheat,
                    &reading.room_id,
                    now,
                    temperature,
                ));
            }

            debug!(
                room_id = %reading.room_id,
                elapsed_s = elapsed.unwrap_or_default(),
                cooldown_s = thresholds.cooldown_s,
                "Overheat suppressed by cooldown"
            );
        }

        None
    }

    pub fn room_state(&self, room_id: &str) -> Option<&RoomAlertState> {
        self.rooms.get(room_id)
    }

    /// Copy of every room's state, sorted by room id
    pub fn snapshot(&self) -> Vec<RoomAlertState> {
        let mut states: Vec<RoomAlertState> = self.rooms.values().cloned().collect();
        states.sort_by(|a, b| a.room_id().cmp(b.room_id()));
        states
    }

    pub fn tracked_rooms(&self) -> usize {
        self.rooms.len()
    }
}
