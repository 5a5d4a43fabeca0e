//! Per-room alert state

use serde::Serialize;

/// Phase of the hysteresis state machine for one room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPhase {
    Normal,
    Alerting,
}

/// Alert bookkeeping for a single room
///
/// Only the engine can change it. `last_alert_timestamp` never decreases and
/// `in_alert` flips only through the raise and recover transitions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomAlertState {
    room_id: String,
    in_alert: bool,
    // None until the first transition
    last_alert_timestamp: Option<i64>,
}

impl RoomAlertState {
    pub(crate) fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            in_alert: false,
            last_alert_timestamp: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn in_alert(&self) -> bool {
        self.in_alert
    }

    /// Time of the last transition, `0` for a room that never transitioned
    pub fn last_alert_timestamp(&self) -> i64 {
        self.last_alert_timestamp.unwrap_or(0)
    }

    /// Seconds since the last transition, `None` before the first one
    pub fn seconds_since_transition(&self, now: i64) -> Option<i64> {
        self.last_alert_timestamp.map(|last| now - last)
    }

    pub fn phase(&self) -> AlertPhase {
        if self.in_alert {
            AlertPhase::Alerting
        } else {
            AlertPhase::Normal
        }
    }

    pub(crate) fn enter_alert(&mut self, now: i64) {
        self.in_alert = true;
        self.touch(now);
    }

    pub(crate) fn leave_alert(&mut self, now: i64) {
        self.in_alert = false;
        self.touch(now);
    }

    // Wall clocks can step backwards; keep the timestamp monotonic.
    fn touch(&mut self, now: i64) {
        self.last_alert_timestamp = Some(match self.last_alert_timestamp {
            Some(last) => last.max(now),
            None => now,
        });
    }
}
