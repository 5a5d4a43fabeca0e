//! Message payloads exchanged over the broker
//!
//! Every payload is compact JSON. Field names on the wire follow the
//! short forms used by the sensor fleet (`bn`, `ts`, `temp_c`, ...); the Rust
//! side uses descriptive names and maps them with serde renames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Current wall-clock time as unix seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Unit a sensor reports its temperature in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
}

/// Temperature sample produced by a sensor adapter
///
/// Wire format: `{"bn": "...", "ts": 1700000000, "room_id": "...", "temp_c": 25.1, "unit": "C"}`.
/// Construct inbound readings with [`TelemetryReading::from_json`], which
/// validates every field and normalises the temperature to Celsius.
///
/// # Examples
/// ```
/// use thermoguard::protocol::TelemetryReading;
/// use serde_json::json;
///
/// let reading = TelemetryReading::from_json(&json!({
///     "bn": "rpi-1",
///     "ts": 1700000000,
///     "room_id": "kitchen",
///     "temp_c": 26.5
/// }))
/// .unwrap();
/// assert_eq!(reading.room_id, "kitchen");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryReading {
    /// Identifier of the publishing sensor
    #[serde(rename = "bn")]
    pub source_id: String,
    /// Sample time in unix seconds
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub room_id: String,
    #[serde(rename = "temp_c")]
    pub temperature_celsius: f64,
    #[serde(default)]
    pub unit: TemperatureUnit,
}

impl TelemetryReading {
    pub fn new(source_id: &str, timestamp: i64, room_id: &str, temperature_celsius: f64) -> Self {
        Self {
            source_id: source_id.to_string(),
            timestamp,
            room_id: room_id.to_string(),
            temperature_celsius,
            unit: TemperatureUnit::Celsius,
        }
    }

    /// Validate a decoded JSON payload into a reading
    ///
    /// Fahrenheit readings are converted so that `temperature_celsius` always
    /// holds Celsius and `unit` is `C` on the returned value.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let mut reading: TelemetryReading = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        if reading.source_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("bn"));
        }
        if reading.room_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("room_id"));
        }
        if !reading.temperature_celsius.is_finite() {
            return Err(ValidationError::NonFiniteTemperature);
        }

        if reading.unit == TemperatureUnit::Fahrenheit {
            reading.temperature_celsius = (reading.temperature_celsius - 32.0) * 5.0 / 9.0;
            reading.unit = TemperatureUnit::Celsius;
        }

        Ok(reading)
    }
}

/// Telemetry validation failures; all of them are recoverable
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("invalid telemetry payload: {0}")]
    Malformed(String),
    #[error("telemetry field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("telemetry temperature is not a finite number")]
    NonFiniteTemperature,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertKind {
    Overheat,
    Recovered,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Overheat => "OVERHEAT",
            AlertKind::Recovered => "RECOVERED",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warn,
    Info,
}

/// Alert raised or cleared by the alert engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub room_id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    #[serde(rename = "level")]
    pub severity: Severity,
    #[serde(rename = "temp_c")]
    pub temperature_celsius: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndicatorState {
    On,
    Off,
}

impl IndicatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorState::On => "ON",
            IndicatorState::Off => "OFF",
        }
    }
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command for the room's indicator actuator, emitted with every alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorCommand {
    #[serde(rename = "state")]
    pub desired_state: IndicatorState,
    pub room_id: String,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub reason: String,
}

/// State echoed back by an actuator connector (retained)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorState {
    pub ts: i64,
    pub device: String,
    pub room_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Presence {
    Online,
    Offline,
}

/// Retained presence announcement on a client's status topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceStatus {
    pub status: Presence,
    pub ts: i64,
}

impl PresenceStatus {
    pub fn online() -> Self {
        Self {
            status: Presence::Online,
            ts: unix_now(),
        }
    }

    pub fn offline() -> Self {
        Self {
            status: Presence::Offline,
            ts: unix_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_telemetry_defaults_unit_to_celsius() {
        let reading = TelemetryReading::from_json(&json!({
            "bn": "sensor-1",
            "ts": 1700000000,
            "room_id": "kitchen",
            "temp_c": 25.5
        }))
        .unwrap();

        assert_eq!(reading.unit, TemperatureUnit::Celsius);
        assert_eq!(reading.temperature_celsius, 25.5);
        assert_eq!(reading.source_id, "sensor-1");
        assert_eq!(reading.timestamp, 1700000000);
    }

    #[test]
    fn test_telemetry_missing_temperature_is_rejected() {
        let result = TelemetryReading::from_json(&json!({"room_id": "A"}));
        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn test_telemetry_non_numeric_temperature_is_rejected() {
        let result = TelemetryReading::from_json(&json!({
            "bn": "sensor-1",
            "ts": 1,
            "room_id": "kitchen",
            "temp_c": "hot"
        }));
        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn test_telemetry_empty_room_is_rejected() {
        let result = TelemetryReading::from_json(&json!({
            "bn": "sensor-1",
            "ts": 1,
            "room_id": "  ",
            "temp_c": 20.0
        }));
        assert_eq!(result, Err(ValidationError::EmptyField("room_id")));
    }

    #[test]
    fn test_telemetry_unknown_unit_is_rejected() {
        let result = TelemetryReading::from_json(&json!({
            "bn": "sensor-1",
            "ts": 1,
            "room_id": "kitchen",
            "temp_c": 20.0,
            "unit": "K"
        }));
        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn test_telemetry_fahrenheit_is_converted() {
        let reading = TelemetryReading::from_json(&json!({
            "bn": "sensor-1",
            "ts": 1,
            "room_id": "kitchen",
            "temp_c": 212.0,
            "unit": "F"
        }))
        .unwrap();

        assert_eq!(reading.unit, TemperatureUnit::Celsius);
        assert!((reading.temperature_celsius - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_alert_event_wire_format() {
        let event = AlertEvent {
            timestamp: 42,
            room_id: "kitchen".to_string(),
            kind: AlertKind::Overheat,
            severity: Severity::Warn,
            temperature_celsius: 30.0,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"ts": 42, "room_id": "kitchen", "type": "OVERHEAT", "level": "WARN", "temp_c": 30.0})
        );
    }

    #[test]
    fn test_indicator_command_wire_format() {
        let command = IndicatorCommand {
            desired_state: IndicatorState::Off,
            room_id: "kitchen".to_string(),
            timestamp: 7,
            reason: AlertKind::Recovered.to_string(),
        };

        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(
            value,
            json!({"state": "OFF", "room_id": "kitchen", "ts": 7, "reason": "RECOVERED"})
        );
    }

    #[test]
    fn test_presence_wire_format() {
        let presence = PresenceStatus {
            status: Presence::Offline,
            ts: 5,
        };
        let encoded = serde_json::to_string(&presence).unwrap();
        assert_eq!(encoded, r#"{"status":"OFFLINE","ts":5}"#);
    }
}
