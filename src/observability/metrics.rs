//! Thread-safe metrics collection system
//!
//! Atomic counters for the telemetry path and the MQTT transport, plus a
//! mutex-protected per-room table of alert transitions.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Telemetry path
    telemetry_received: AtomicU64,
    telemetry_rejected: AtomicU64,
    malformed_payloads: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_recovered: AtomicU64,
    actuator_updates: AtomicU64,
    rooms_tracked: AtomicU64,

    // MQTT transport
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    reconnections: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    connection_start_time: AtomicU64,

    room_stats: Mutex<HashMap<String, RoomAlertStats>>,

    // Lifecycle
    service_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
    health_status: AtomicBool,
    last_health_check: AtomicU64,
}

#[derive(Debug, Default)]
struct RoomAlertStats {
    raised: u64,
    recovered: u64,
    last_transition: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let now = current_timestamp();

        Self {
            telemetry_received: AtomicU64::new(0),
            telemetry_rejected: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            alerts_recovered: AtomicU64::new(0),
            actuator_updates: AtomicU64::new(0),
            rooms_tracked: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            room_stats: Mutex::new(HashMap::new()),
            service_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(now),
            state_transitions: AtomicU64::new(0),
            health_status: AtomicBool::new(true),
            last_health_check: AtomicU64::new(now),
        }
    }

    // Telemetry path
    pub fn telemetry_received(&self) {
        self.telemetry_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_rejected(&self) {
        self.telemetry_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn actuator_updated(&self) {
        self.actuator_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_rooms_tracked(&self, rooms: usize) {
        self.rooms_tracked.store(rooms as u64, Ordering::Relaxed);
    }

    pub fn alert_raised(&self, room_id: &str) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
        self.record_room_transition(room_id, |stats| stats.raised += 1);
    }

    pub fn alert_recovered(&self, room_id: &str) {
        self.alerts_recovered.fetch_add(1, Ordering::Relaxed);
        self.record_room_transition(room_id, |stats| stats.recovered += 1);
    }

    fn record_room_transition(&self, room_id: &str, update: impl FnOnce(&mut RoomAlertStats)) {
        if let Ok(mut stats) = self.room_stats.lock() {
            let entry = stats.entry(room_id.to_string()).or_default();
            update(entry);
            entry.last_transition = current_timestamp();
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound message discarded because the consumer queue was full
    pub fn mqtt_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_service_state(&self, state: &str) {
        if let Ok(mut current_state) = self.service_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    pub fn update_health_status(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Relaxed);
        self.last_health_check
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let now = current_timestamp();
        for counter in [
            &self.telemetry_received,
            &self.telemetry_rejected,
            &self.malformed_payloads,
            &self.alerts_raised,
            &self.alerts_recovered,
            &self.actuator_updates,
            &self.rooms_tracked,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.reconnections,
            &self.messages_published,
            &self.publish_failures,
            &self.messages_received,
            &self.messages_dropped,
            &self.connection_start_time,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start.store(now, Ordering::Relaxed);
        self.health_status.store(true, Ordering::Relaxed);
        self.last_health_check.store(now, Ordering::Relaxed);

        if let Ok(mut stats) = self.room_stats.lock() {
            stats.clear();
        }
        if let Ok(mut state) = self.service_state.lock() {
            *state = "initializing".to_string();
        }
    }

    fn room_snapshots(&self) -> HashMap<String, RoomAlertSnapshot> {
        self.room_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(room, stats)| {
                        (
                            room.clone(),
                            RoomAlertSnapshot {
                                alerts_raised: stats.raised,
                                alerts_recovered: stats.recovered,
                                last_transition: stats.last_transition,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let current_state = self
            .service_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            telemetry: TelemetryMetrics {
                received: self.telemetry_received.load(Ordering::Relaxed),
                rejected: self.telemetry_rejected.load(Ordering::Relaxed),
                malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
                alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
                alerts_recovered: self.alerts_recovered.load(Ordering::Relaxed),
                actuator_updates: self.actuator_updates.load(Ordering::Relaxed),
                rooms_tracked: self.rooms_tracked.load(Ordering::Relaxed),
                rooms: self.room_snapshots(),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                reconnections: self.reconnections.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            lifecycle: LifecycleMetrics {
                current_state,
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                healthy: self.health_status.load(Ordering::Relaxed),
                last_health_check: self.last_health_check.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub telemetry: TelemetryMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct TelemetryMetrics {
    pub received: u64,
    pub rejected: u64,
    pub malformed_payloads: u64,
    pub alerts_raised: u64,
    pub alerts_recovered: u64,
    pub actuator_updates: u64,
    pub rooms_tracked: u64,
    pub rooms: HashMap<String, RoomAlertSnapshot>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RoomAlertSnapshot {
    pub alerts_raised: u64,
    pub alerts_recovered: u64,
    pub last_transition: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub reconnections: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
    pub healthy: bool,
    pub last_health_check: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
