//! Health check HTTP server
//!
//! `/health`, `/ready`, `/live` and `/metrics` for operators and container
//! orchestration.

use crate::observability::metrics::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// Seconds without telemetry before the telemetry check reports `stale`
const TELEMETRY_STALENESS_THRESHOLD_SECONDS: u64 = 300;

/// HTTP health check server
pub struct HealthServer {
    service_name: String,
    port: u16,
    mqtt_connected: AtomicBool,
    last_telemetry: AtomicU64,
}

impl HealthServer {
    pub fn new(service_name: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            port,
            mqtt_connected: AtomicBool::new(false),
            last_telemetry: AtomicU64::new(0),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Update MQTT connection status
    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    /// Record the arrival time of the latest valid telemetry reading
    pub fn set_last_telemetry(&self, timestamp: u64) {
        self.last_telemetry.store(timestamp, Ordering::Relaxed);
    }

    pub fn last_telemetry(&self) -> u64 {
        self.last_telemetry.load(Ordering::Relaxed)
    }

    /// All health routes, separated from `start` so they can be tested in-process
    pub fn routes(
        server: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = server.clone();
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.get_health_status();
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
                }
            });

        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        let ready_server = server;
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let ready = ready_server.mqtt_connected.load(Ordering::Relaxed);
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                warp::reply::with_status(warp::reply::json(&response), code)
            });

        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        health_route.or(metrics_route).or(ready_route).or(live_route)
    }

    /// Serve until the process exits
    ///
    /// A port that cannot be bound is logged; the service keeps running
    /// without its health endpoint.
    pub async fn start(self: Arc<Self>) {
        let port = self.port;
        match warp::serve(Self::routes(self)).try_bind_ephemeral(([0, 0, 0, 0], port)) {
            Ok((address, server)) => {
                tracing::info!("Health server listening on {}", address);
                server.await;
            }
            Err(e) => tracing::error!("Health server failed to bind port {}: {}", port, e),
        }
    }

    fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();

        let mut checks = HashMap::new();
        checks.insert("mqtt".to_string(), self.check_mqtt_health(now));
        checks.insert("telemetry".to_string(), self.check_telemetry_health(now));

        let overall_healthy = checks.values().all(|check| check.status == "healthy");

        HealthStatus {
            status: if overall_healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            service: self.service_name.clone(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    fn check_mqtt_health(&self, now: u64) -> HealthCheck {
        if self.mqtt_connected.load(Ordering::Relaxed) {
            HealthCheck {
                status: "healthy".to_string(),
                message: Some("MQTT connection established".to_string()),
                last_check: now,
            }
        } else {
            HealthCheck {
                status: "unhealthy".to_string(),
                message: Some("MQTT connection failed or disconnected".to_string()),
                last_check: now,
            }
        }
    }

    fn check_telemetry_health(&self, now: u64) -> HealthCheck {
        let last = self.last_telemetry.load(Ordering::Relaxed);

        if last == 0 {
            HealthCheck {
                status: "healthy".to_string(),
                message: Some("No telemetry received yet".to_string()),
                last_check: now,
            }
        } else if now.saturating_sub(last) > TELEMETRY_STALENESS_THRESHOLD_SECONDS {
            HealthCheck {
                status: "stale".to_string(),
                message: Some(format!(
                    "No telemetry for {} seconds",
                    now.saturating_sub(last)
                )),
                last_check: now,
            }
        } else {
            HealthCheck {
                status: "healthy".to_string(),
                message: Some("Recent telemetry".to_string()),
                last_check: now,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_health_check_logic() {
        let server = HealthServer::new("alert_strategy", 8080);
        let now = current_timestamp();

        assert_eq!(server.check_mqtt_health(now).status, "unhealthy");
        server.set_mqtt_connected(true);
        assert_eq!(server.check_mqtt_health(now).status, "healthy");

        assert_eq!(server.check_telemetry_health(now).status, "healthy");
        server.set_last_telemetry(now);
        assert_eq!(server.check_telemetry_health(now).status, "healthy");
        server.set_last_telemetry(now - 600);
        assert_eq!(server.check_telemetry_health(now).status, "stale");
    }

    #[test]
    fn test_overall_health_status() {
        let server = HealthServer::new("alert_strategy", 8080);
        server.set_mqtt_connected(true);

        let status = server.get_health_status();
        assert_eq!(status.status, "healthy");
        assert_eq!(status.service, "alert_strategy");
        assert!(status.checks.contains_key("mqtt"));
        assert!(status.checks.contains_key("telemetry"));

        server.set_mqtt_connected(false);
        assert_eq!(server.get_health_status().status, "degraded");
    }

    #[tokio::test]
    async fn test_ready_route_follows_connection() {
        let server = Arc::new(HealthServer::new("alert_strategy", 8080));
        let routes = HealthServer::routes(server.clone());

        let response = warp::test::request()
            .method("GET")
            .path("/ready")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 503);

        server.set_mqtt_connected(true);
        let response = warp::test::request()
            .method("GET")
            .path("/ready")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn test_live_and_metrics_routes() {
        let routes = HealthServer::routes(Arc::new(HealthServer::new("alert_strategy", 8080)));

        let response = warp::test::request()
            .method("GET")
            .path("/live")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 200);

        let response = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["telemetry"].is_object());
        assert!(body["mqtt"].is_object());
    }
}
