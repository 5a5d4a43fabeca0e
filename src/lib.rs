//! thermoguard - room temperature alerting over MQTT
//!
//! Sensors publish per-room temperature readings; the alert service keeps a
//! hysteresis-with-cooldown state machine per room and answers transitions
//! with an alert event and an indicator command. All processes coordinate
//! through broker topics and a one-time configuration fetch from the home
//! catalog.
//!
//! # Overview
//!
//! - Protocol message types and topic template validation
//! - MQTT transport with presence, last will and reconnect with backoff
//! - Topic routing between configured templates, rooms and categories
//! - The alert engine and the service runtime that drives it
//! - Adapters for the indicator actuator, a simulated sensor, smoothing and
//!   observation
//!
//! # Quick Start
//!
//! ```rust
//! use thermoguard::engine::{AlertEngine, AlertThresholds};
//! use thermoguard::protocol::{AlertKind, TelemetryReading};
//!
//! let mut engine = AlertEngine::new(AlertThresholds {
//!     high_threshold: 28.0,
//!     low_threshold: 24.0,
//!     cooldown_s: 60,
//! });
//!
//! let hot = TelemetryReading::new("rpi-1", 1_700_000_000, "kitchen", 29.0);
//! let outcome = engine.evaluate(&hot, 1_700_000_000).unwrap();
//! assert_eq!(outcome.kind(), AlertKind::Overheat);
//!
//! // Still hot: no second alert until the room recovers
//! assert!(engine.evaluate(&hot, 1_700_000_010).is_none());
//! ```

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod service;
pub mod testing;
pub mod transport;

pub use config::*;
pub use engine::{AlertEngine, AlertOutcome, AlertThresholds};
pub use error::{ServiceError, ServiceResult};
pub use protocol::*;
pub use service::{AlertDispatcher, ServiceHandler, ServiceLifecycle};
pub use transport::mqtt::MqttClient;
