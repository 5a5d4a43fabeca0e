//! Alert engine
//!
//! Per-room hysteresis with cooldown. See [`AlertEngine::evaluate`] for the
//! transition rules.

pub mod alert_engine;
pub mod state;

pub use alert_engine::{AlertEngine, AlertOutcome, AlertThresholds};
pub use state::{AlertPhase, RoomAlertState};
