//! Wire protocol for room telemetry, alerts and actuator commands
//!
//! This module defines the JSON payloads exchanged over the broker and the
//! topic template rules used to address them per room.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
