//! Device and observer adapters around the alert engine
//!
//! Each adapter is a [`crate::service::ServiceHandler`] run by the same
//! [`crate::service::ServiceLifecycle`] as the engine service.

pub mod indicator;
pub mod monitor;
pub mod simulator;
pub mod smoother;

pub use indicator::IndicatorConnector;
pub use monitor::TelemetryMonitor;
pub use simulator::TemperatureSimulator;
pub use smoother::TelemetrySmoother;
