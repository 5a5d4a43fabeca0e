//! Testing utilities and mock implementations
//!
//! In-memory stand-ins for the broker connection and the wall clock so the
//! alert service and the adapters can be exercised without external processes.

pub mod mocks;

pub use mocks::*;
