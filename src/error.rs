//! Crate-level error type
//!
//! Each layer keeps its own `thiserror` enum; `ServiceError` is what the
//! service lifecycle and the binaries report. Every variant is fatal for the
//! process: recoverable conditions (bad payloads, failed publishes) are logged
//! and counted where they happen and never surface here.

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::protocol::TopicError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Transport permanently disconnected: {reason}")]
    PermanentlyDisconnected { reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Wrap the associated error of any `Transport` implementation
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
