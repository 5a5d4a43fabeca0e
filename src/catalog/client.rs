//! HTTP client for the home catalog
//!
//! Services fetch their configuration exactly once at start-up. Any failure
//! here is fatal to the caller; there are no retries and no defaults.

use crate::config::{BrokerConfig, ConfigError, ServiceConfig};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Catalog address used when neither the flag nor `HOME_CATALOG_URL` is set
pub const DEFAULT_CATALOG_URL: &str = "http://localhost:8000";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid catalog URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Catalog request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Service '{0}' is not registered in the catalog")]
    ServiceNotRegistered(String),
    #[error("Catalog returned HTTP {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("Catalog document for '{name}' is invalid: {source}")]
    InvalidDocument {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Catalog configuration for '{name}' failed validation: {source}")]
    Validation {
        name: String,
        #[source]
        source: ConfigError,
    },
}

/// Read-only client for `/mqtt` and `/config/{service}`
#[derive(Debug, Clone)]
pub struct HomeCatalogClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HomeCatalogClient {
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        // A trailing slash keeps `join` from dropping the last path segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| CatalogError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(CatalogError::InvalidUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme '{}'", base_url.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CatalogError::Request {
                url: base_url.to_string(),
                source: e,
            })?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Broker descriptor shared by every service
    pub async fn get_mqtt_config(&self) -> Result<BrokerConfig, CatalogError> {
        let value = self.get_json("mqtt", "mqtt").await?;
        let broker: BrokerConfig =
            serde_json::from_value(value).map_err(|e| CatalogError::InvalidDocument {
                name: "mqtt".to_string(),
                source: e,
            })?;
        broker.validate().map_err(|e| CatalogError::Validation {
            name: "mqtt".to_string(),
            source: e,
        })?;
        Ok(broker)
    }

    /// Raw configuration document registered under `service_name`
    pub async fn get_raw_service_config(&self, service_name: &str) -> Result<Value, CatalogError> {
        self.get_json(&format!("config/{service_name}"), service_name)
            .await
    }

    /// Typed and validated configuration for `T`
    pub async fn get_service_config<T: ServiceConfig>(&self) -> Result<T, CatalogError> {
        let name = T::SERVICE_NAME;
        let value = self.get_raw_service_config(name).await?;
        let config: T =
            serde_json::from_value(value).map_err(|e| CatalogError::InvalidDocument {
                name: name.to_string(),
                source: e,
            })?;
        config.validate().map_err(|e| CatalogError::Validation {
            name: name.to_string(),
            source: e,
        })?;
        info!(service = name, "Loaded service configuration from catalog");
        Ok(config)
    }

    /// Broker descriptor and service configuration in one call
    pub async fn load<T: ServiceConfig>(&self) -> Result<(BrokerConfig, T), CatalogError> {
        let broker = self.get_mqtt_config().await?;
        let service = self.get_service_config::<T>().await?;
        Ok((broker, service))
    }

    async fn get_json(&self, path: &str, name: &str) -> Result<Value, CatalogError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CatalogError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                reason: e.to_string(),
            })?;

        debug!(url = %url, "Fetching catalog document");

        let response =
            self.client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| CatalogError::Request {
                    url: url.to_string(),
                    source: e,
                })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::ServiceNotRegistered(name.to_string()));
        }
        if !status.is_success() {
            return Err(CatalogError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::Request {
                url: url.to_string(),
                source: e,
            })
    }
}
