//! Process bootstrap shared by every service binary
//!
//! Resolves configuration (catalog or local file), builds the MQTT transport
//! and health server, then runs one handler until a signal or a permanent
//! connection loss.

use super::{ServiceHandler, ServiceLifecycle};
use crate::catalog::{HomeCatalogClient, DEFAULT_CATALOG_URL};
use crate::config::{BrokerConfig, ServiceConfig, ServiceFile};
use crate::error::ServiceResult;
use crate::observability::{metrics, HealthServer};
use crate::protocol::Subscription;
use crate::transport::mqtt::MqttClient;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Options common to all service binaries
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Home catalog base URL
    #[arg(long, env = "HOME_CATALOG_URL", default_value = DEFAULT_CATALOG_URL)]
    pub catalog_url: String,

    /// Load `[broker]` and `[service]` from a TOML file instead of the catalog
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port of the health endpoint
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Do not start the health endpoint
    #[arg(long)]
    pub no_health: bool,
}

impl ServiceArgs {
    pub fn config_source(&self) -> ConfigSource {
        match &self.config {
            Some(path) => ConfigSource::File(path.clone()),
            None => ConfigSource::Catalog(self.catalog_url.clone()),
        }
    }

    pub fn health_port(&self) -> Option<u16> {
        (!self.no_health).then_some(self.health_port)
    }
}

/// Where a service reads its configuration from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Catalog(String),
    File(PathBuf),
}

/// Fetch and validate the broker descriptor and the service configuration
pub async fn load_config<T: ServiceConfig>(
    source: &ConfigSource,
) -> ServiceResult<(BrokerConfig, T)> {
    match source {
        ConfigSource::Catalog(url) => {
            info!(catalog = %url, service = T::SERVICE_NAME, "Loading configuration from catalog");
            let client = HomeCatalogClient::new(url)?;
            Ok(client.load::<T>().await?)
        }
        ConfigSource::File(path) => {
            info!(path = %path.display(), service = T::SERVICE_NAME, "Loading configuration from file");
            let file = ServiceFile::<T>::load_from_file(path)?;
            Ok((file.broker, file.service))
        }
    }
}

/// Connect `handler` to the broker and run it until shutdown
///
/// A permanently lost connection still shuts down cleanly, then returns the
/// error so the process exits non-zero.
pub async fn run_service<H>(
    service_name: &str,
    broker: BrokerConfig,
    handler: H,
    subscriptions: &[Subscription],
    health_port: Option<u16>,
) -> ServiceResult<()>
where
    H: ServiceHandler<MqttClient>,
{
    metrics().set_service_state("initializing");
    let transport = MqttClient::new(service_name, broker)?;
    let mut lifecycle = ServiceLifecycle::new(service_name, transport);

    if let Some(port) = health_port {
        let health_server = Arc::new(HealthServer::new(service_name, port));
        tokio::spawn(health_server.clone().start());
        lifecycle.set_health_server(health_server);
    }

    lifecycle.start(handler, subscriptions).await?;
    info!(service = %service_name, "Service is running");

    let outcome = lifecycle.run_until_shutdown().await;
    if let Err(e) = &outcome {
        error!(service = %service_name, error = %e, "Stopping service");
    }

    lifecycle.shutdown().await?;
    outcome
}
