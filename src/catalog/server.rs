//! Home catalog HTTP server
//!
//! Serves the broker descriptor and per-service configuration documents from a
//! single JSON file. The file is read again on every request so edits take
//! effect without a restart.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::Filter;

/// Catalog file layout: `{"mqtt": {...}, "services": {"name": {...}}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogDocument {
    pub mqtt: Value,
    #[serde(default)]
    pub services: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum CatalogFileError {
    #[error("Missing catalog file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Catalog file {path} is not a valid catalog document: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CatalogDocument {
    pub async fn load(path: &Path) -> Result<Self, CatalogFileError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CatalogFileError::Read {
                    path: path.display().to_string(),
                    source: e,
                })?;
        serde_json::from_str(&content).map_err(|e| CatalogFileError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

/// Serves `/health`, `/mqtt` and `/config/{service_name}`
pub struct CatalogServer {
    path: Arc<PathBuf>,
    port: u16,
}

impl CatalogServer {
    pub fn new(path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            path: Arc::new(path.into()),
            port,
        }
    }

    /// All catalog routes, separated from `run` so they can be tested in-process
    pub fn routes(
        path: Arc<PathBuf>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&json!({"status": "ok"})));

        let mqtt_path = path.clone();
        let mqtt_route = warp::path("mqtt")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let path = mqtt_path.clone();
                async move {
                    let reply = match CatalogDocument::load(&path).await {
                        Ok(document) => {
                            warp::reply::with_status(warp::reply::json(&document.mqtt), StatusCode::OK)
                        }
                        Err(e) => file_error_reply(e),
                    };
                    Ok::<_, Infallible>(reply)
                }
            });

        let config_path = path;
        let config_route = warp::path!("config" / String)
            .and(warp::get())
            .and_then(move |service_name: String| {
                let path = config_path.clone();
                async move {
                    let reply = match CatalogDocument::load(&path).await {
                        Ok(document) => match document.services.get(&service_name) {
                            Some(config) => {
                                warp::reply::with_status(warp::reply::json(config), StatusCode::OK)
                            }
                            None => {
                                warn!(service = %service_name, "Configuration requested for unregistered service");
                                warp::reply::with_status(
                                    warp::reply::json(&json!({"detail": "service not registered"})),
                                    StatusCode::NOT_FOUND,
                                )
                            }
                        },
                        Err(e) => file_error_reply(e),
                    };
                    Ok::<_, Infallible>(reply)
                }
            });

        health_route.or(mqtt_route).or(config_route)
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Serve until the process exits
    pub async fn run(self) {
        info!(
            port = self.port,
            file = %self.path.display(),
            "Starting home catalog"
        );
        let address = self.address();
        warp::serve(Self::routes(self.path)).run(address).await;
    }
}

fn file_error_reply(error: CatalogFileError) -> warp::reply::WithStatus<warp::reply::Json> {
    warn!(error = %error, "Failed to load catalog file");
    warp::reply::with_status(
        warp::reply::json(&json!({"detail": error.to_string()})),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}
