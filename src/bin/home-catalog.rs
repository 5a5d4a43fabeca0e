//! Home catalog server
//!
//! Serves the broker descriptor and every service's configuration from one
//! JSON file.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use thermoguard::catalog::{CatalogDocument, CatalogServer};
use thermoguard::observability::init_default_logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "home-catalog")]
#[command(about = "Configuration registry for thermoguard services")]
#[command(version)]
struct Cli {
    /// Catalog document to serve
    #[arg(long, value_name = "FILE", default_value = "config/home_catalog.json")]
    file: PathBuf,

    /// Listen port
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    // Fail fast on a missing or broken file; later edits are picked up per request
    if let Err(e) = CatalogDocument::load(&cli.file).await {
        error!("Cannot serve catalog: {}", e);
        process::exit(1);
    }

    let server = CatalogServer::new(cli.file, cli.port);
    tokio::select! {
        _ = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Home catalog shutting down");
        }
    }
}
