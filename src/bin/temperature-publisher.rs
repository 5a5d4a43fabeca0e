//! Simulated temperature sensor

use clap::Parser;
use std::process;
use thermoguard::adapters::TemperatureSimulator;
use thermoguard::config::{PublisherConfig, ServiceConfig};
use thermoguard::observability::init_default_logging;
use thermoguard::service::{load_config, run_service, ServiceArgs};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "temperature-publisher")]
#[command(about = "Publishes simulated room temperature readings")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let (broker, config) = match load_config::<PublisherConfig>(&cli.service.config_source()).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Publish-only: no subscriptions
    let handler = TemperatureSimulator::new(&config);
    if let Err(e) = run_service(
        PublisherConfig::SERVICE_NAME,
        broker,
        handler,
        &[],
        cli.service.health_port(),
    )
    .await
    {
        error!("Service failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}
