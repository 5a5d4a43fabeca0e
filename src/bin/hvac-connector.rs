//! HVAC actuator connector

use clap::Parser;
use std::process;
use thermoguard::adapters::IndicatorConnector;
use thermoguard::config::{HvacConfig, ServiceConfig};
use thermoguard::observability::init_default_logging;
use thermoguard::service::{load_config, run_service, ServiceArgs};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hvac-connector")]
#[command(about = "Relays HVAC commands into a device state and echoes it back")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let (broker, config) = match load_config::<HvacConfig>(&cli.service.config_source()).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let handler = IndicatorConnector::hvac(&config);
    let subscriptions = handler.subscriptions();

    if let Err(e) = run_service(
        HvacConfig::SERVICE_NAME,
        broker,
        handler,
        &subscriptions,
        cli.service.health_port(),
    )
    .await
    {
        error!("Service failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}
