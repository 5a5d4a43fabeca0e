//! Moving-average telemetry post-processor

use clap::Parser;
use std::process;
use thermoguard::adapters::TelemetrySmoother;
use thermoguard::config::{SmootherConfig, ServiceConfig};
use thermoguard::observability::init_default_logging;
use thermoguard::service::{load_config, run_service, ServiceArgs};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "telemetry-smoother")]
#[command(about = "Republishes a per-room moving average of raw readings")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let (broker, config) = match load_config::<SmootherConfig>(&cli.service.config_source()).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let handler = TelemetrySmoother::new(&config);
    let subscriptions = handler.subscriptions();

    if let Err(e) = run_service(
        SmootherConfig::SERVICE_NAME,
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
