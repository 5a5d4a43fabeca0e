//! thermoguard alert service - main entry point
//!
//! Loads the `alert_strategy` configuration, connects to the broker and runs
//! the alert dispatcher until SIGINT/SIGTERM.

use clap::{Parser, Subcommand};
use std::process;
use thermoguard::config::{AlertEngineConfig, BrokerConfig, ServiceConfig};
use thermoguard::observability::init_default_logging;
use thermoguard::service::{load_config, run_service, AlertDispatcher, ServiceArgs};
use thermoguard::ServiceResult;
use tracing::{error, info};

/// Room temperature alert service
#[derive(Parser)]
#[command(name = "thermoguard")]
#[command(about = "Per-room temperature alerting with hysteresis and cooldown")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alert service
    Run,
    /// Fetch and validate the configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting thermoguard v{}", env!("CARGO_PKG_VERSION"));

    let (broker, config) =
        match load_config::<AlertEngineConfig>(&cli.service.config_source()).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                process::exit(1);
            }
        };

    let result = match cli.command {
        Commands::Run => run_alert_service(&cli.service, broker, config).await,
        Commands::Config { show } => handle_config_command(&broker, &config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_alert_service(
    args: &ServiceArgs,
    broker: BrokerConfig,
    config: AlertEngineConfig,
) -> ServiceResult<()> {
    info!(
        rooms = ?config.rooms,
        high_threshold = config.high_threshold,
        low_threshold = config.low_threshold,
        cooldown_s = config.cooldown_s,
        "Alert thresholds loaded"
    );

    let dispatcher = AlertDispatcher::from_config(&config)?;
    let subscriptions = dispatcher.subscriptions();

    run_service(
        AlertEngineConfig::SERVICE_NAME,
        broker,
        dispatcher,
        &subscriptions,
        args.health_port(),
    )
    .await
}

fn handle_config_command(
    broker: &BrokerConfig,
    config: &AlertEngineConfig,
    show: bool,
) -> ServiceResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| thermoguard::ServiceError::internal(e.to_string()))?;
        println!("# broker {}:{}", broker.host, broker.port);
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
