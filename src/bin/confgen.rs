//! Confgen CLI Binary
//!
//! Loads configuration, waits for the metadata service and runs the
//! scheduler until completion or a shutdown signal.

use clap::Parser;
use confgen::cli::Cli;
use confgen::config::Settings;
use confgen::logging::init_logging;
use confgen::metadata::HttpMetadataSource;
use confgen::scheduler::Scheduler;
use std::process;
use tracing::{error, info};

const CONNECT_ATTEMPTS: usize = 30;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level.as_deref(), &cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    info!(
        url = %settings.metadata_url,
        version = %settings.metadata_version,
        "Connecting to metadata service"
    );

    let source = match HttpMetadataSource::connect_and_wait(
        &settings.metadata_url,
        &settings.metadata_version,
        CONNECT_ATTEMPTS,
    )
    .await
    {
        Ok(source) => source,
        Err(e) => {
            error!("Could not reach metadata service: {}", e);
            process::exit(1);
        }
    };

    let mut scheduler = Scheduler::new(Box::new(source), settings);
    if let Err(e) = scheduler.run().await {
        error!("Run failed: {:#}", e);
        process::exit(1);
    }
}
