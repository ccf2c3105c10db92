use std::path::PathBuf;

use ::tracing::{error, info_span};
use anyhow::Result;
use clap::Parser;
use service::Service;

mod config;
mod http_objects;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::ServerConfig::from_path(cli.config.as_deref())?;

    let tracing_provider = setup_tracing(&config).inspect_err(|e| {
        eprintln!("Error setting up tracing: {:?}", e);
    })?;
    let meter_provider = metrics::init_provider(
        config.telemetry.enable_metrics,
        config.telemetry.endpoint.as_ref(),
        std::time::Duration::from_secs(config.telemetry.metrics_interval_secs),
    )?;

    let root_span = info_span!("gallery-server", listen_addr = %config.listen_addr);
    let _guard = root_span.enter();

    match Service::new(config).await {
        Ok(service) => {
            if let Err(err) = service.start().await {
                error!("Error starting service: {:?}", err);
            }
        }
        Err(err) => error!("Error creating service: {:?}", err),
    }

    // export telemetry before shutdown
    if let Some(meter_provider) = meter_provider {
        if let Err(err) = meter_provider.shutdown() {
            error!("Error shutting down meter provider: {:?}", err);
        }
    }
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("Error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("Error shutting down tracer provider: {:?}", err);
        }
    }
    Ok(())
}
