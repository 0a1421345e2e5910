//! acqsrv binary

use std::path::PathBuf;
use std::sync::Arc;

use acqsrv::api::{create_router, AppState};
use acqsrv::config::{Config, DEFAULT_CONFIG_PATH};
use acqsrv::{
    logging, shutdown, AcquisitionEngine, BlockReader, Poller, SnapshotStore, WriteVerifier,
    SERVICE_NAME, SERVICE_VERSION,
};
use anyhow::Context;
use clap::Parser;
use fieldlink_modbus::{Connector, Negotiator, TcpConnector};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "acqsrv", version, about = "Modbus-TCP acquisition service")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "ACQSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    logging::init(&args.log_level);
    info!(
        "Starting {} v{} - device {}:{} unit {}, interval {}ms, decode {}",
        SERVICE_NAME,
        SERVICE_VERSION,
        config.device.host,
        config.device.port,
        config.device.unit_id,
        config.polling.interval_ms,
        config.decode
    );

    let config = Arc::new(config);
    let connector: Arc<dyn Connector> = Arc::new(TcpConnector);
    let negotiator = Negotiator::default();

    let reader = BlockReader::new(
        connector.clone(),
        negotiator.clone(),
        config.device.endpoint(),
        config.blocks.clone(),
        config.decode,
    );
    let engine = Arc::new(AcquisitionEngine::new(reader, Arc::new(SnapshotStore::new())));
    let poller = Poller::new(engine.clone(), config.polling.interval()).spawn();

    let token = CancellationToken::new();
    let api_handle = if config.service.enable_api {
        let addr = format!("{}:{}", config.service.api_host, config.service.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server on {addr}"))?;
        info!("API listening on {}", addr);

        let state = AppState::new(
            config.clone(),
            engine,
            WriteVerifier::new(connector, negotiator),
        );
        let app = create_router(state);
        let api_token = token.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { api_token.cancelled().await })
                .await
            {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    shutdown::shutdown_signal(token).await;
    info!("Shutting down");

    poller.stop().await;
    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            error!("API task failed: {}", e);
        }
    }

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
