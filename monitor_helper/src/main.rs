//! Tunnel Monitor Helper Daemon
//!
//! Hosts the status provider behind a Unix domain socket so controllers such
//! as `monitorctl` can ping it and poll its service status.

mod status_provider;

use clap::Parser;
use monitor_ipc::codec;
use monitor_ipc::provider::serve_provider;
use monitor_ipc::transport::ProviderListener;
use shared_utils::config::Config;
use shared_utils::logging::init_logging_from_config;
use status_provider::{ProviderSettings, StatusProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Command-line arguments for the helper daemon
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the Unix Domain Socket to listen on (overrides the config file)
    #[arg(short, long)]
    socket_path: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network interface name to report while the tunnel is up
    #[arg(long)]
    interface: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config_result = Config::load(&config_path);
    let mut config = config_result.as_ref().cloned().unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    let _guard = init_logging_from_config(&config);

    info!("Tunnel Monitor Helper Daemon starting up");

    match &config_result {
        Ok(_) => info!("Loaded configuration from {}", config_path.display()),
        Err(e) => {
            warn!(
                "Failed to load configuration from {}: {}",
                config_path.display(),
                e
            );
            warn!("Using default configuration");
        }
    }

    let socket_path = args
        .socket_path
        .unwrap_or_else(|| PathBuf::from(&config.helper.socket_path));
    debug!("Socket path: {}", socket_path.display());

    // Ensure the socket directory exists
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = ProviderListener::bind(&socket_path)
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", socket_path.display(), e))?
        .with_io_timeout(config.io_timeout());

    let settings = ProviderSettings {
        provider_version: config.helper.provider_version.clone(),
        interface_name: args.interface,
    };
    let user_configuration = codec::encode(&settings)?;

    let shutdown = CancellationToken::new();
    let mut host = tokio::spawn(serve_provider(
        Arc::new(StatusProvider::new()),
        listener,
        Some(user_configuration),
        shutdown.clone(),
    ));

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        result = &mut host => {
            // The provider host exited on its own; nothing left to wait for
            match result {
                Ok(Ok(())) => info!("Provider host exited"),
                Ok(Err(e)) => {
                    error!("Provider host failed: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Provider host task failed: {}", e);
                    return Err(e.into());
                }
            }
            return Ok(());
        }
    }

    shutdown.cancel();
    match host.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Provider host failed during shutdown: {}", e),
        Err(e) => error!("Error waiting for provider host to finish: {}", e),
    }

    info!("Tunnel Monitor Helper Daemon shut down");
    Ok(())
}
