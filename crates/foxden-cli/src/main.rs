use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use foxden_core::config::Config;
use foxden_pool::{PoolManager, PoolRegistry};
use foxden_status::{StatusState, start_status_server};

#[derive(Parser)]
#[command(
    name = "foxden",
    about = "Supervises a pool of Camoufox browser server processes behind stable endpoints",
    version
)]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the configured pool size
    #[arg(long)]
    pool_size: Option<usize>,

    /// Override the status service port
    #[arg(long)]
    status_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Load config, then overlay env vars and CLI flags
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("foxden.json5"));

    let mut config = Config::load(&config_path)?;
    config.apply_env();
    if let Some(size) = cli.pool_size {
        config.pool.get_or_insert_with(Default::default).size = size;
    }
    if let Some(port) = cli.status_port {
        config.status.get_or_insert_with(Default::default).port = port;
    }

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        warn!("{warning}");
    }
    if !errors.is_empty() {
        for err in &errors {
            error!("{err}");
        }
        anyhow::bail!("invalid configuration");
    }

    let config = Arc::new(config);
    info!(
        pool_size = config.pool_size(),
        base_port = config.base_port(),
        status_port = config.status_port(),
        "starting foxden"
    );

    let registry = Arc::new(PoolRegistry::new(config.pool_size()));
    let manager = Arc::new(PoolManager::new(config.clone(), registry.clone()));

    // Status service comes up before any worker so orchestrators see
    // liveness (and a 503 readiness) from the start.
    let status_state = Arc::new(StatusState {
        config: config.clone(),
        registry: registry.clone(),
        metrics: foxden_status::metrics::install_prometheus_recorder(),
    });
    let status_token = manager.shutdown_token();
    tokio::spawn(async move {
        if let Err(err) = start_status_server(status_state, status_token).await {
            error!(%err, "status service failed");
        }
    });

    if let Err(err) = manager.launch_all().await {
        error!(%err, "fatal: worker pool failed to start");
        manager.shutdown().await;
        return Err(err.into());
    }

    tokio::select! {
        _ = wait_for_shutdown_signal() => info!("termination signal received"),
        _ = manager.wait_all_exited() => warn!("all workers exited, shutting down"),
    }

    manager.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "failed to install SIGTERM handler, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
