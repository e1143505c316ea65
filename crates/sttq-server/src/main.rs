mod config;
mod http;
mod registry;
mod store;
mod transcriber;
mod worker;
mod retention;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;

use config::ServerConfig;
use http::AppState;
use registry::TaskRegistry;
use store::ArtifactStore;
use transcriber::TranscriberDriver;

#[derive(Parser, Debug)]
#[command(name = "sttq-server", about = "Asynchronous speech-to-text transcription server")]
struct Cli {
    /// Override the configured host.
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
    /// Override the configured task pool capacity.
    #[arg(long)]
    capacity: Option<usize>,
    /// Skip the startup warmup check.
    #[arg(long)]
    no_warmup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load().context("loading server configuration")?;

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(capacity) = cli.capacity {
        config.capacity = capacity;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    info!(
        "starting sttq-server: capacity={} model={} transcriber={}",
        config.capacity, config.default_model, config.transcriber_bin
    );

    let store = ArtifactStore::new(
        &config.uploads_dir,
        &config.work_dir,
        &config.results_dir,
        config.retention_hours,
    )
    .context("initializing artifact store")?;

    if !cli.no_warmup {
        run_warmup(&config).await.context("startup warmup failed")?;
    }

    let registry = Arc::new(TaskRegistry::new(config.capacity));
    let driver = TranscriberDriver::new(config.transcriber_bin.clone());

    let worker_registry = registry.clone();
    let worker_store = store.clone();
    let worker_password = config.bundle_password.clone();
    tokio::spawn(async move {
        worker::run(worker_registry, worker_store, driver, worker_password).await;
    });

    let sweeper_registry = registry.clone();
    let sweeper_store = store.clone();
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        retention::run(sweeper_registry, sweeper_store, sweep_interval).await;
    });

    let state = AppState {
        registry,
        store,
        config: Arc::new(config.clone()),
    };
    let app = http::router(state);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    info!("listening on {}", config.bind_addr());

    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

/// Exercise the transcriber binary once before accepting real traffic,
/// mirroring the reference server's blocking warmup inference. A failure
/// here means the server would fail every submitted task anyway.
async fn run_warmup(config: &ServerConfig) -> Result<()> {
    let output = tokio::process::Command::new(&config.transcriber_bin)
        .arg("--help")
        .output()
        .await
        .with_context(|| format!("invoking transcriber binary '{}'", config.transcriber_bin))?;

    if !output.status.success() {
        anyhow::bail!(
            "transcriber binary '{}' exited non-zero during warmup",
            config.transcriber_bin
        );
    }
    info!("warmup check passed for transcriber '{}'", config.transcriber_bin);
    Ok(())
}
