mod config;
mod convert;
mod pipeline;
mod scan;
mod server_client;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

use config::ClientConfig;

#[derive(Parser, Debug)]
#[command(name = "sttq-client", about = "Batch client for the asynchronous speech-to-text transcription server")]
struct Cli {
    /// Directory to scan recursively for video files.
    scan_root: PathBuf,
    /// Shared bundle password used to encrypt uploaded audio.
    password: String,
    /// Override the configured server URL.
    #[arg(long)]
    server_url: Option<String>,
    /// Override the configured transcription model.
    #[arg(long)]
    model: Option<String>,
    /// Write subtitles here instead of next to each source video.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Keep converted audio and bundle files instead of deleting them after submission.
    #[arg(long)]
    keep_scratch: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = ClientConfig::load(cli.scan_root.clone(), cli.password.clone())
        .context("loading client configuration")?;

    if let Some(server_url) = cli.server_url {
        config.server_url = server_url;
    }
    if let Some(model) = cli.model {
        config.default_model = model;
    }
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir;
    }
    if cli.keep_scratch {
        config.keep_scratch = true;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    info!(
        "starting sttq-client: scan_root={:?} server={} model={}",
        config.scan_root, config.server_url, config.default_model
    );

    let failures = pipeline::run(config).await.context("running transcription pipeline")?;

    if failures > 0 {
        info!("completed with {failures} failed file(s)");
        Ok(ExitCode::FAILURE)
    } else {
        info!("completed successfully");
        Ok(ExitCode::SUCCESS)
    }
}
