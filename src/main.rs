// src/main.rs - Squawker entry point
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use squawker::audio::{PacedSink, WavFileSource};
use squawker::simulator::{SimBird, SimMotorDriver};
use squawker::{Config, Squawker, load_config};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Directory of 16-bit PCM .wav files to play
    sounddir: PathBuf,

    /// TOML configuration file; built-in defaults are used when absent
    #[arg(long)]
    config: Option<String>,

    /// Seed for the schedule RNG, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
        _ = terminate_signal() => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).init();
    tracing::info!("Starting squawker {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    if cli.seed.is_some() {
        config.schedule.seed = cli.seed;
    }

    // GPIO bindings live outside this crate; the bundled binary drives the simulated bird.
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver);
    let mechanism = bird.spawn();

    let squawker = match Squawker::new(
        config,
        &cli.sounddir,
        bird.context(),
        Arc::new(WavFileSource),
        Arc::new(PacedSink),
    )
    .await
    {
        Ok(squawker) => squawker,
        Err(e) => {
            tracing::error!("Failed to initialize squawker: {}", e);
            mechanism.abort();
            return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
        }
    };

    let result = tokio::select! {
        result = squawker.run() => result,
        _ = shutdown_signal() => {
            tracing::info!("Termination signal received");
            Ok(())
        }
    };

    squawker.kill_motors();
    mechanism.abort();
    if let Err(e) = result {
        tracing::error!("Squawker stopped: {}", e);
        return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
    }
    tracing::info!("Squawker stopped");
    Ok(())
}
