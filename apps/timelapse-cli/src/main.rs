use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use timelapse_fetcher::HttpSnapshotClient;
use timelapse_network::{serve, AppState, LocalHost};
use timelapse_ops::{ensure_data_dir, init_tracing, spawn_event_journal};
use timelapse_orchestrator::TimelapseCamera;
use timelapse_types::config::TimelapseConfig;
use tracing::info;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "timelapse", about = "Snapshot timelapse cameras served as MJPEG")]
struct Cli {
    /// TOML configuration file.
    #[arg(
        long,
        env = "TIMELAPSE_CONFIG",
        default_value = "configs/timelapse.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Capture frames and serve the HTTP surface until interrupted.
    Run,
    /// Validate the configuration and print the resolved sources.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => {
            print!("{}", describe(&config));
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

fn load_config(path: &Path) -> Result<TimelapseConfig> {
    let config = TimelapseConfig::from_file(path)
        .with_context(|| format!("failed to load config from '{}'", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config in '{}'", path.display()))?;
    Ok(config)
}

fn describe(config: &TimelapseConfig) -> String {
    let mut out = format!(
        "storage: {}\nserver: {}:{}\n",
        config.storage.data_dir, config.server.bind_addr, config.server.port
    );
    for source in &config.sources {
        let window = source
            .time_window()
            .map(|window| {
                format!(
                    "{}-{}",
                    window.start.format("%H:%M:%S"),
                    window.end.format("%H:%M:%S")
                )
            })
            .unwrap_or_else(|err| format!("invalid ({err})"));
        out.push_str(&format!(
            "- {}: {} every {}s, {} fps, {} frames, quality {}, loop {}, window {}\n",
            source.name,
            source.image_url,
            source.fetch_interval,
            source.framerate,
            source.max_frames,
            source.quality,
            source.loop_frames,
            window
        ));
    }
    out
}

async fn run(config: TimelapseConfig) -> Result<()> {
    init_tracing(&config.ops)?;
    let data_dir = ensure_data_dir(&config.storage)?;

    let host = Arc::new(LocalHost::new(EVENT_CAPACITY));
    let journal = spawn_event_journal(host.subscribe());
    let client = HttpSnapshotClient::new()?;

    let mut cameras = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let camera = TimelapseCamera::new(
            source.clone(),
            data_dir.clone(),
            client.clone(),
            Arc::clone(&host),
        )
        .with_context(|| format!("failed to set up camera '{}'", source.name))?;
        camera.start().await;
        info!("Camera {} capturing {}", source.name, source.image_url);
        cameras.push(camera);
    }

    let state = AppState::new(Arc::clone(&host), cameras);
    serve(&config.server, state.clone(), shutdown_signal()).await?;

    info!("Shutting down {} camera(s)", config.sources.len());
    for camera in state.cameras() {
        camera.turn_off().await;
    }
    journal.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
