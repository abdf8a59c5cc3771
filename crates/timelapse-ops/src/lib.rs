//! Operational helpers: logging, data directory setup, event journaling.

use std::path::PathBuf;

use futures::{stream::BoxStream, StreamExt};
use timelapse_types::{
    config::{OpsConfig, StorageConfig},
    events::{CameraEvent, CameraEventKind},
    Result, TimelapseError,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| TimelapseError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| TimelapseError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_data_dir(config: &StorageConfig) -> Result<PathBuf> {
    let dir = PathBuf::from(&config.data_dir);
    std::fs::create_dir_all(&dir)
        .map_err(|err| TimelapseError::Ops(format!("failed to create data dir: {err}")))?;
    info!("Frame storage ready at {:?}", dir);
    Ok(dir)
}

/// Writes every camera event to the log until the stream ends.
pub fn spawn_event_journal(mut events: BoxStream<'static, CameraEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = events.next().await {
            journal(&event);
            seen += 1;
        }
        seen
    })
}

fn journal(event: &CameraEvent) {
    let camera = &event.camera;
    match &event.kind {
        CameraEventKind::StateChanged { status } => info!(
            camera = %camera,
            state = ?status.state,
            available = status.available,
            frames = status.frame_count,
            "state changed"
        ),
        CameraEventKind::FrameStored { frame } => debug!(camera = %camera, %frame, "frame stored"),
        CameraEventKind::Unreachable { reason } => warn!(camera = %camera, %reason, "source unreachable"),
        CameraEventKind::Cleared => info!(camera = %camera, "frames cleared"),
        CameraEventKind::Removed => info!(camera = %camera, "camera removed"),
    }
}
