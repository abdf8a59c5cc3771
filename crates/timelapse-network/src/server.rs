use std::{collections::BTreeMap, future::Future, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use timelapse_fetcher::SnapshotClient;
use timelapse_orchestrator::TimelapseCamera;
use timelapse_stream::MJPEG_CONTENT_TYPE;
use timelapse_types::{config::ServerConfig, status::CameraStatus, Result, TimelapseError};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::LocalHost;

pub type Camera<C> = TimelapseCamera<C, LocalHost>;

/// Shared state behind every route.
pub struct AppState<C> {
    cameras: Arc<BTreeMap<String, Camera<C>>>,
    host: Arc<LocalHost>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            cameras: Arc::clone(&self.cameras),
            host: Arc::clone(&self.host),
        }
    }
}

impl<C> AppState<C>
where
    C: SnapshotClient + 'static,
{
    pub fn new(host: Arc<LocalHost>, cameras: impl IntoIterator<Item = Camera<C>>) -> Self {
        let cameras = cameras
            .into_iter()
            .map(|camera| (camera.name(), camera))
            .collect();
        Self {
            cameras: Arc::new(cameras),
            host,
        }
    }

    pub fn cameras(&self) -> impl Iterator<Item = &Camera<C>> {
        self.cameras.values()
    }

    pub fn host(&self) -> &Arc<LocalHost> {
        &self.host
    }

    fn camera(&self, name: &str) -> std::result::Result<&Camera<C>, StatusCode> {
        self.cameras.get(name).ok_or(StatusCode::NOT_FOUND)
    }
}

pub fn router<C>(state: AppState<C>) -> Router
where
    C: SnapshotClient + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/cameras", get(list_cameras::<C>))
        .route("/api/cameras/:name", get(camera_status::<C>))
        .route("/api/cameras/:name/snapshot", get(snapshot::<C>))
        .route("/api/cameras/:name/stream", get(stream::<C>))
        .route("/api/cameras/:name/:action", post(control::<C>))
        .route("/api/signals/:id", put(set_signal::<C>))
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<C, F>(config: &ServerConfig, state: AppState<C>, shutdown: F) -> Result<()>
where
    C: SnapshotClient + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| server_error(format!("unable to bind {addr}: {err}")))?;
    info!("Serving cameras on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| server_error(err.to_string()))
}

async fn health() -> &'static str {
    "ok"
}

async fn list_cameras<C>(State(state): State<AppState<C>>) -> Json<Vec<CameraStatus>>
where
    C: SnapshotClient + 'static,
{
    let mut statuses = Vec::with_capacity(state.cameras.len());
    for camera in state.cameras() {
        statuses.push(camera.status().await);
    }
    Json(statuses)
}

async fn camera_status<C>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<CameraStatus>, StatusCode>
where
    C: SnapshotClient + 'static,
{
    let camera = state.camera(&name)?;
    Ok(Json(camera.status().await))
}

async fn snapshot<C>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> std::result::Result<Response, StatusCode>
where
    C: SnapshotClient + 'static,
{
    let camera = state.camera(&name)?;
    match camera.latest_frame().await {
        Some(bytes) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn stream<C>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> std::result::Result<Response, StatusCode>
where
    C: SnapshotClient + 'static,
{
    let camera = state.camera(&name)?;
    let body = Body::from_stream(camera.mjpeg_stream().await);
    Ok(([(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)], body).into_response())
}

async fn control<C>(
    State(state): State<AppState<C>>,
    Path((name, action)): Path<(String, String)>,
) -> std::result::Result<Json<CameraStatus>, StatusCode>
where
    C: SnapshotClient + 'static,
{
    let camera = state.camera(&name)?;
    match action.as_str() {
        "turn_on" => camera.turn_on().await,
        "turn_off" => camera.turn_off().await,
        "pause" => camera.pause().await,
        "resume" => camera.resume().await,
        "clear_images" => camera.clear_images().await,
        other => {
            warn!("Unknown action {other} requested for {name}");
            return Err(StatusCode::NOT_FOUND);
        }
    }
    Ok(Json(camera.status().await))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalUpdate {
    pub state: bool,
}

async fn set_signal<C>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(update): Json<SignalUpdate>,
) -> StatusCode
where
    C: SnapshotClient + 'static,
{
    state.host.set_signal(&id, update.state);
    StatusCode::NO_CONTENT
}

pub fn server_error(message: impl Into<String>) -> TimelapseError {
    TimelapseError::Server(message.into())
}
