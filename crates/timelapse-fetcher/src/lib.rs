//! Snapshot fetching: conditional GET against the source URL and hand-off of
//! new images to the frame store.

mod http;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use timelapse_store::FrameStore;
use timelapse_types::{
    config::{SourceConfig, FETCH_TIMEOUT},
    frame::FrameId,
    Result, TimelapseError,
};
use tracing::{debug, error, warn};

pub use http::HttpSnapshotClient;

pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

/// Everything needed to issue one snapshot GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<(String, Option<String>)>,
    pub timeout: Duration,
}

impl SnapshotRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum SnapshotResponse {
    NotModified,
    Modified {
        last_modified: Option<String>,
        body: Bytes,
    },
}

#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Resolves to an error for transport failures and for any status other
    /// than 2xx or 304.
    async fn fetch_snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotResponse>;
}

/// Per-camera conditional GET state.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub last_modified: Option<String>,
    pub last_capture: Option<DateTime<Utc>>,
    pub available: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            last_modified: None,
            last_capture: None,
            available: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Unchanged,
    Stored(FrameId),
    Unreachable,
    Undecodable,
    StoreFailed,
}

pub struct Fetcher<C> {
    client: C,
}

impl<C: SnapshotClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Runs one capture attempt. Failures are logged and folded into the
    /// outcome; only network failures touch `state.available`.
    pub async fn fetch(
        &self,
        source: &SourceConfig,
        store: &FrameStore,
        state: &mut SessionState,
    ) -> FetchOutcome {
        let request = build_request(source, state);
        let response = match self.client.fetch_snapshot(&request).await {
            Ok(response) => response,
            Err(err) => {
                error!("Failed to fetch image from {}: {err}", source.image_url);
                state.available = false;
                return FetchOutcome::Unreachable;
            }
        };

        let (last_modified, body) = match response {
            SnapshotResponse::NotModified => {
                debug!("HTTP 304 - {} unchanged", source.image_url);
                state.available = true;
                return FetchOutcome::Unchanged;
            }
            SnapshotResponse::Modified {
                last_modified,
                body,
            } => (last_modified, body),
        };

        if let Some(validator) = &last_modified {
            state.last_modified = Some(validator.clone());
        }
        let id = frame_timestamp(last_modified.as_deref(), Utc::now());
        debug!(
            "HTTP 200 - {} bytes, Last-Modified: {:?}",
            body.len(),
            last_modified
        );

        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.append(id, &body)).await {
            Ok(Ok(_)) => {
                state.available = true;
                state.last_capture = Some(Utc::now());
                FetchOutcome::Stored(id)
            }
            Ok(Err(TimelapseError::Decode(reason))) => {
                warn!("Discarding snapshot from {}: {reason}", source.image_url);
                FetchOutcome::Undecodable
            }
            Ok(Err(err)) => {
                error!("Can't write image to file: {err}");
                FetchOutcome::StoreFailed
            }
            Err(err) => {
                error!("Frame store task failed: {err}");
                FetchOutcome::StoreFailed
            }
        }
    }
}

/// Source headers plus `If-Modified-Since` once a validator is known.
pub fn build_request(source: &SourceConfig, state: &SessionState) -> SnapshotRequest {
    let mut headers: Vec<(String, String)> = source
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(IF_MODIFIED_SINCE))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if let Some(validator) = &state.last_modified {
        headers.push((IF_MODIFIED_SINCE.into(), validator.clone()));
    }
    SnapshotRequest {
        url: source.image_url.clone(),
        headers,
        basic_auth: source
            .credentials()
            .map(|(user, password)| (user.to_owned(), password.map(str::to_owned))),
        timeout: FETCH_TIMEOUT,
    }
}

/// Frame id from an HTTP date, falling back to `now` when absent or unparseable.
pub fn frame_timestamp(last_modified: Option<&str>, now: DateTime<Utc>) -> FrameId {
    last_modified
        .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
        .map(|parsed| FrameId(parsed.timestamp()))
        .unwrap_or_else(|| FrameId::from_datetime(now))
}

/// Scripted client used for integration testing without a camera.
#[derive(Clone, Default)]
pub struct MockSnapshotClient {
    script: Arc<Mutex<VecDeque<Result<SnapshotResponse>>>>,
    requests: Arc<Mutex<Vec<SnapshotRequest>>>,
}

impl MockSnapshotClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_image(&self, last_modified: Option<&str>, body: impl Into<Bytes>) {
        self.push(Ok(SnapshotResponse::Modified {
            last_modified: last_modified.map(str::to_owned),
            body: body.into(),
        }));
    }

    pub fn push_not_modified(&self) {
        self.push(Ok(SnapshotResponse::NotModified));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.push(Err(network_error(message)));
    }

    fn push(&self, response: Result<SnapshotResponse>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    pub fn requests(&self) -> Vec<SnapshotRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotClient for MockSnapshotClient {
    async fn fetch_snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .script
            .lock()
            .map_err(|_| network_error("mock script poisoned"))?
            .pop_front();
        next.unwrap_or_else(|| Err(network_error("no scripted response")))
    }
}

pub fn network_error(message: impl Into<String>) -> TimelapseError {
    TimelapseError::Network(message.into())
}
