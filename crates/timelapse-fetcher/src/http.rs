use async_trait::async_trait;
use reqwest::{header::LAST_MODIFIED, Client, StatusCode};
use timelapse_types::{config::FETCH_TIMEOUT, Result};
use tracing::debug;

use crate::{network_error, SnapshotClient, SnapshotRequest, SnapshotResponse};

/// `reqwest`-backed snapshot client shared by every camera in the process.
#[derive(Clone)]
pub struct HttpSnapshotClient {
    client: Client,
}

impl HttpSnapshotClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|err| network_error(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SnapshotClient for HttpSnapshotClient {
    async fn fetch_snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotResponse> {
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, password.as_ref());
        }

        let response = builder.send().await.map_err(|err| {
            let kind = if err.is_timeout() { "timed out" } else { "failed" };
            network_error(format!("GET {} {kind}: {err}", request.url))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(SnapshotResponse::NotModified);
        }
        if !status.is_success() {
            return Err(network_error(format!(
                "GET {} returned HTTP {status}",
                request.url
            )));
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|err| network_error(format!("failed to read body from {}: {err}", request.url)))?;
        debug!("Fetched {} bytes from {}", body.len(), request.url);

        Ok(SnapshotResponse::Modified {
            last_modified,
            body,
        })
    }
}
