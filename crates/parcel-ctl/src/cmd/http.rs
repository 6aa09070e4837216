//! HTTP helpers and the multipart chunk transport.

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;

use parcel_core::protocol::{FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_FILE_IDENTIFIER, FIELD_TOTAL_CHUNKS};
use parcel_core::{ArtifactInfo, ChunkReceipt, ChunkResponse, SessionProgress};
use parcel_services::{ChunkSubmission, ChunkTransport, TransportError};

pub async fn get_json<T: for<'de> Deserialize<'de>>(client: &reqwest::Client, url: &str) -> Result<T> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to connect to parceld at {url}, is it running?"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{url} returned {status}: {body}");
    }
    resp.json::<T>().await.context("failed to parse response")
}

/// Posts chunks to `<server>/api/upload-chunk` as multipart forms.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    server_url: String,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.server_url, path.trim_start_matches('/'))
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn list_files(&self) -> Result<Vec<ArtifactInfo>> {
        get_json(&self.client, &self.api_url("files")).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionProgress>> {
        get_json(&self.client, &self.api_url("sessions")).await
    }

    /// Fetch a completed artifact by its public path, e.g. `/uploads/a.bin`.
    pub async fn download(&self, artifact_path: &str) -> Result<bytes::Bytes> {
        let url = format!("{}{}", self.server_url, artifact_path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to connect to parceld at {url}, is it running?"))?;
        if !resp.status().is_success() {
            anyhow::bail!("{url} returned {}", resp.status());
        }
        resp.bytes().await.context("failed to read download")
    }
}

/// Map a non-success status to a transport error. Client errors other than
/// timeouts and throttling mean the chunk itself is bad.
fn classify(status: StatusCode, message: String) -> TransportError {
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        TransportError::Rejected(message)
    } else {
        TransportError::Unavailable(format!("{status}: {message}"))
    }
}

impl ChunkTransport for HttpTransport {
    async fn submit(&self, submission: ChunkSubmission) -> Result<ChunkReceipt, TransportError> {
        let name = submission.file_id.to_string();
        let form = Form::new()
            .text(FIELD_FILE_IDENTIFIER, name.clone())
            .text(FIELD_CHUNK_INDEX, submission.chunk_index.to_string())
            .text(FIELD_TOTAL_CHUNKS, submission.total_chunks.to_string())
            .part(
                FIELD_CHUNK,
                Part::bytes(submission.payload.to_vec()).file_name("blob"),
            );

        let resp = self
            .client
            .post(self.api_url("upload-chunk"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let body: Option<ChunkResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = body.map(|b| b.message).unwrap_or(text);
            return Err(classify(status, message));
        }

        body.as_ref()
            .and_then(|b| b.to_receipt(&name))
            .ok_or_else(|| TransportError::Unavailable(format!("unexpected response: {text}")))
    }
}
