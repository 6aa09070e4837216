//! Parcel integration test harness.
//!
//! Each test starts parceld's HTTP binding in-process on an ephemeral port
//! and talks to it over real HTTP, either through the `ChunkProducer` +
//! `HttpTransport` pair the CLI uses or with hand-built multipart requests.
//!
//!   cargo test --test integration

mod failures;
mod persistence;
mod uploads;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use parcel_api::ApiState;
use parcel_core::RetryPolicy;
use parcel_ctl::HttpTransport;
use parcel_services::{ChunkBackend, ChunkProducer, ChunkStore, MemoryBackend};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const MAX_CHUNK_BYTES: usize = 2 * 1024 * 1024;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A fresh directory under the system temp dir, unique per call.
pub fn temp_root(tag: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("parcel-it-{tag}-{}-{n}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// A running in-process server.
pub struct TestServer {
    pub url: String,
    pub store: ChunkStore,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(backend: Arc<dyn ChunkBackend>) -> Result<Self> {
        Self::start_on("127.0.0.1:0", backend).await
    }

    pub async fn memory() -> Result<Self> {
        Self::start(Arc::new(MemoryBackend::new())).await
    }

    pub async fn start_on(addr: &str, backend: Arc<dyn ChunkBackend>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let url = format!("http://{}", listener.local_addr()?);
        let store = ChunkStore::new(backend);
        let state = ApiState::new(store.clone(), MAX_CHUNK_BYTES);
        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(parcel_api::serve(state, listener, shutdown.subscribe()));
        Ok(Self {
            url,
            store,
            shutdown,
            task,
        })
    }

    pub fn transport(&self) -> HttpTransport {
        HttpTransport::new(&self.url)
    }

    pub fn producer(&self, chunk_size: u64, retry: RetryPolicy) -> ChunkProducer<HttpTransport> {
        ChunkProducer::new(self.transport(), chunk_size, retry)
    }

    /// Address the server is bound to, without the scheme.
    pub fn addr(&self) -> &str {
        self.url.trim_start_matches("http://")
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("server task panicked")?
    }
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// POST one chunk by hand. Returns the status and parsed JSON body.
pub async fn post_chunk(
    url: &str,
    file_identifier: &str,
    chunk_index: &str,
    total_chunks: &str,
    payload: Vec<u8>,
) -> Result<(reqwest::StatusCode, serde_json::Value)> {
    let form = reqwest::multipart::Form::new()
        .text("fileIdentifier", file_identifier.to_string())
        .text("chunkIndex", chunk_index.to_string())
        .text("totalChunks", total_chunks.to_string())
        .part("chunk", reqwest::multipart::Part::bytes(payload).file_name("blob"));
    let resp = reqwest::Client::new()
        .post(format!("{url}/api/upload-chunk"))
        .multipart(form)
        .send()
        .await
        .context("upload-chunk request failed")?;
    let status = resp.status();
    let body = resp.json().await.context("upload-chunk returned non-JSON")?;
    Ok((status, body))
}
