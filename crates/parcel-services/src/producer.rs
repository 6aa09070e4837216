//! Client-side upload driver.
//!
//! Files are uploaded one at a time in registration order, one chunk at a
//! time per file. Each file moves through
//! `Pending → Uploading → {Completed | Paused | Failed}`; paused and failed
//! files become eligible again on the next [`ChunkProducer::start_upload`].
//!
//! A pause request is only honoured between chunk transfers. An in-flight
//! chunk always runs to completion (including its retries).

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Mutex};

use parcel_core::plan::PlanError;
use parcel_core::{ArtifactInfo, ChunkPlan, ChunkReceipt, FileIdentifier, RetryPolicy};

use crate::transport::{ChunkSubmission, ChunkTransport, TransportError};

// ── Sources ───────────────────────────────────────────────────────────────────

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    File {
        id: FileIdentifier,
        path: PathBuf,
        len: u64,
    },
    Bytes {
        id: FileIdentifier,
        data: Bytes,
    },
}

impl UploadSource {
    /// A file on disk. Its size is fixed at registration time.
    pub async fn from_path(path: impl AsRef<Path>, id: FileIdentifier) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(UploadSource::File { id, path, len })
    }

    pub fn from_bytes(id: FileIdentifier, data: impl Into<Bytes>) -> Self {
        UploadSource::Bytes {
            id,
            data: data.into(),
        }
    }

    pub fn id(&self) -> &FileIdentifier {
        match self {
            UploadSource::File { id, .. } | UploadSource::Bytes { id, .. } => id,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            UploadSource::File { len, .. } => *len,
            UploadSource::Bytes { data, .. } => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        match self {
            UploadSource::Bytes { data, .. } => Ok(data.slice(range.start as usize..range.end as usize)),
            UploadSource::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// BLAKE3 digest of the whole source, hex-encoded.
    pub async fn digest(&self) -> std::io::Result<String> {
        match self {
            UploadSource::Bytes { data, .. } => Ok(parcel_core::digest(data)),
            UploadSource::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                let mut hasher = blake3::Hasher::new();
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Paused,
    Completed,
    Failed,
}

impl UploadStatus {
    fn is_eligible(self) -> bool {
        matches!(
            self,
            UploadStatus::Pending | UploadStatus::Paused | UploadStatus::Failed
        )
    }
}

/// Snapshot of one registered upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub id: FileIdentifier,
    pub status: UploadStatus,
    /// Next chunk index to send. Never decreases while the file is live.
    pub current_chunk: u32,
    /// Distinct chunks the store reported holding after the last ack.
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub file_size: u64,
    pub artifact: Option<ArtifactInfo>,
    pub error: Option<String>,
}

struct Entry {
    source: UploadSource,
    plan: ChunkPlan,
    state: FileUpload,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Status {
        file: FileIdentifier,
        status: UploadStatus,
    },
    ChunkAcknowledged {
        file: FileIdentifier,
        chunk_index: u32,
        uploaded_chunks: u32,
        total_chunks: u32,
    },
    Retrying {
        file: FileIdentifier,
        chunk_index: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Completed {
        file: FileIdentifier,
        artifact: ArtifactInfo,
    },
    Failed {
        file: FileIdentifier,
        error: String,
    },
}

/// What one driver run did.
#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    pub completed: Vec<FileIdentifier>,
    pub failed: Vec<(FileIdentifier, String)>,
    /// The run stopped early on a pause request.
    pub paused: bool,
}

#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// A run was already in progress; it will pause at the next chunk boundary.
    PauseRequested,
    Finished(UploadSummary),
}

enum FileOutcome {
    Completed,
    Paused,
    Failed(String),
}

// ── Driver ────────────────────────────────────────────────────────────────────

pub struct ChunkProducer<T> {
    transport: T,
    chunk_size: u64,
    retry: RetryPolicy,
    files: Mutex<Vec<Entry>>,
    running: AtomicBool,
    pause_requested: AtomicBool,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl<T: ChunkTransport> ChunkProducer<T> {
    pub fn new(transport: T, chunk_size: u64, retry: RetryPolicy) -> Self {
        Self {
            transport,
            chunk_size,
            retry,
            files: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            events: None,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Register `source`. Returns `false` if its identifier is already tracked.
    pub async fn add_file(&self, source: UploadSource) -> Result<bool, PlanError> {
        let plan = ChunkPlan::new(source.len(), self.chunk_size)?;
        let mut files = self.files.lock().await;
        if files.iter().any(|e| e.state.id == *source.id()) {
            return Ok(false);
        }
        tracing::debug!(
            file = %source.id(),
            bytes = plan.file_size(),
            total_chunks = plan.total_chunks(),
            "upload registered"
        );
        files.push(Entry {
            state: FileUpload {
                id: source.id().clone(),
                status: UploadStatus::Pending,
                current_chunk: 0,
                uploaded_chunks: 0,
                total_chunks: plan.total_chunks(),
                file_size: plan.file_size(),
                artifact: None,
                error: None,
            },
            source,
            plan,
        });
        Ok(true)
    }

    /// Ask a running driver to stop at the next chunk boundary.
    pub fn pause(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.pause_requested.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<FileUpload> {
        self.files.lock().await.iter().map(|e| e.state.clone()).collect()
    }

    /// Upload every eligible file, or request a pause if already running.
    pub async fn start_upload(&self) -> StartOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            self.pause_requested.store(true, Ordering::SeqCst);
            tracing::debug!("upload running, pause requested");
            return StartOutcome::PauseRequested;
        }
        self.pause_requested.store(false, Ordering::SeqCst);

        let mut summary = UploadSummary::default();
        let mut next = 0;
        loop {
            // Files registered while running are picked up in order.
            let Some(position) = self.next_eligible(next).await else {
                break;
            };
            next = position + 1;

            let (id, outcome) = self.upload_file(position).await;
            match outcome {
                FileOutcome::Completed => summary.completed.push(id),
                FileOutcome::Failed(error) => summary.failed.push((id, error)),
                FileOutcome::Paused => {
                    summary.paused = true;
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        StartOutcome::Finished(summary)
    }

    async fn next_eligible(&self, from: usize) -> Option<usize> {
        let files = self.files.lock().await;
        (from..files.len()).find(|&i| files[i].state.status.is_eligible())
    }

    async fn upload_file(&self, position: usize) -> (FileIdentifier, FileOutcome) {
        let (source, plan, mut current) = {
            let mut files = self.files.lock().await;
            let entry = &mut files[position];
            entry.state.error = None;
            (entry.source.clone(), entry.plan, entry.state.current_chunk)
        };
        let id = source.id().clone();
        let total = plan.total_chunks();
        self.set_status(position, UploadStatus::Uploading).await;
        tracing::info!(file = %id, from_chunk = current, total_chunks = total, "uploading");

        while current < total {
            if self.pause_requested.load(Ordering::SeqCst) {
                self.set_status(position, UploadStatus::Paused).await;
                tracing::info!(file = %id, current_chunk = current, "upload paused");
                return (id, FileOutcome::Paused);
            }

            let Some(range) = plan.range(current) else {
                break;
            };
            let payload = match source.read_range(range).await {
                Ok(payload) => payload,
                Err(e) => {
                    let error = format!("failed to read chunk {current}: {e}");
                    return (id, self.fail(position, error).await);
                }
            };

            let receipt = match self.submit_with_retry(&id, current, total, payload).await {
                Ok(receipt) => receipt,
                Err(e) => return (id, self.fail(position, e.to_string()).await),
            };

            current += 1;
            self.acknowledge(position, current, &receipt).await;

            if receipt.is_complete() {
                let outcome = self.finish(position, &source, receipt).await;
                return (id, outcome);
            }
        }

        // Every chunk was acknowledged but the store never reported the file
        // complete, e.g. its session expired mid-upload. Start over next time.
        self.files.lock().await[position].state.current_chunk = 0;
        let error = "all chunks sent but the store did not report completion".to_string();
        (id, self.fail(position, error).await)
    }

    async fn submit_with_retry(
        &self,
        id: &FileIdentifier,
        chunk_index: u32,
        total_chunks: u32,
        payload: Bytes,
    ) -> Result<ChunkReceipt, TransportError> {
        let submission = ChunkSubmission {
            file_id: id.clone(),
            chunk_index,
            total_chunks,
            payload,
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.transport.submit(submission.clone()).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => e,
            };
            if !err.is_retryable() || !self.retry.should_retry(attempt) {
                tracing::warn!(file = %id, chunk_index, attempt, error = %err, "chunk transfer failed");
                return Err(err);
            }

            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                file = %id,
                chunk_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "chunk transfer failed, retrying"
            );
            self.emit(ProgressEvent::Retrying {
                file: id.clone(),
                chunk_index,
                attempt,
                delay,
                error: err.to_string(),
            });
            tokio::time::sleep(delay).await;
        }
    }

    async fn acknowledge(&self, position: usize, current: u32, receipt: &ChunkReceipt) {
        let (file, uploaded_chunks) = {
            let mut files = self.files.lock().await;
            let state = &mut files[position].state;
            state.current_chunk = current;
            state.uploaded_chunks = receipt.uploaded_chunks.min(state.total_chunks);
            (state.id.clone(), state.uploaded_chunks)
        };
        self.emit(ProgressEvent::ChunkAcknowledged {
            file,
            chunk_index: current - 1,
            uploaded_chunks,
            total_chunks: receipt.total_chunks,
        });
    }

    async fn finish(&self, position: usize, source: &UploadSource, receipt: ChunkReceipt) -> FileOutcome {
        if let Some(remote) = &receipt.digest {
            let local = match source.digest().await {
                Ok(local) => local,
                Err(e) => return self.fail(position, format!("failed to hash source: {e}")).await,
            };
            if *remote != local {
                return self
                    .fail(position, format!("digest mismatch: sent {local}, stored {remote}"))
                    .await;
            }
        }

        let Some(artifact) = receipt.artifact else {
            return self
                .fail(position, "completion reported without an artifact".to_string())
                .await;
        };

        let file = {
            let mut files = self.files.lock().await;
            let state = &mut files[position].state;
            state.current_chunk = state.total_chunks;
            state.uploaded_chunks = state.total_chunks;
            state.artifact = Some(artifact.clone());
            state.id.clone()
        };
        tracing::info!(file = %file, bytes = artifact.size, path = %artifact.path, "upload complete");
        self.set_status(position, UploadStatus::Completed).await;
        self.emit(ProgressEvent::Completed { file, artifact });
        FileOutcome::Completed
    }

    async fn fail(&self, position: usize, error: String) -> FileOutcome {
        let file = {
            let mut files = self.files.lock().await;
            let state = &mut files[position].state;
            state.error = Some(error.clone());
            state.id.clone()
        };
        tracing::warn!(file = %file, error = %error, "upload failed");
        self.set_status(position, UploadStatus::Failed).await;
        self.emit(ProgressEvent::Failed {
            file,
            error: error.clone(),
        });
        FileOutcome::Failed(error)
    }

    async fn set_status(&self, position: usize, status: UploadStatus) {
        let file = {
            let mut files = self.files.lock().await;
            let state = &mut files[position].state;
            state.status = status;
            state.id.clone()
        };
        self.emit(ProgressEvent::Status { file, status });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone just means nobody is watching.
            let _ = tx.send(event);
        }
    }
}
