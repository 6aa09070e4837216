//! Chunk store: the reassembly engine.
//!
//! Sessions are keyed by file identifier. Each session has its own async
//! mutex; the store-then-check-then-combine sequence for one identifier runs
//! under that mutex, so at most one caller ever combines a session. Sessions
//! for different identifiers never contend.
//!
//! Once combined, a session stays in the table as a tombstone that remembers
//! the completing submission. A byte-identical resend of that final chunk
//! gets the existing artifact back; any other submission drops the tombstone
//! and opens a fresh session, so re-uploading a name replaces its artifact.
//! Tombstones live at most [`DEFAULT_TOMBSTONE_TTL`] (or the configured
//! value) even when session expiry is disabled.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use parcel_core::{
    ArtifactInfo, ChunkReceipt, ChunkStatus, FileIdentifier, ProtocolViolation, SessionProgress,
};

use crate::backend::ChunkBackend;
use crate::StoreError;

enum SlotState {
    /// Not yet looked up in the backend.
    Unresolved,
    Open {
        total_chunks: u32,
    },
    Combined {
        total_chunks: u32,
        final_index: u32,
        final_payload: blake3::Hash,
        artifact: ArtifactInfo,
        digest: String,
    },
}

/// How long a combined session answers resends of its final chunk.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(600);

struct SessionSlot {
    state: SlotState,
    last_activity: Instant,
    /// Set by the janitor before it unlinks the slot. A submitter that
    /// finds this flag after locking must look the session up again.
    evicted: bool,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: SlotState::Unresolved,
            last_activity: Instant::now(),
            evicted: false,
        }
    }
}

type SlotRef = Arc<Mutex<SessionSlot>>;

/// What one janitor pass removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpiryReport {
    /// In-progress sessions whose chunks were discarded.
    pub discarded: Vec<String>,
    /// Combined-session tombstones dropped from memory.
    pub tombstones: usize,
}

impl ExpiryReport {
    pub fn is_empty(&self) -> bool {
        self.discarded.is_empty() && self.tombstones == 0
    }
}

#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkBackend>,
    sessions: Arc<DashMap<FileIdentifier, SlotRef>>,
    tombstone_ttl: Duration,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn ChunkBackend>) -> Self {
        Self {
            backend,
            sessions: Arc::new(DashMap::new()),
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
        }
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Store one chunk and combine the session if it is now complete.
    ///
    /// Protocol violations are rejected before anything is written.
    pub async fn store_chunk(
        &self,
        id: &FileIdentifier,
        chunk_index: u32,
        total_chunks: u32,
        payload: Bytes,
    ) -> Result<ChunkReceipt, StoreError> {
        if total_chunks == 0 {
            return Err(ProtocolViolation::ZeroTotal.into());
        }
        if chunk_index >= total_chunks {
            return Err(ProtocolViolation::IndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            }
            .into());
        }

        loop {
            let slot = self.slot(id);
            let mut guard = slot.lock().await;
            if guard.evicted {
                continue;
            }
            return self.store_locked(&mut guard, id, chunk_index, total_chunks, &payload);
        }
    }

    fn slot(&self, id: &FileIdentifier) -> SlotRef {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::new())))
            .value()
            .clone()
    }

    fn store_locked(
        &self,
        slot: &mut SessionSlot,
        id: &FileIdentifier,
        chunk_index: u32,
        total_chunks: u32,
        payload: &[u8],
    ) -> Result<ChunkReceipt, StoreError> {
        let expected = match &slot.state {
            SlotState::Combined {
                total_chunks: expected,
                final_index,
                final_payload,
                artifact,
                digest,
            } => {
                if *expected == total_chunks
                    && *final_index == chunk_index
                    && *final_payload == blake3::hash(payload)
                {
                    tracing::debug!(file = %id, chunk_index, "resend of final chunk for combined session");
                    return Ok(ChunkReceipt {
                        status: ChunkStatus::FileComplete,
                        uploaded_chunks: *expected,
                        total_chunks: *expected,
                        artifact: Some(artifact.clone()),
                        digest: Some(digest.clone()),
                    });
                }
                tracing::debug!(file = %id, chunk_index, total_chunks, "new upload replaces combined session");
                None
            }
            SlotState::Open { total_chunks } => Some(*total_chunks),
            SlotState::Unresolved => self.backend.load_session(id)?,
        };

        match expected {
            Some(expected) if expected != total_chunks => {
                slot.state = SlotState::Open {
                    total_chunks: expected,
                };
                return Err(ProtocolViolation::TotalMismatch {
                    expected,
                    got: total_chunks,
                }
                .into());
            }
            Some(_) => {}
            None => {
                self.backend.create_session(id, total_chunks)?;
                tracing::debug!(file = %id, total_chunks, "session opened");
            }
        }
        slot.state = SlotState::Open { total_chunks };

        self.backend.put_chunk(id, chunk_index, payload)?;
        slot.last_activity = Instant::now();

        let uploaded_chunks = self.backend.chunk_count(id)?;
        tracing::debug!(
            file = %id,
            chunk_index,
            uploaded_chunks,
            total_chunks,
            bytes = payload.len(),
            "chunk stored"
        );

        if uploaded_chunks < total_chunks {
            return Ok(ChunkReceipt {
                status: ChunkStatus::ChunkStored,
                uploaded_chunks,
                total_chunks,
                artifact: None,
                digest: None,
            });
        }

        let (artifact, digest) = self.combine(id, total_chunks)?;
        slot.state = SlotState::Combined {
            total_chunks,
            final_index: chunk_index,
            final_payload: blake3::hash(payload),
            artifact: artifact.clone(),
            digest: digest.clone(),
        };
        Ok(ChunkReceipt {
            status: ChunkStatus::FileComplete,
            uploaded_chunks: total_chunks,
            total_chunks,
            artifact: Some(artifact),
            digest: Some(digest),
        })
    }

    /// Read chunks 0..total in order and commit them as the artifact.
    ///
    /// A missing chunk aborts before anything is written.
    fn combine(&self, id: &FileIdentifier, total_chunks: u32) -> Result<(ArtifactInfo, String), StoreError> {
        let mut parts = Vec::with_capacity(total_chunks as usize);
        let mut hasher = blake3::Hasher::new();
        for index in 0..total_chunks {
            let Some(part) = self.backend.read_chunk(id, index)? else {
                tracing::error!(file = %id, index, total_chunks, "chunk missing at combine time");
                return Err(StoreError::Inconsistent {
                    file_id: id.to_string(),
                    index,
                });
            };
            hasher.update(&part);
            parts.push(part);
        }

        let artifact = self.backend.commit_artifact(id, &parts)?;
        let digest = hasher.finalize().to_hex().to_string();
        tracing::info!(
            file = %id,
            bytes = artifact.size,
            chunks = total_chunks,
            path = %artifact.path,
            digest = %digest,
            "file reassembled"
        );
        Ok((artifact, digest))
    }

    /// Completed artifacts, sorted by name.
    pub async fn list_files(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        let mut files = self.backend.list_artifacts()?;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub async fn read_artifact(&self, id: &FileIdentifier) -> Result<Option<Bytes>, StoreError> {
        self.backend.read_artifact(id)
    }

    pub async fn find_artifact(&self, id: &FileIdentifier) -> Result<Option<ArtifactInfo>, StoreError> {
        self.backend.find_artifact(id)
    }

    /// Sessions still waiting for chunks, sorted by name.
    pub async fn open_sessions(&self) -> Result<Vec<SessionProgress>, StoreError> {
        let now = SystemTime::now();
        let mut sessions: Vec<SessionProgress> = self
            .backend
            .list_sessions()?
            .into_iter()
            .map(|s| SessionProgress {
                name: s.id.to_string(),
                uploaded_chunks: s.uploaded_chunks,
                total_chunks: s.total_chunks,
                idle_secs: now.duration_since(s.modified).unwrap_or_default().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }

    /// Progress of one open session, `None` if nothing is in flight for `id`.
    pub async fn session_progress(&self, id: &FileIdentifier) -> Result<Option<SessionProgress>, StoreError> {
        Ok(self
            .open_sessions()
            .await?
            .into_iter()
            .find(|s| s.name == id.as_str()))
    }

    #[cfg(test)]
    pub(crate) fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions idle for longer than `ttl`.
    ///
    /// Open sessions lose their chunks; combined tombstones are forgotten
    /// after `ttl` or the tombstone TTL, whichever is shorter. Sessions left
    /// in the backend by an earlier process are swept too. A zero `ttl`
    /// keeps every open session but still drops old tombstones. A session
    /// currently being written to is skipped, and one that cannot be
    /// discarded is logged and left for the next pass.
    pub async fn expire_idle(&self, ttl: Duration) -> Result<ExpiryReport, StoreError> {
        let mut report = ExpiryReport::default();
        let tombstone_ttl = if ttl.is_zero() {
            self.tombstone_ttl
        } else {
            ttl.min(self.tombstone_ttl)
        };

        let snapshot: Vec<(FileIdentifier, SlotRef)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (id, slot) in snapshot {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let limit = match guard.state {
                SlotState::Open { .. } if ttl.is_zero() => continue,
                SlotState::Open { .. } => ttl,
                _ => tombstone_ttl,
            };
            if guard.evicted || guard.last_activity.elapsed() <= limit {
                continue;
            }
            match guard.state {
                SlotState::Open { .. } => {
                    if let Err(e) = self.backend.discard_session(&id) {
                        tracing::warn!(file = %id, error = %e, "failed to discard idle session");
                        continue;
                    }
                    tracing::info!(file = %id, "expired idle upload session");
                    report.discarded.push(id.to_string());
                }
                SlotState::Combined { .. } => report.tombstones += 1,
                SlotState::Unresolved => {}
            }
            guard.evicted = true;
            self.sessions.remove_if(&id, |_, v| Arc::ptr_eq(v, &slot));
        }

        if ttl.is_zero() {
            return Ok(report);
        }

        // Orphans: containers in the backend nobody in this process touched.
        let now = SystemTime::now();
        for stored in self.backend.list_sessions()? {
            let idle = now.duration_since(stored.modified).unwrap_or_default();
            if idle <= ttl || self.sessions.contains_key(&stored.id) {
                continue;
            }
            let slot = self.slot(&stored.id);
            let mut guard = slot.lock().await;
            if guard.evicted || !matches!(guard.state, SlotState::Unresolved) {
                continue;
            }
            if let Err(e) = self.backend.discard_session(&stored.id) {
                tracing::warn!(file = %stored.id, error = %e, "failed to discard orphaned session");
                guard.evicted = true;
                self.sessions.remove_if(&stored.id, |_, v| Arc::ptr_eq(v, &slot));
                continue;
            }
            tracing::info!(file = %stored.id, idle_secs = idle.as_secs(), "expired orphaned upload session");
            report.discarded.push(stored.id.to_string());
            guard.evicted = true;
            self.sessions.remove_if(&stored.id, |_, v| Arc::ptr_eq(v, &slot));
        }

        Ok(report)
    }
}
