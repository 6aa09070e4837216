//! Persistence for chunk sessions and completed artifacts.
//!
//! A backend is dumb storage: it never decides completion or validates
//! indices. [`ChunkStore`](crate::ChunkStore) does that and serializes all
//! calls that touch one session, so implementations only need to be safe
//! across *different* sessions.

mod fs;
mod memory;
mod sqlite;

use std::time::SystemTime;

use bytes::Bytes;
use parcel_core::{ArtifactInfo, FileIdentifier};

use crate::StoreError;

pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// An in-progress session as the backend sees it.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub id: FileIdentifier,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    /// Last time a chunk or the session container was written.
    pub modified: SystemTime,
}

pub trait ChunkBackend: Send + Sync + 'static {
    /// Short name for logs.
    fn kind(&self) -> &'static str;

    // ── Session containers ───────────────────────────────────────────────────

    /// `total_chunks` of an existing session container, `None` if absent.
    fn load_session(&self, id: &FileIdentifier) -> Result<Option<u32>, StoreError>;

    fn create_session(&self, id: &FileIdentifier, total_chunks: u32) -> Result<(), StoreError>;

    /// Store one chunk, replacing any previous payload at `index`.
    fn put_chunk(&self, id: &FileIdentifier, index: u32, payload: &[u8]) -> Result<(), StoreError>;

    /// Number of distinct chunk indices held for `id`.
    fn chunk_count(&self, id: &FileIdentifier) -> Result<u32, StoreError>;

    fn read_chunk(&self, id: &FileIdentifier, index: u32) -> Result<Option<Bytes>, StoreError>;

    /// Remove the session container and all its chunks. Absent is not an error.
    fn discard_session(&self, id: &FileIdentifier) -> Result<(), StoreError>;

    fn list_sessions(&self) -> Result<Vec<StoredSession>, StoreError>;

    // ── Artifacts ────────────────────────────────────────────────────────────

    /// Write `parts` in order as the artifact for `id`, then purge the
    /// session container. The artifact must never be observable partially
    /// written.
    fn commit_artifact(&self, id: &FileIdentifier, parts: &[Bytes]) -> Result<ArtifactInfo, StoreError>;

    fn find_artifact(&self, id: &FileIdentifier) -> Result<Option<ArtifactInfo>, StoreError>;

    fn read_artifact(&self, id: &FileIdentifier) -> Result<Option<Bytes>, StoreError>;

    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>, StoreError>;
}

pub(crate) fn artifact_info(id: &FileIdentifier, size: u64) -> ArtifactInfo {
    ArtifactInfo {
        name: id.to_string(),
        size,
        path: id.artifact_path(),
    }
}

// ── Shared behaviour tests ────────────────────────────────────────────────────
