//! In-memory backend. Nothing survives the process.

use std::collections::BTreeMap;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parcel_core::{ArtifactInfo, FileIdentifier};

use super::{artifact_info, ChunkBackend, StoredSession};
use crate::StoreError;

struct MemSession {
    total_chunks: u32,
    chunks: BTreeMap<u32, Bytes>,
    modified: SystemTime,
}

#[derive(Default)]
pub struct MemoryBackend {
    sessions: DashMap<FileIdentifier, MemSession>,
    artifacts: DashMap<FileIdentifier, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn load_session(&self, id: &FileIdentifier) -> Result<Option<u32>, StoreError> {
        Ok(self.sessions.get(id).map(|s| s.total_chunks))
    }

    fn create_session(&self, id: &FileIdentifier, total_chunks: u32) -> Result<(), StoreError> {
        self.sessions.insert(
            id.clone(),
            MemSession {
                total_chunks,
                chunks: BTreeMap::new(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn put_chunk(&self, id: &FileIdentifier, index: u32, payload: &[u8]) -> Result<(), StoreError> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| StoreError::CorruptMetadata {
            file_id: id.to_string(),
            reason: "chunk written before session was created".into(),
        })?;
        session.chunks.insert(index, Bytes::copy_from_slice(payload));
        session.modified = SystemTime::now();
        Ok(())
    }

    fn chunk_count(&self, id: &FileIdentifier) -> Result<u32, StoreError> {
        Ok(self
            .sessions
            .get(id)
            .map(|s| s.chunks.len() as u32)
            .unwrap_or(0))
    }

    fn read_chunk(&self, id: &FileIdentifier, index: u32) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .sessions
            .get(id)
            .and_then(|s| s.chunks.get(&index).cloned()))
    }

    fn discard_session(&self, id: &FileIdentifier) -> Result<(), StoreError> {
        self.sessions.remove(id);
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<StoredSession>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .map(|e| StoredSession {
                id: e.key().clone(),
                total_chunks: e.total_chunks,
                uploaded_chunks: e.chunks.len() as u32,
                modified: e.modified,
            })
            .collect())
    }

    fn commit_artifact(&self, id: &FileIdentifier, parts: &[Bytes]) -> Result<ArtifactInfo, StoreError> {
        let len = parts.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(len);
        for part in parts {
            data.extend_from_slice(part);
        }
        self.artifacts.insert(id.clone(), data.freeze());
        self.sessions.remove(id);
        Ok(artifact_info(id, len as u64))
    }

    fn find_artifact(&self, id: &FileIdentifier) -> Result<Option<ArtifactInfo>, StoreError> {
        Ok(self
            .artifacts
            .get(id)
            .map(|data| artifact_info(id, data.len() as u64)))
    }

    fn read_artifact(&self, id: &FileIdentifier) -> Result<Option<Bytes>, StoreError> {
        Ok(self.artifacts.get(id).map(|data| data.clone()))
    }

    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        Ok(self
            .artifacts
            .iter()
            .map(|e| artifact_info(e.key(), e.value().len() as u64))
            .collect())
    }
}
