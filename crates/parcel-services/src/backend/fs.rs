//! Filesystem backend.
//!
//! Layout under the root:
//!   .chunks/{key}/meta.json   session metadata
//!   .chunks/{key}/{index}     raw chunk payloads
//!   files/{key}/meta.json     artifact name
//!   files/{key}/data          completed artifact bytes
//!   .tmp/                     staging for atomic writes
//!
//! `key` is the hex of the first 16 bytes of `blake3(id)`. Keying artifacts
//! the same way as sessions lets `docs` and `docs/readme.txt` coexist.
//!
//! Every write goes to `.tmp` first and is renamed into place, so readers
//! never see a half-written chunk or artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use memmap2::Mmap;
use parcel_core::{ArtifactInfo, FileIdentifier};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{artifact_info, ChunkBackend, StoredSession};
use crate::error::IoContext;
use crate::StoreError;

const CHUNKS_DIR: &str = ".chunks";
const FILES_DIR: &str = "files";
const TMP_DIR: &str = ".tmp";
const META_FILE: &str = "meta.json";
const DATA_FILE: &str = "data";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMeta {
    identifier: FileIdentifier,
    total_chunks: u32,
}

#[derive(Serialize, Deserialize)]
struct ArtifactMeta {
    identifier: FileIdentifier,
}

pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (or create) a backend rooted at `root`.
    ///
    /// Leftover staging files from a previous process are removed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [CHUNKS_DIR, FILES_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .io_context(|| format!("failed to create {}", path.display()))?;
        }
        let tmp = root.join(TMP_DIR);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).io_context(|| format!("failed to create {}", tmp.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(id: &FileIdentifier) -> String {
        let hash = blake3::hash(id.as_str().as_bytes());
        hex::encode(&hash.as_bytes()[..16])
    }

    fn container(&self, id: &FileIdentifier) -> PathBuf {
        self.root.join(CHUNKS_DIR).join(Self::key(id))
    }

    fn chunk_path(&self, id: &FileIdentifier, index: u32) -> PathBuf {
        self.container(id).join(index.to_string())
    }

    fn artifact_dir(&self, id: &FileIdentifier) -> PathBuf {
        self.root.join(FILES_DIR).join(Self::key(id))
    }

    fn artifact_path(&self, id: &FileIdentifier) -> PathBuf {
        self.artifact_dir(id).join(DATA_FILE)
    }

    /// Write `parts` to a staging file, sync, and rename onto `dest`.
    fn write_atomic(&self, dest: &Path, parts: &[&[u8]]) -> Result<(), StoreError> {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .root
            .join(TMP_DIR)
            .join(format!("{}-{}", std::process::id(), n));

        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            for part in parts {
                file.write_all(part)?;
            }
            file.sync_all()?;
            fs::rename(&tmp_path, dest)
        })();

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written.io_context(|| format!("failed to write {}", dest.display()))
    }

    fn read_meta<T: DeserializeOwned>(&self, dir: &Path) -> Result<Option<T>, StoreError> {
        let path = dir.join(META_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).io_context(|| format!("failed to read {}", path.display())),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::CorruptMetadata {
                file_id: dir.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn count_chunks(dir: &Path) -> Result<u32, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).io_context(|| format!("failed to list {}", dir.display())),
        };
        Ok(entries
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.parse::<u32>().is_ok())
            })
            .count() as u32)
    }

    fn encode_meta<T: Serialize>(id: &FileIdentifier, meta: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(meta).map_err(|e| StoreError::CorruptMetadata {
            file_id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

impl ChunkBackend for FsBackend {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    fn load_session(&self, id: &FileIdentifier) -> Result<Option<u32>, StoreError> {
        let meta: Option<SessionMeta> = self.read_meta(&self.container(id))?;
        Ok(meta.map(|m| m.total_chunks))
    }

    fn create_session(&self, id: &FileIdentifier, total_chunks: u32) -> Result<(), StoreError> {
        let dir = self.container(id);
        fs::create_dir_all(&dir).io_context(|| format!("failed to create {}", dir.display()))?;
        let meta = Self::encode_meta(
            id,
            &SessionMeta {
                identifier: id.clone(),
                total_chunks,
            },
        )?;
        self.write_atomic(&dir.join(META_FILE), &[&meta])
    }

    fn put_chunk(&self, id: &FileIdentifier, index: u32, payload: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(&self.chunk_path(id, index), &[payload])?;
        tracing::trace!(file = %id, index, bytes = payload.len(), "chunk written");
        Ok(())
    }

    fn chunk_count(&self, id: &FileIdentifier) -> Result<u32, StoreError> {
        Self::count_chunks(&self.container(id))
    }

    fn read_chunk(&self, id: &FileIdentifier, index: u32) -> Result<Option<Bytes>, StoreError> {
        let path = self.chunk_path(id, index);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).io_context(|| format!("failed to open {}", path.display())),
        };
        let len = file
            .metadata()
            .io_context(|| format!("failed to stat {}", path.display()))?
            .len();
        // Zero-length files cannot be mapped.
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }

        // Safety: chunk files are only ever replaced by rename, never
        // modified in place, so the mapping stays valid while we copy.
        let mmap = unsafe { Mmap::map(&file) }
            .io_context(|| format!("failed to mmap {}", path.display()))?;
        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    fn discard_session(&self, id: &FileIdentifier) -> Result<(), StoreError> {
        let dir = self.container(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).io_context(|| format!("failed to remove {}", dir.display())),
        }
    }

    fn list_sessions(&self) -> Result<Vec<StoredSession>, StoreError> {
        let root = self.root.join(CHUNKS_DIR);
        let entries = fs::read_dir(&root).io_context(|| format!("failed to list {}", root.display()))?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            let meta: SessionMeta = match self.read_meta(&dir) {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable session");
                    continue;
                }
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or_else(|_| SystemTime::now());
            sessions.push(StoredSession {
                id: meta.identifier,
                total_chunks: meta.total_chunks,
                uploaded_chunks: Self::count_chunks(&dir)?,
                modified,
            });
        }
        Ok(sessions)
    }

    fn commit_artifact(&self, id: &FileIdentifier, parts: &[Bytes]) -> Result<ArtifactInfo, StoreError> {
        let dir = self.artifact_dir(id);
        fs::create_dir_all(&dir).io_context(|| format!("failed to create {}", dir.display()))?;
        let slices: Vec<&[u8]> = parts.iter().map(|p| p.as_ref()).collect();
        self.write_atomic(&dir.join(DATA_FILE), &slices)?;
        let meta = Self::encode_meta(id, &ArtifactMeta { identifier: id.clone() })?;
        self.write_atomic(&dir.join(META_FILE), &[&meta])?;
        self.discard_session(id)?;

        let size = parts.iter().map(|p| p.len() as u64).sum();
        Ok(artifact_info(id, size))
    }

    fn find_artifact(&self, id: &FileIdentifier) -> Result<Option<ArtifactInfo>, StoreError> {
        let path = self.artifact_path(id);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(artifact_info(id, meta.len()))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).io_context(|| format!("failed to stat {}", path.display())),
        }
    }

    fn read_artifact(&self, id: &FileIdentifier) -> Result<Option<Bytes>, StoreError> {
        if self.find_artifact(id)?.is_none() {
            return Ok(None);
        }
        let path = self.artifact_path(id);
        fs::read(&path)
            .map(|data| Some(Bytes::from(data)))
            .io_context(|| format!("failed to read {}", path.display()))
    }

    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        let root = self.root.join(FILES_DIR);
        let entries = fs::read_dir(&root).io_context(|| format!("failed to list {}", root.display()))?;

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            let meta: ArtifactMeta = match self.read_meta(&dir) {
                Ok(Some(meta)) => meta,
                // Data renamed in, name not yet written.
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable artifact");
                    continue;
                }
            };
            let Ok(data) = fs::metadata(dir.join(DATA_FILE)) else { continue };
            out.push(artifact_info(&meta.identifier, data.len()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::conformance;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_root() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("parcel-fs-test-{}-{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn conforms() {
        let root = temp_root();
        conformance::all(&FsBackend::new(&root).unwrap());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn new_creates_layout() {
        let root = temp_root();
        assert!(!root.exists());
        let _backend = FsBackend::new(&root).unwrap();
        assert!(root.join(CHUNKS_DIR).is_dir());
        assert!(root.join(FILES_DIR).is_dir());
        assert!(root.join(TMP_DIR).is_dir());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn sessions_survive_reopen() {
        let root = temp_root();
        let id = FileIdentifier::parse("keep/me.bin").unwrap();
        {
            let backend = FsBackend::new(&root).unwrap();
            backend.create_session(&id, 2).unwrap();
            backend.put_chunk(&id, 1, b"tail").unwrap();
        }
        let backend = FsBackend::new(&root).unwrap();
        assert_eq!(backend.load_session(&id).unwrap(), Some(2));
        assert_eq!(backend.chunk_count(&id).unwrap(), 1);
        let sessions = backend.list_sessions().unwrap();
        assert_eq!(sessions[0].id, id);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn artifacts_land_under_files_dir() {
        let root = temp_root();
        let backend = FsBackend::new(&root).unwrap();
        let id = FileIdentifier::parse("a/b/c.txt").unwrap();
        backend.create_session(&id, 1).unwrap();
        backend
            .commit_artifact(&id, &[Bytes::from_static(b"abc")])
            .unwrap();

        let dir = root.join(FILES_DIR).join(FsBackend::key(&id));
        assert_eq!(fs::read(dir.join(DATA_FILE)).unwrap(), b"abc");
        let meta: ArtifactMeta = serde_json::from_slice(&fs::read(dir.join(META_FILE)).unwrap()).unwrap();
        assert_eq!(meta.identifier, id);
        assert_eq!(fs::read_dir(root.join(TMP_DIR)).unwrap().count(), 0);
        assert_eq!(fs::read_dir(root.join(CHUNKS_DIR)).unwrap().count(), 0);
        let _ = fs::remove_dir_all(&root);
    }
}
