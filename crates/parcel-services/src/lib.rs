//! parcel-services — the chunk store, its storage backends, the idle-session
//! janitor, and the client-side chunk producer.

pub mod backend;
pub mod error;
pub mod janitor;
pub mod producer;
pub mod store;
pub mod transport;

pub use backend::{ChunkBackend, FsBackend, MemoryBackend, SqliteBackend};
pub use error::StoreError;
pub use producer::{
    ChunkProducer, FileUpload, ProgressEvent, StartOutcome, UploadSource, UploadStatus,
    UploadSummary,
};
pub use store::{ChunkStore, ExpiryReport, DEFAULT_TOMBSTONE_TTL};
pub use transport::{ChunkSubmission, ChunkTransport, LocalTransport, TransportError};

use std::sync::Arc;

use parcel_core::config::{BackendKind, StorageConfig};

/// Build the backend named in the storage config.
pub fn open_backend(config: &StorageConfig) -> Result<Arc<dyn ChunkBackend>, StoreError> {
    let backend: Arc<dyn ChunkBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Filesystem => Arc::new(FsBackend::new(config.path.clone())?),
        BackendKind::Sqlite => {
            // A bare directory gets the database file placed inside it.
            let db = if config.path.extension().is_some() {
                config.path.clone()
            } else {
                config.path.join("parcel.db")
            };
            Arc::new(SqliteBackend::open(&db)?)
        }
    };
    tracing::info!(kind = backend.kind(), path = %config.path.display(), "storage backend ready");
    Ok(backend)
}
