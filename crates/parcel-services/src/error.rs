//! Store errors.

use parcel_core::ProtocolViolation;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The submission broke the protocol. Nothing was mutated.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// Storage read/write failed. Safe to retry.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt session metadata for {file_id}: {reason}")]
    CorruptMetadata { file_id: String, reason: String },

    /// Combine found a hole despite the completion check passing.
    #[error("session {file_id} is missing chunk {index} at combine time")]
    Inconsistent { file_id: String, index: u32 },
}

impl StoreError {
    /// Caller's fault, as opposed to a storage-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::Protocol(_))
    }
}

pub(crate) trait IoContext<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T, StoreError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Io {
            context: f(),
            source,
        })
    }
}
