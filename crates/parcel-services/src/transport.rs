//! How a producer hands one chunk to a store.

use std::future::Future;

use bytes::Bytes;
use parcel_core::{ChunkReceipt, FileIdentifier};

use crate::ChunkStore;

/// One chunk on its way to the store.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub file_id: FileIdentifier,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The store refused the chunk. Resending it unchanged cannot succeed.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The store could not be reached or failed internally. Retryable.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

pub trait ChunkTransport: Send + Sync {
    fn submit(
        &self,
        submission: ChunkSubmission,
    ) -> impl Future<Output = Result<ChunkReceipt, TransportError>> + Send;
}

/// Submits straight into a [`ChunkStore`] in the same process.
#[derive(Clone)]
pub struct LocalTransport {
    store: ChunkStore,
}

impl LocalTransport {
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }
}

impl ChunkTransport for LocalTransport {
    async fn submit(&self, submission: ChunkSubmission) -> Result<ChunkReceipt, TransportError> {
        self.store
            .store_chunk(
                &submission.file_id,
                submission.chunk_index,
                submission.total_chunks,
                submission.payload,
            )
            .await
            .map_err(|e| {
                if e.is_client_error() {
                    TransportError::Rejected(e.to_string())
                } else {
                    TransportError::Unavailable(e.to_string())
                }
            })
    }
}
