//! HTTP handlers: the chunk protocol and artifact listing as JSON.

pub mod files;
pub mod sessions;
pub mod upload;

use axum::http::StatusCode;
use axum::Json;

use parcel_core::ChunkResponse;
use parcel_services::{ChunkStore, StoreError};

#[derive(Clone)]
pub struct ApiState {
    pub store: ChunkStore,
    /// Largest accepted `chunk` field, in bytes.
    pub max_chunk_bytes: usize,
}

impl ApiState {
    pub fn new(store: ChunkStore, max_chunk_bytes: usize) -> Self {
        Self {
            store,
            max_chunk_bytes,
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Error half of the upload endpoint: a status plus `{success: false, message}`.
pub type UploadError = (StatusCode, Json<ChunkResponse>);

fn bad_request(message: impl Into<String>) -> UploadError {
    (StatusCode::BAD_REQUEST, Json(ChunkResponse::error(message)))
}

/// Protocol violations are the caller's fault; everything else is ours.
fn store_error(e: StoreError) -> UploadError {
    if e.is_client_error() {
        tracing::debug!(error = %e, "chunk rejected");
        bad_request(e.to_string())
    } else {
        tracing::error!(error = %e, "chunk store failure");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ChunkResponse::error(e.to_string())),
        )
    }
}

fn internal(e: StoreError) -> (StatusCode, String) {
    tracing::error!(error = %e, "store read failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use files::{handle_download, handle_files};
pub use sessions::handle_sessions;
pub use upload::handle_upload_chunk;
