//! Protocol types: what a chunk submission returns and what the listing
//! endpoints expose. Transport-agnostic; the HTTP binding serializes these
//! as camelCase JSON.

use serde::{Deserialize, Serialize};

// ── Multipart field names ─────────────────────────────────────────────────────

pub const FIELD_CHUNK: &str = "chunk";
pub const FIELD_FILE_IDENTIFIER: &str = "fileIdentifier";
/// Older clients send the identifier as `filename`.
pub const FIELD_FILENAME_ALIAS: &str = "filename";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";

// ── Store results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkStatus {
    /// Chunk persisted, session still waiting for more.
    ChunkStored,
    /// This submission completed the session (or hit an already-completed one).
    FileComplete,
}

/// A completed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub path: String,
}

/// Outcome of one `store_chunk` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub status: ChunkStatus,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    /// Present only when `status == FileComplete`.
    pub artifact: Option<ArtifactInfo>,
    /// BLAKE3 of the artifact, present alongside `artifact`.
    pub digest: Option<String>,
}

impl ChunkReceipt {
    pub fn is_complete(&self) -> bool {
        self.status == ChunkStatus::FileComplete
    }
}

/// Progress of an open (not yet combined) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub name: String,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub idle_secs: u64,
}

// ── Wire response ─────────────────────────────────────────────────────────────

pub const MSG_CHUNK_STORED: &str = "Chunk uploaded successfully";
pub const MSG_FILE_COMPLETE: &str = "File upload complete";

/// JSON body answering a chunk submission, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ChunkResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            uploaded_chunks: None,
            total_chunks: None,
            file_path: None,
            size: None,
            digest: None,
        }
    }

    /// Rebuild the receipt on the client side. `None` for error bodies.
    pub fn to_receipt(&self, name: &str) -> Option<ChunkReceipt> {
        if !self.success {
            return None;
        }
        let total_chunks = self.total_chunks.unwrap_or(0);
        let artifact = self.file_path.as_ref().map(|path| ArtifactInfo {
            name: name.to_string(),
            size: self.size.unwrap_or(0),
            path: path.clone(),
        });
        let status = if artifact.is_some() {
            ChunkStatus::FileComplete
        } else {
            ChunkStatus::ChunkStored
        };
        Some(ChunkReceipt {
            status,
            uploaded_chunks: self.uploaded_chunks.unwrap_or(total_chunks),
            total_chunks,
            artifact,
            digest: self.digest.clone(),
        })
    }
}

impl From<&ChunkReceipt> for ChunkResponse {
    fn from(r: &ChunkReceipt) -> Self {
        let message = match r.status {
            ChunkStatus::ChunkStored => MSG_CHUNK_STORED,
            ChunkStatus::FileComplete => MSG_FILE_COMPLETE,
        };
        Self {
            success: true,
            message: message.to_string(),
            uploaded_chunks: Some(r.uploaded_chunks),
            total_chunks: Some(r.total_chunks),
            file_path: r.artifact.as_ref().map(|a| a.path.clone()),
            size: r.artifact.as_ref().map(|a| a.size),
            digest: r.digest.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_response_omits_file_path() {
        let receipt = ChunkReceipt {
            status: ChunkStatus::ChunkStored,
            uploaded_chunks: 2,
            total_chunks: 3,
            artifact: None,
            digest: None,
        };
        let json = serde_json::to_value(ChunkResponse::from(&receipt)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["uploadedChunks"], 2);
        assert_eq!(json["totalChunks"], 3);
        assert!(json.get("filePath").is_none());
    }

    #[test]
    fn complete_response_carries_artifact() {
        let receipt = ChunkReceipt {
            status: ChunkStatus::FileComplete,
            uploaded_chunks: 3,
            total_chunks: 3,
            artifact: Some(ArtifactInfo {
                name: "a.bin".into(),
                size: 42,
                path: "/uploads/a.bin".into(),
            }),
            digest: Some("ab".into()),
        };
        let resp = ChunkResponse::from(&receipt);
        assert_eq!(resp.message, MSG_FILE_COMPLETE);
        assert_eq!(resp.file_path.as_deref(), Some("/uploads/a.bin"));

        let back = resp.to_receipt("a.bin").unwrap();
        assert_eq!(back, receipt);
    }

    #[test]
    fn error_body_has_no_receipt() {
        let resp = ChunkResponse::error("nope");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"success":false,"message":"nope"}"#);
        assert!(resp.to_receipt("x").is_none());
    }
}
