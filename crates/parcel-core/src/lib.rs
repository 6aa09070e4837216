//! parcel-core — shared protocol types, chunk planning, and configuration.
//! All other Parcel crates depend on this one.

pub mod config;
pub mod error;
pub mod identifier;
pub mod plan;
pub mod protocol;
pub mod retry;

pub use error::ProtocolViolation;
pub use identifier::FileIdentifier;
pub use plan::ChunkPlan;
pub use protocol::{ArtifactInfo, ChunkReceipt, ChunkResponse, ChunkStatus, SessionProgress};
pub use retry::RetryPolicy;

/// BLAKE3 digest of `data`, hex-encoded.
pub fn digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
