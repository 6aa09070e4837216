//! Client protocol violations.
//!
//! Anything in here is the caller's fault: the submission is rejected
//! before any stored state is touched.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("total chunks mismatch: session has {expected}, submission says {got}")]
    TotalMismatch { expected: u32, got: u32 },

    #[error("total chunks must be at least 1")]
    ZeroTotal,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid file identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("chunk of {len} bytes exceeds {max} byte limit")]
    ChunkTooLarge { len: usize, max: usize },
}
