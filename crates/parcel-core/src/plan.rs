//! Chunk planning: how a file of a given size splits into fixed-size chunks.

use std::ops::Range;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// The split of one file into `total_chunks` contiguous byte ranges.
///
/// Every chunk except the last is exactly `chunk_size` bytes. An empty file
/// is planned as a single empty chunk so that every upload has at least one
/// chunk to carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("file of {file_size} bytes needs more than u32::MAX chunks of {chunk_size} bytes")]
    TooManyChunks { file_size: u64, chunk_size: u64 },
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, PlanError> {
        if chunk_size == 0 {
            return Err(PlanError::ZeroChunkSize);
        }
        let chunks = file_size.div_ceil(chunk_size).max(1);
        let total_chunks = u32::try_from(chunks).map_err(|_| PlanError::TooManyChunks {
            file_size,
            chunk_size,
        })?;
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, or `None` past the end.
    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(start..end)
    }
}
