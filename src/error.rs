//! Error types for the animation frame cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, validating or reading a frame cache
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Cache File Errors
    // =========================================================================
    /// Cache file is structurally invalid (not finalized, truncated, empty)
    #[error("Corrupt cache file: {reason}")]
    CorruptCache { reason: String },

    /// Frame count in the index table is not positive
    #[error("Invalid frame count in index table: {0}")]
    InvalidFrameCount(i32),

    /// Negative offset or size read from the cache file
    #[error("Invalid offset or size in cache file: {0}")]
    InvalidOffset(i32),

    /// A write position no longer fits the 32-bit on-disk format
    #[error("Cache file offset {offset} exceeds the 32-bit format limit")]
    OffsetOverflow { offset: u64 },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Decoded frame does not match the target dimensions
    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Generation Errors
    // =========================================================================
    /// The animation source produced no frames
    #[error("Animation source produced no frames")]
    EmptySource,

    /// Compression workers are no longer accepting jobs
    #[error("Compression worker pool is closed")]
    WorkerPoolClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::CorruptCache`] with a formatted reason
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Error::CorruptCache {
            reason: reason.into(),
        }
    }
}
