//! Animated Frame Cache
//!
//! Persists the decoded frames of an animation as one random-access file and
//! serves them back by index.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CacheEngine                             │
//! │   exists / needs_generation / get_frame / create_cache / recycle │
//! ├───────────────────────────────┬──────────────────────────────────┤
//! │ FrameEncoder (build)          │ Read path                        │
//! │  source ─▶ N slots ─▶ workers │  index ─▶ seek ─▶ ReadBufferPool │
//! │  sorted index ─▶ finalize     │  ─▶ codec.decode                 │
//! ├───────────────────────────────┴──────────────────────────────────┤
//! │ CacheRuntime: SharedEncodePool + CompressWorkers + ReadBufferPool │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ format: header │ payloads (write order) │ index (logical order)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Failure Handling
//!
//! - Corrupt files are deleted and reported as needing generation
//! - Reads degrade to [`FrameStatus::NoFrame`]; after repeated failures the
//!   engine stops reading
//! - Cancelled or failed builds never leave a finalized file

mod buffer_pool;
mod config;
mod encode_pool;
mod encoder;
mod engine;
mod key;
mod metrics;
mod runtime;
mod workers;
pub mod format;

#[cfg(test)]
mod proptest;

pub use buffer_pool::{BufferLease, ReadBufferPool};
pub use config::{
    CacheOptions, RuntimeConfig, COMPRESS_QUALITY_DEFAULT, COMPRESS_QUALITY_MAX,
    DEFAULT_MAX_READ_FAILURES, MAX_ENCODE_SLOTS,
};
pub use encode_pool::{EncodeLease, EncodeSlot, SharedEncodePool, SlotBuffers};
pub use encoder::{BuildOutcome, FrameEncoder};
pub use engine::{CacheEngine, FrameRead, FrameStatus, FRAME_RESULT_NO_FRAME, FRAME_RESULT_OK};
pub use format::{CacheHeader, FrameIndexEntry};
pub use key::{CacheKey, CACHE_FILE_EXTENSION};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use runtime::CacheRuntime;
pub use workers::{CompressWorkers, WORKER_THREAD_PREFIX};
