//! animcache - Random-Access Frame Cache for Animations
//!
//! Decodes an animation once, stores every frame in a single indexed file and
//! serves frames back by index without decoding the animation again.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ──▶ FrameEncoder (N parallel slots) ──▶ cache file
//!                                                        │
//! caller ◀── FrameCodec::decode ◀── CacheEngine::get_frame
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Cache file format, build pipeline, shared pools and the engine
//! - [`codec`] - Frame buffers and the codecs that compress them
//! - [`error`] - Error types
//! - [`source`] - Animation sources that feed a build
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use animcache::cache::{CacheEngine, CacheKey, CacheOptions};
//! use animcache::codec::{FrameBuffer, Lz4FrameCodec};
//! use animcache::source::SyntheticSource;
//!
//! let key = CacheKey::new("sticker.tgs", 128, 128, false);
//! let engine = CacheEngine::new("/tmp/acache", key, CacheOptions::configured(), Arc::new(Lz4FrameCodec::new()));
//! if engine.needs_generation() {
//!     engine.create_cache(&mut SyntheticSource::finite(60));
//! }
//! let mut frame = FrameBuffer::new(128, 128);
//! let read = engine.get_next_frame(&mut frame);
//! assert!(read.status.is_ready());
//! ```

pub mod cache;
pub mod codec;
pub mod error;
pub mod source;

// Re-export commonly used types
pub use cache::{BuildOutcome, CacheEngine, CacheKey, CacheOptions, CacheRuntime, FrameStatus, RuntimeConfig};
pub use codec::{FrameBuffer, FrameCodec, Lz4FrameCodec, RawFrameCodec};
pub use error::{Error, Result};
pub use source::{FrameSource, SyntheticSource};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
