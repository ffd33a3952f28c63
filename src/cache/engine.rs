//! Cache Engine
//!
//! Owns one cache file: checks it on construction, builds it through the
//! [`FrameEncoder`] and serves frames from it.
//!
//! Reads never fail loudly. Every problem turns into
//! [`FrameStatus::NoFrame`], and after too many failures the instance stops
//! touching the disk for the rest of its life.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::config::CacheOptions;
use super::encoder::{remove_if_present, BuildOutcome, FrameEncoder};
use super::format::{self, CacheHeader, FrameIndexEntry};
use super::key::CacheKey;
use super::metrics::CacheMetrics;
use super::runtime::CacheRuntime;
use crate::codec::{FrameBuffer, FrameCodec};
use crate::error::{Error, Result};
use crate::source::FrameSource;

/// Integer code of a successful read
pub const FRAME_RESULT_OK: i32 = 0;

/// Integer code of a read that produced no frame
pub const FRAME_RESULT_NO_FRAME: i32 = -1;

/// Outcome of a frame read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The target holds the requested frame
    Ready,
    /// Nothing was decoded; keep showing the previous frame
    NoFrame,
}

impl FrameStatus {
    pub fn as_code(self) -> i32 {
        match self {
            FrameStatus::Ready => FRAME_RESULT_OK,
            FrameStatus::NoFrame => FRAME_RESULT_NO_FRAME,
        }
    }

    pub fn is_ready(self) -> bool {
        self == FrameStatus::Ready
    }
}

/// Result of [`CacheEngine::get_next_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRead {
    pub status: FrameStatus,
    /// Cursor position the read was issued for
    pub index: usize,
}

#[derive(Debug, Default)]
struct ReadState {
    file: Option<File>,
    index: Vec<FrameIndexEntry>,
    buffer: Vec<u8>,
    cursor: usize,
}

/// One cache file and its read path.
pub struct CacheEngine {
    key: CacheKey,
    path: PathBuf,
    options: CacheOptions,
    codec: Arc<dyn FrameCodec>,
    runtime: Arc<CacheRuntime>,
    shared_buffers: bool,

    state: Mutex<ReadState>,
    cache_created: AtomicBool,
    file_exists: AtomicBool,
    exists_checked: AtomicBool,
    recycled: AtomicBool,
    cancelled: Arc<AtomicBool>,

    error: AtomicBool,
    failures: AtomicU32,
    metrics: CacheMetrics,
}

impl CacheEngine {
    /// Engine for `key` inside `dir`, using the process-wide runtime
    pub fn new(
        dir: impl AsRef<Path>,
        key: CacheKey,
        options: CacheOptions,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        Self::with_runtime(dir, key, options, codec, CacheRuntime::global())
    }

    /// Engine bound to an explicit runtime.
    ///
    /// An existing file is checked right away. A finalized file whose index
    /// cannot be read, or which holds no frames, is deleted.
    pub fn with_runtime(
        dir: impl AsRef<Path>,
        key: CacheKey,
        options: CacheOptions,
        codec: Arc<dyn FrameCodec>,
        runtime: Arc<CacheRuntime>,
    ) -> Self {
        let path = key.path_in(dir.as_ref());
        let shared_buffers = runtime.config().uses_shared_buffers(key.width, key.height);
        let engine = Self {
            key,
            path,
            options,
            codec,
            runtime,
            shared_buffers,
            state: Mutex::new(ReadState::default()),
            cache_created: AtomicBool::new(false),
            file_exists: AtomicBool::new(false),
            exists_checked: AtomicBool::new(false),
            recycled: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            error: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            metrics: CacheMetrics::new(),
        };
        engine.check_existing();
        engine
    }

    fn check_existing(&self) {
        if !self.path.exists() {
            return;
        }
        self.file_exists.store(true, Ordering::Release);

        let checked = File::open(&self.path).map_err(Error::from).and_then(|mut file| {
            self.metrics.record_file_open();
            let header = CacheHeader::read_from(&mut file)?;
            if !header.finalized {
                return Ok(None);
            }
            format::read_index(&mut file, &header).map(Some)
        });

        match checked {
            Ok(Some(index)) => {
                debug!(key = %self.key, frames = index.len(), "Found finalized cache file");
                self.state.lock().index = index;
                self.cache_created.store(true, Ordering::Release);
            }
            Ok(None) => {
                debug!(key = %self.key, "Found unfinished cache file");
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Removing corrupt cache file");
                if let Err(e) = remove_if_present(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove cache file");
                }
                self.metrics.record_corrupt_removed();
                self.file_exists.store(false, Ordering::Release);
            }
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// True if the file on disk is finalized with at least one frame.
    ///
    /// The file is probed once per instance; later calls reuse the answer.
    pub fn exists(&self) -> bool {
        if self.exists_checked.load(Ordering::Acquire) {
            return self.cache_created.load(Ordering::Acquire);
        }

        let _state = self.state.lock();
        if !self.exists_checked.load(Ordering::Acquire) {
            let created = self.probe().unwrap_or(false);
            self.cache_created.store(created, Ordering::Release);
            self.exists_checked.store(true, Ordering::Release);
        }
        self.cache_created.load(Ordering::Acquire)
    }

    fn probe(&self) -> Result<bool> {
        let mut file = File::open(&self.path)?;
        self.metrics.record_file_open();
        let header = CacheHeader::read_from(&mut file)?;
        if !header.finalized {
            return Ok(false);
        }
        Ok(format::read_frame_count(&mut file, &header)? > 0)
    }

    /// True unless a finalized file is known to be on disk
    pub fn needs_generation(&self) -> bool {
        !self.cache_created.load(Ordering::Acquire) || !self.file_exists.load(Ordering::Acquire)
    }

    /// Frames in the in-memory index. Zero until the index is loaded.
    pub fn frame_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// True once reads have been given up on
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// True while a read handle is kept open
    pub fn has_open_handle(&self) -> bool {
        self.state.lock().file.is_some()
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Decode frame `index` (clamped to the last frame) into `target`
    pub fn get_frame(&self, index: usize, target: &mut FrameBuffer) -> FrameStatus {
        if self.error.load(Ordering::Acquire) {
            return FrameStatus::NoFrame;
        }
        if !self.cache_created.load(Ordering::Acquire) && !self.file_exists.load(Ordering::Acquire) {
            return FrameStatus::NoFrame;
        }

        let mut state = self.state.lock();
        match self.read_frame(&mut state, index, target) {
            Ok(true) => {
                self.metrics.record_frame_served();
                FrameStatus::Ready
            }
            Ok(false) => FrameStatus::NoFrame,
            Err(e) => {
                state.file = None;
                self.record_failure(&e);
                FrameStatus::NoFrame
            }
        }
    }

    /// Decode the frame under the internal cursor, then advance it.
    ///
    /// The cursor wraps once the cache is known to hold frames.
    pub fn get_next_frame(&self, target: &mut FrameBuffer) -> FrameRead {
        let index = self.state.lock().cursor;
        let status = self.get_frame(index, target);

        if self.cache_created.load(Ordering::Acquire) {
            let mut state = self.state.lock();
            let count = state.index.len();
            if count > 0 {
                state.cursor = (state.cursor + 1) % count;
            }
        }
        FrameRead { status, index }
    }

    fn read_frame(&self, state: &mut ReadState, index: usize, target: &mut FrameBuffer) -> Result<bool> {
        if state.file.is_none() || !self.cache_created.load(Ordering::Acquire) {
            let mut file = File::open(&self.path)?;
            self.metrics.record_file_open();
            let header = CacheHeader::read_from(&mut file)?;
            if header.finalized && state.index.is_empty() {
                state.index = format::read_index(&mut file, &header)?;
            }
            let created = header.finalized && !state.index.is_empty();
            self.cache_created.store(created, Ordering::Release);
            if !created {
                return Ok(false);
            }
            state.file = Some(file);
        }

        let ReadState {
            file, index: frames, buffer, ..
        } = state;
        let Some(entry) = frames.get(index.min(frames.len().saturating_sub(1))).copied() else {
            return Ok(false);
        };
        let Some(handle) = file.as_mut() else {
            return Ok(false);
        };

        let size = entry.size as usize;
        let mut lease = self.runtime.buffers().lease(buffer, self.shared_buffers, size);
        self.metrics.record_frame_read();
        handle.seek(SeekFrom::Start(u64::from(entry.offset)))?;
        handle.read_exact(&mut lease[..size])?;
        if self.recycled.load(Ordering::Acquire) {
            *file = None;
        }

        self.codec.decode(&lease[..size], target)?;
        Ok(true)
    }

    fn record_failure(&self, err: &Error) {
        self.metrics.record_read_failure();
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(key = %self.key, failures, error = %err, "Frame read failed");
        if failures > self.runtime.config().max_read_failures {
            self.error.store(true, Ordering::Release);
            warn!(key = %self.key, failures, "Too many read failures, giving up on cache");
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Build the cache file from `source`. Errors are logged and absorbed.
    pub fn create_cache(&self, source: &mut dyn FrameSource) -> BuildOutcome {
        // The file is about to be replaced underneath any held handle.
        self.state.lock().file = None;

        let encoder = FrameEncoder::new(
            &self.path,
            self.key.width,
            self.key.height,
            self.codec.clone(),
            &self.runtime,
        )
        .with_quality(self.options.compress_quality)
        .with_cancel_flag(self.cancelled.clone());

        match encoder.build(source) {
            Ok(outcome @ (BuildOutcome::Reused(_) | BuildOutcome::Generated { .. })) => {
                {
                    // Reloaded from disk on the next read.
                    let mut state = self.state.lock();
                    state.index.clear();
                    state.file = None;
                }
                self.cache_created.store(true, Ordering::Release);
                self.file_exists.store(true, Ordering::Release);
                self.metrics.record_build_completed();
                outcome
            }
            Ok(outcome) => {
                self.mark_not_generated();
                self.metrics.record_build_cancelled();
                outcome
            }
            Err(e) => {
                self.mark_not_generated();
                self.metrics.record_build_failed();
                warn!(key = %self.key, error = %e, "Cache build failed");
                BuildOutcome::Failed
            }
        }
    }

    fn mark_not_generated(&self) {
        self.cache_created.store(false, Ordering::Release);
        self.file_exists.store(self.path.exists(), Ordering::Release);
    }

    /// Ask a running build to stop. Stays set for the instance's lifetime.
    pub fn cancel_generation(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!(key = %self.key, "Cache generation cancel requested");
        }
    }

    /// Close the read handle; later reads do not keep one open
    pub fn recycle(&self) {
        self.recycled.store(true, Ordering::Release);
        self.state.lock().file = None;
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("codec", &self.codec.name())
            .field("cache_created", &self.cache_created.load(Ordering::Relaxed))
            .field("error", &self.has_error())
            .finish()
    }
}
