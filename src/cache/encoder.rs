//! Frame Encoder
//!
//! Bounded-parallel build pipeline. One producer thread pulls frames from the
//! source and round-robins them over the N encode slots; compression and file
//! appends run on the shared worker threads.
//!
//! ```text
//!            slot 0   slot 1   ...   slot N-1
//! source ──▶ [wait ▸ pull ▸ submit] ──▶ workers ──▶ encode ──▶ lock ▸ append ▸ index
//!              ▲                                                       │
//!              └──────────────── completion signal ◀───────────────────┘
//! ```
//!
//! A slot is reused only after its previous job signalled, so at most N
//! frames are pulled but not yet written. Jobs complete in any order; the
//! index is sorted by logical frame index before it is written.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::encode_pool::{EncodeSlot, SlotBuffers};
use super::format::{self, encode_index, CacheHeader, FrameIndexEntry, MAX_FILE_OFFSET};
use super::runtime::CacheRuntime;
use crate::codec::FrameCodec;
use crate::error::{Error, Result};
use crate::source::FrameSource;

/// Result of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A valid file was already on disk and was kept
    Reused(Vec<FrameIndexEntry>),
    /// A new file was written and finalized
    Generated { frames: u32 },
    /// Cancelled before finalization; the file on disk is not finalized
    Cancelled,
    /// The build failed and the engine stays ungenerated
    Failed,
}

impl BuildOutcome {
    /// True if a finalized file is on disk afterwards
    pub fn is_ready(&self) -> bool {
        matches!(self, BuildOutcome::Reused(_) | BuildOutcome::Generated { .. })
    }
}

/// Removes `path`, treating an already missing file as success
pub(crate) fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// =============================================================================
// Source Session
// =============================================================================

/// Pairs `prepare_for_generate_cache` with exactly one release.
struct SourceSession<'a> {
    source: &'a mut dyn FrameSource,
}

impl<'a> SourceSession<'a> {
    fn start(source: &'a mut dyn FrameSource) -> Self {
        source.prepare_for_generate_cache();
        Self { source }
    }
}

impl Drop for SourceSession<'_> {
    fn drop(&mut self) {
        self.source.release_for_generate_cache();
    }
}

// =============================================================================
// Generation Task
// =============================================================================

struct TaskWriter {
    file: File,
    entries: Vec<FrameIndexEntry>,
}

/// State shared by the producer and every job of one build.
struct GenerationTask {
    cancelled: Arc<AtomicBool>,
    closed: AtomicBool,
    writer: Mutex<TaskWriter>,
    error: Mutex<Option<Error>>,
}

impl GenerationTask {
    fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.closed.load(Ordering::Acquire)
    }

    /// Close the task, keeping the first error
    fn fail(&self, err: Error) {
        self.closed.store(true, Ordering::Release);
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_error(&self) -> Option<Error> {
        self.error.lock().take()
    }
}

/// One frame's compression job.
///
/// Dropping the job restores the slot and fires the completion signal, so a
/// job that is rejected by the pool or panics still frees its slot. The task
/// handle is released before the signal so no worker keeps the file open
/// once the producer has seen every completion.
struct EncodeJob {
    task: Option<Arc<GenerationTask>>,
    codec: Arc<dyn FrameCodec>,
    quality: u8,
    index: u32,
    slot: Arc<EncodeSlot>,
    buffers: Option<SlotBuffers>,
    done: Sender<()>,
}

impl EncodeJob {
    fn run(mut self) {
        let (Some(task), Some(buffers)) = (self.task.as_ref(), self.buffers.as_mut()) else {
            return;
        };
        if task.is_stopped() {
            return;
        }
        let written = encode_and_append(task, self.codec.as_ref(), self.quality, self.index, buffers);
        if let Err(e) = written {
            warn!(frame = self.index, error = %e, "Frame encode failed, closing build");
            task.fail(e);
        }
    }
}

impl Drop for EncodeJob {
    fn drop(&mut self) {
        if let Some(buffers) = self.buffers.take() {
            drop(self.slot.restore(buffers));
        }
        self.task = None;
        let _ = self.done.send(());
    }
}

fn encode_and_append(
    task: &GenerationTask,
    codec: &dyn FrameCodec,
    quality: u8,
    index: u32,
    buffers: &mut SlotBuffers,
) -> Result<()> {
    buffers.encoded.clear();
    codec.encode(&buffers.target, quality, &mut buffers.encoded)?;

    // File length and index entry move together under this lock.
    let mut writer = task.writer.lock();
    let offset = writer.file.seek(SeekFrom::End(0))?;
    let end = offset + buffers.encoded.len() as u64;
    if end > MAX_FILE_OFFSET {
        return Err(Error::OffsetOverflow { offset: end });
    }
    writer.file.write_all(&buffers.encoded)?;
    writer
        .entries
        .push(FrameIndexEntry::new(index, offset as u32, buffers.encoded.len() as u32));
    Ok(())
}

// =============================================================================
// Encoder
// =============================================================================

/// Builds one cache file from a [`FrameSource`].
pub struct FrameEncoder<'a> {
    path: &'a Path,
    width: u32,
    height: u32,
    quality: u8,
    codec: Arc<dyn FrameCodec>,
    runtime: &'a CacheRuntime,
    cancelled: Arc<AtomicBool>,
}

impl<'a> FrameEncoder<'a> {
    pub fn new(
        path: &'a Path,
        width: u32,
        height: u32,
        codec: Arc<dyn FrameCodec>,
        runtime: &'a CacheRuntime,
    ) -> Self {
        Self {
            path,
            width,
            height,
            quality: super::config::COMPRESS_QUALITY_MAX,
            codec,
            runtime,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Codec quality, clamped to 100
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Reuse a valid file at the target path, or generate a new one.
    #[instrument(skip(self, source), fields(path = %self.path.display(), width = self.width, height = self.height))]
    pub fn build(&self, source: &mut dyn FrameSource) -> Result<BuildOutcome> {
        if self.path.exists() {
            match format::validate(self.path) {
                Ok((_, entries)) => {
                    debug!(frames = entries.len(), "Reusing existing cache file");
                    return Ok(BuildOutcome::Reused(entries));
                }
                Err(e) => {
                    debug!(error = %e, "Discarding invalid cache file");
                    remove_if_present(self.path)?;
                }
            }
        }

        let started = Instant::now();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path)?;
        file.write_all(&CacheHeader::PLACEHOLDER.encode())?;

        let lease = self.runtime.encode_pool().acquire(self.width, self.height);
        let session = SourceSession::start(source);
        let task = Arc::new(GenerationTask {
            cancelled: self.cancelled.clone(),
            closed: AtomicBool::new(false),
            writer: Mutex::new(TaskWriter {
                file,
                entries: Vec::new(),
            }),
            error: Mutex::new(None),
        });

        let slots = lease.slot_count();
        let mut pending: Vec<Option<Receiver<()>>> = (0..slots).map(|_| None).collect();
        let mut frames: u32 = 0;
        let mut slot = 0;

        loop {
            if let Some(done) = pending[slot].take() {
                let _ = done.recv();
            }
            if task.is_stopped() {
                break;
            }

            let mut buffers = lease.checkout(slot);
            if !session.source.next_frame(&mut buffers.target) {
                drop(lease.slot(slot).restore(buffers));
                break;
            }

            let (done_tx, done_rx) = channel::bounded(1);
            pending[slot] = Some(done_rx);
            let job = EncodeJob {
                task: Some(task.clone()),
                codec: self.codec.clone(),
                quality: self.quality,
                index: frames,
                slot: lease.slot(slot),
                buffers: Some(buffers),
                done: done_tx,
            };
            if let Err(e) = self.runtime.workers().submit(move || job.run()) {
                task.fail(e);
                break;
            }

            frames += 1;
            slot = (slot + 1) % slots;
        }

        for done in pending.iter_mut().filter_map(Option::take) {
            let _ = done.recv();
        }

        if let Some(err) = task.take_error() {
            lease.release_targets();
            warn!(frames, error = %err, "Cache generation failed");
            return Err(err);
        }
        if task.cancelled.load(Ordering::Acquire) {
            lease.release_targets();
            info!(frames, "Cache generation cancelled");
            return Ok(BuildOutcome::Cancelled);
        }
        if frames == 0 {
            drop(session);
            remove_if_present(self.path)?;
            warn!("Animation source produced no frames");
            return Err(Error::EmptySource);
        }

        let bytes = {
            let mut writer = task.writer.lock();
            finalize(&mut writer, frames)?
        };
        drop(session);

        info!(
            frames,
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache generated"
        );
        Ok(BuildOutcome::Generated { frames })
    }
}

impl std::fmt::Debug for FrameEncoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("quality", &self.quality)
            .field("codec", &self.codec.name())
            .finish()
    }
}

/// Sort the index, append it and flip the header. Returns the file size.
fn finalize(writer: &mut TaskWriter, frames: u32) -> Result<u64> {
    let TaskWriter { file, entries } = writer;
    if entries.len() != frames as usize {
        return Err(Error::Internal(format!(
            "{} frames pulled but {} written",
            frames,
            entries.len()
        )));
    }
    entries.sort_unstable_by_key(|entry| entry.index);

    let index_offset = file.seek(SeekFrom::End(0))?;
    if index_offset > MAX_FILE_OFFSET {
        return Err(Error::OffsetOverflow {
            offset: index_offset,
        });
    }
    let table = encode_index(entries);
    file.write_all(&table)?;

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&CacheHeader::finalized(index_offset as u32).encode())?;
    file.sync_all()?;
    Ok(index_offset + table.len() as u64)
}
