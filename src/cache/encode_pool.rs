//! Shared Encode Pool
//!
//! N reusable `(decode target, encode buffer)` pairs shared by every cache
//! build in the process.
//!
//! # Lifecycle
//!
//! ```text
//! acquire(w, h) ──▶ active_tasks += 1, allocate or resize slots
//!      │
//!      ▼
//! EncodeLease ── checkout(i) / restore(i) per frame ──▶ drop
//!                                                        │
//!                               active_tasks -= 1 ◀──────┘
//!                               == 0 → release every slot
//! ```
//!
//! Acquire and release take the same mutex, so a build that finishes can
//! never tear the pool down underneath one that is starting.
//!
//! A slot is handed to one job at a time. Two concurrent builds that land
//! on the same slot queue on it instead of overwriting each other's pixels.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::workers::CompressWorkers;
use crate::codec::FrameBuffer;

/// Encode buffer capacity per pixel when a slot is first allocated
const ENCODE_BYTES_PER_PIXEL: usize = 2;

// =============================================================================
// Slot
// =============================================================================

/// Buffers checked out of a slot for one frame.
#[derive(Debug)]
pub struct SlotBuffers {
    /// Raw frame pulled from the source
    pub target: FrameBuffer,
    /// Compressed bytes produced by the codec
    pub encoded: Vec<u8>,
}

#[derive(Debug, Default)]
struct SlotState {
    target: Option<FrameBuffer>,
    encoded: Vec<u8>,
    size: (u32, u32),
    busy: bool,
}

/// One pipeline position.
#[derive(Debug, Default)]
pub struct EncodeSlot {
    state: Mutex<SlotState>,
    returned: Condvar,
}

impl EncodeSlot {
    /// Take the slot's buffers, waiting while another job holds them.
    ///
    /// A missing or mis-sized target is replaced with a fresh one.
    pub fn checkout(&self, width: u32, height: u32) -> SlotBuffers {
        let mut state = self.state.lock();
        while state.busy {
            self.returned.wait(&mut state);
        }
        state.busy = true;

        let target = match state.target.take() {
            Some(target) if target.has_size(width, height) => target,
            _ => FrameBuffer::new(width, height),
        };
        let mut encoded = std::mem::take(&mut state.encoded);
        if encoded.capacity() == 0 {
            encoded.reserve(encode_capacity(width, height));
        }
        encoded.clear();
        SlotBuffers { target, encoded }
    }

    /// Give buffers back. A target that no longer matches the slot's size
    /// is returned to the caller for disposal.
    pub fn restore(&self, mut buffers: SlotBuffers) -> Option<FrameBuffer> {
        let mut state = self.state.lock();
        state.busy = false;
        buffers.encoded.clear();
        state.encoded = buffers.encoded;

        let (width, height) = state.size;
        let stale = if buffers.target.has_size(width, height) && state.target.is_none() {
            state.target = Some(buffers.target);
            None
        } else {
            Some(buffers.target)
        };
        drop(state);
        self.returned.notify_one();
        stale
    }

    /// True if the slot currently owns a decode target
    pub fn has_target(&self) -> bool {
        self.state.lock().target.is_some()
    }

    fn resize(&self, width: u32, height: u32) -> Option<FrameBuffer> {
        let mut state = self.state.lock();
        state.size = (width, height);
        if state.encoded.capacity() == 0 {
            state.encoded.reserve(encode_capacity(width, height));
        }
        let fits = state
            .target
            .as_ref()
            .is_some_and(|target| target.has_size(width, height));
        // A busy slot has no target; the job's copy is dropped on restore.
        if fits || state.busy {
            None
        } else {
            state.target.replace(FrameBuffer::new(width, height))
        }
    }

    fn release_target(&self) -> Option<FrameBuffer> {
        self.state.lock().target.take()
    }

    fn release_all(&self) -> Option<FrameBuffer> {
        let mut state = self.state.lock();
        state.encoded = Vec::new();
        state.target.take()
    }
}

fn encode_capacity(width: u32, height: u32) -> usize {
    width as usize * height as usize * ENCODE_BYTES_PER_PIXEL
}

// =============================================================================
// Pool
// =============================================================================

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Arc<EncodeSlot>>,
    size: Option<(u32, u32)>,
    active_tasks: usize,
}

/// Reference-counted set of encode slots shared across builds.
#[derive(Debug)]
pub struct SharedEncodePool {
    slot_count: usize,
    state: Arc<Mutex<PoolState>>,
    workers: Arc<CompressWorkers>,
}

impl SharedEncodePool {
    /// Pool of `slot_count` slots; disposal jobs run on `workers`
    pub fn new(slot_count: usize, workers: Arc<CompressWorkers>) -> Self {
        Self {
            slot_count: slot_count.max(1),
            state: Arc::new(Mutex::new(PoolState::default())),
            workers,
        }
    }

    /// Number of slots (N)
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Register a build and make sure every slot is sized for `width × height`
    pub fn acquire(&self, width: u32, height: u32) -> EncodeLease {
        let mut state = self.state.lock();
        state.active_tasks += 1;

        if state.slots.is_empty() {
            state.slots = (0..self.slot_count)
                .map(|_| Arc::new(EncodeSlot::default()))
                .collect();
            debug!(slots = self.slot_count, width, height, "Allocated encode pool");
        }

        if state.size != Some((width, height)) {
            let stale: Vec<FrameBuffer> = state
                .slots
                .iter()
                .filter_map(|slot| slot.resize(width, height))
                .collect();
            state.size = Some((width, height));
            dispose(&self.workers, stale);
        }

        EncodeLease {
            slots: state.slots.clone(),
            width,
            height,
            pool: self.state.clone(),
            workers: self.workers.clone(),
        }
    }

    /// Builds currently holding a lease
    pub fn active_tasks(&self) -> usize {
        self.state.lock().active_tasks
    }

    /// True while slots are allocated
    pub fn is_allocated(&self) -> bool {
        !self.state.lock().slots.is_empty()
    }

    /// Number of slots currently owning a decode target
    pub fn allocated_targets(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.has_target())
            .count()
    }
}

/// Frees buffers on a worker thread instead of the caller's
fn dispose(workers: &CompressWorkers, stale: Vec<FrameBuffer>) {
    if stale.is_empty() {
        return;
    }
    let count = stale.len();
    if workers.submit(move || drop(stale)).is_err() {
        debug!(count, "Worker pool closed, dropping decode targets inline");
    }
}

// =============================================================================
// Lease
// =============================================================================

/// A build's handle on the shared pool. Dropping it ends the build's claim.
pub struct EncodeLease {
    slots: Vec<Arc<EncodeSlot>>,
    width: u32,
    height: u32,
    pool: Arc<Mutex<PoolState>>,
    workers: Arc<CompressWorkers>,
}

impl EncodeLease {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Shared handle to slot `i`
    pub fn slot(&self, i: usize) -> Arc<EncodeSlot> {
        self.slots[i].clone()
    }

    /// Check out slot `i` at the lease's frame size
    pub fn checkout(&self, i: usize) -> SlotBuffers {
        self.slots[i].checkout(self.width, self.height)
    }

    /// Drop every idle decode target held by this lease's slots
    pub fn release_targets(&self) {
        let stale: Vec<FrameBuffer> = self
            .slots
            .iter()
            .filter_map(|slot| slot.release_target())
            .collect();
        dispose(&self.workers, stale);
    }
}

impl std::fmt::Debug for EncodeLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeLease")
            .field("slots", &self.slots.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Drop for EncodeLease {
    fn drop(&mut self) {
        let mut state = self.pool.lock();
        state.active_tasks = state.active_tasks.saturating_sub(1);
        if state.active_tasks > 0 {
            return;
        }

        let stale: Vec<FrameBuffer> = state
            .slots
            .drain(..)
            .filter_map(|slot| slot.release_all())
            .collect();
        state.size = None;
        drop(state);

        debug!(targets = stale.len(), "Released encode pool");
        dispose(&self.workers, stale);
    }
}
