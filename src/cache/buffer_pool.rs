//! Read Buffer Pool
//!
//! Buffers that hold one compressed frame between the file read and the
//! decode.
//!
//! - Large frames: each cache instance owns one private buffer.
//! - Small frames: buffers are shared process-wide, one per reading
//!   thread, so hundreds of small stickers read by a few threads keep only
//!   a few buffers alive.
//!
//! Shared entries carry a `Weak` token whose strong half lives in a
//! thread-local of the owning thread. When the thread exits the token dies,
//! and a periodic sweep drops the entry. The sweeper only runs while at
//! least one shared buffer exists.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

thread_local! {
    static WORKER_TOKEN: Arc<()> = Arc::new(());
}

/// Name of the background sweeper thread
const SWEEPER_THREAD_NAME: &str = "animcache-buffer-sweep";

/// Size a buffer must reach to hold `min_len` bytes, with headroom
pub fn grown_len(min_len: usize, growth: f32) -> usize {
    ((min_len as f64 * f64::from(growth)).ceil() as usize).max(min_len)
}

/// Make `buf` at least `min_len` long, over-allocating by `growth`
pub fn ensure_len(buf: &mut Vec<u8>, min_len: usize, growth: f32) {
    if buf.len() < min_len {
        // Old contents are never needed, so skip the copy.
        buf.clear();
        buf.resize(grown_len(min_len, growth), 0);
    }
}

struct SharedEntry {
    buffer: Vec<u8>,
    owner: Weak<()>,
}

struct SharedBuffers {
    entries: DashMap<ThreadId, SharedEntry>,
    sweep_scheduled: AtomicBool,
    sweep_interval: Duration,
}

impl SharedBuffers {
    fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.owner.strong_count() > 0);
        before - self.entries.len()
    }
}

/// Process-wide read buffer registry keyed by thread.
#[derive(Clone)]
pub struct ReadBufferPool {
    shared: Arc<SharedBuffers>,
    growth: f32,
    thread_prefix: Option<String>,
}

impl ReadBufferPool {
    pub fn new(growth: f32, sweep_interval: Duration, thread_prefix: Option<String>) -> Self {
        Self {
            shared: Arc::new(SharedBuffers {
                entries: DashMap::new(),
                sweep_scheduled: AtomicBool::new(false),
                sweep_interval,
            }),
            growth,
            thread_prefix,
        }
    }

    /// Growth factor applied when a buffer is too small
    pub fn growth(&self) -> f32 {
        self.growth
    }

    /// Borrow a buffer of at least `min_len` bytes.
    ///
    /// With `shared` set and the current thread eligible, the calling
    /// thread's shared buffer is used; otherwise `private` is.
    pub fn lease<'a>(&'a self, private: &'a mut Vec<u8>, shared: bool, min_len: usize) -> BufferLease<'a> {
        let (home, mut buffer) = if shared && self.thread_is_eligible() {
            let id = thread::current().id();
            let buffer = self
                .shared
                .entries
                .remove(&id)
                .map(|(_, entry)| entry.buffer)
                .unwrap_or_default();
            (Home::Shared(id), buffer)
        } else {
            let buffer = std::mem::take(private);
            (Home::Private(private), buffer)
        };
        ensure_len(&mut buffer, min_len, self.growth);

        BufferLease {
            pool: self,
            home: Some(home),
            buffer,
        }
    }

    /// Drop entries whose owning thread has exited. Returns how many went.
    pub fn sweep(&self) -> usize {
        let removed = self.shared.sweep();
        if removed > 0 {
            debug!(removed, "Swept read buffers of exited threads");
        }
        removed
    }

    /// Number of shared buffers currently registered
    pub fn shared_len(&self) -> usize {
        self.shared.entries.len()
    }

    /// True while a background sweep is scheduled
    pub fn sweep_scheduled(&self) -> bool {
        self.shared.sweep_scheduled.load(Ordering::Acquire)
    }

    fn thread_is_eligible(&self) -> bool {
        match &self.thread_prefix {
            None => true,
            Some(prefix) => thread::current()
                .name()
                .is_some_and(|name| name.starts_with(prefix.as_str())),
        }
    }

    fn give_back_shared(&self, id: ThreadId, buffer: Vec<u8>) {
        let owner = WORKER_TOKEN.with(Arc::downgrade);
        self.shared.entries.insert(id, SharedEntry { buffer, owner });
        self.schedule_sweep();
    }

    fn schedule_sweep(&self) {
        if self
            .shared
            .sweep_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let shared = Arc::downgrade(&self.shared);
        let spawned = thread::Builder::new()
            .name(SWEEPER_THREAD_NAME.into())
            .spawn(move || sweep_loop(shared));
        if let Err(e) = spawned {
            warn!("Failed to start read buffer sweeper: {}", e);
            self.shared.sweep_scheduled.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for ReadBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadBufferPool")
            .field("shared", &self.shared_len())
            .field("growth", &self.growth)
            .field("thread_prefix", &self.thread_prefix)
            .finish()
    }
}

fn sweep_loop(shared: Weak<SharedBuffers>) {
    loop {
        let interval = match shared.upgrade() {
            Some(shared) => shared.sweep_interval,
            None => return,
        };
        thread::sleep(interval);

        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.sweep();
        if !shared.entries.is_empty() {
            continue;
        }

        shared.sweep_scheduled.store(false, Ordering::Release);
        // An insert may have raced the store above and seen the flag still set.
        if shared.entries.is_empty()
            || shared
                .sweep_scheduled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return;
        }
    }
}

// =============================================================================
// Lease
// =============================================================================

enum Home<'a> {
    Private(&'a mut Vec<u8>),
    Shared(ThreadId),
}

/// A borrowed read buffer, returned to where it came from on drop.
pub struct BufferLease<'a> {
    pool: &'a ReadBufferPool,
    home: Option<Home<'a>>,
    buffer: Vec<u8>,
}

impl BufferLease<'_> {
    /// True if the buffer came from the shared per-thread registry
    pub fn is_shared(&self) -> bool {
        matches!(self.home, Some(Home::Shared(_)))
    }
}

impl Deref for BufferLease<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        match self.home.take() {
            Some(Home::Private(slot)) => *slot = buffer,
            Some(Home::Shared(id)) => self.pool.give_back_shared(id, buffer),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ReadBufferPool {
        ReadBufferPool::new(1.3, Duration::from_secs(3600), None)
    }

    #[test]
    fn test_growth_factor() {
        assert_eq!(grown_len(100, 1.3), 130);
        assert_eq!(grown_len(10, 1.0), 10);
        assert_eq!(grown_len(0, 1.3), 0);
    }

    #[test]
    fn test_ensure_len_only_grows() {
        let mut buf = vec![7u8; 50];
        ensure_len(&mut buf, 40, 1.3);
        assert_eq!(buf.len(), 50);
        assert_eq!(buf[0], 7);

        ensure_len(&mut buf, 100, 1.3);
        assert_eq!(buf.len(), 130);
    }

    #[test]
    fn test_private_lease_returns_buffer() {
        let pool = pool();
        let mut private = Vec::new();
        {
            let mut lease = pool.lease(&mut private, false, 10);
            assert!(!lease.is_shared());
            assert_eq!(lease.len(), 13);
            lease[0] = 42;
        }
        assert_eq!(private.len(), 13);
        assert_eq!(private[0], 42);
        assert_eq!(pool.shared_len(), 0);
    }

    #[test]
    fn test_shared_lease_is_per_thread() {
        let pool = pool();
        let mut private = Vec::new();
        {
            let lease = pool.lease(&mut private, true, 100);
            assert!(lease.is_shared());
        }
        assert!(private.is_empty());
        assert_eq!(pool.shared_len(), 1);

        // Reused, not regrown
        {
            let lease = pool.lease(&mut private, true, 50);
            assert_eq!(lease.len(), 130);
        }
        assert_eq!(pool.shared_len(), 1);

        let other = pool.clone();
        thread::spawn(move || {
            let mut private = Vec::new();
            let _lease = other.lease(&mut private, true, 10);
        })
        .join()
        .unwrap();
        assert_eq!(pool.shared_len(), 2);
    }

    #[test]
    fn test_sweep_drops_exited_threads() {
        let pool = pool();
        let other = pool.clone();
        thread::spawn(move || {
            let mut private = Vec::new();
            let _lease = other.lease(&mut private, true, 10);
        })
        .join()
        .unwrap();

        let mut private = Vec::new();
        drop(pool.lease(&mut private, true, 10));
        assert_eq!(pool.shared_len(), 2);

        assert_eq!(pool.sweep(), 1);
        assert_eq!(pool.shared_len(), 1);
    }

    #[test]
    fn test_background_sweeper_stops_when_empty() {
        let pool = ReadBufferPool::new(1.3, Duration::from_millis(10), None);
        let other = pool.clone();
        thread::spawn(move || {
            let mut private = Vec::new();
            let _lease = other.lease(&mut private, true, 10);
        })
        .join()
        .unwrap();
        assert!(pool.sweep_scheduled());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while (pool.shared_len() > 0 || pool.sweep_scheduled())
            && std::time::Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.shared_len(), 0);
        assert!(!pool.sweep_scheduled());
    }

    #[test]
    fn test_thread_prefix_filter() {
        let pool = ReadBufferPool::new(1.3, Duration::from_secs(3600), Some("reader-".into()));
        let mut private = Vec::new();
        {
            // Test threads are not named "reader-*"
            let lease = pool.lease(&mut private, true, 10);
            assert!(!lease.is_shared());
        }
        assert_eq!(private.len(), 13);

        let named = pool.clone();
        thread::Builder::new()
            .name("reader-1".into())
            .spawn(move || {
                let mut private = Vec::new();
                let lease = named.lease(&mut private, true, 10);
                assert!(lease.is_shared());
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(pool.shared_len(), 1);
    }
}
