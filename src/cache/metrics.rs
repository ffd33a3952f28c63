//! Cache Metrics Collection
//!
//! Per-instance counters for file activity, reads and builds.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // File activity
    file_opens: AtomicU64,
    frame_reads: AtomicU64,
    corrupt_files_removed: AtomicU64,

    // Read outcomes
    frames_served: AtomicU64,
    read_failures: AtomicU64,

    // Builds
    builds_completed: AtomicU64,
    builds_cancelled: AtomicU64,
    builds_failed: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub file_opens: u64,
    pub frame_reads: u64,
    pub corrupt_files_removed: u64,
    pub frames_served: u64,
    pub read_failures: u64,
    pub builds_completed: u64,
    pub builds_cancelled: u64,
    pub builds_failed: u64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file_open(&self) {
        self.file_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_read(&self) {
        self.frame_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_removed(&self) {
        self.corrupt_files_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_served(&self) {
        self.frames_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build_completed(&self) {
        self.builds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build_cancelled(&self) {
        self.builds_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build_failed(&self) {
        self.builds_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times the cache file was opened
    pub fn file_opens(&self) -> u64 {
        self.file_opens.load(Ordering::Relaxed)
    }

    /// Number of payload reads attempted
    pub fn frame_reads(&self) -> u64 {
        self.frame_reads.load(Ordering::Relaxed)
    }

    pub fn frames_served(&self) -> u64 {
        self.frames_served.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    /// Fraction of payload reads that produced a frame
    pub fn read_success_ratio(&self) -> f64 {
        let served = self.frames_served() as f64;
        let total = served + self.read_failures() as f64;
        if total == 0.0 {
            0.0
        } else {
            served / total
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            file_opens: self.file_opens(),
            frame_reads: self.frame_reads(),
            corrupt_files_removed: self.corrupt_files_removed.load(Ordering::Relaxed),
            frames_served: self.frames_served(),
            read_failures: self.read_failures(),
            builds_completed: self.builds_completed.load(Ordering::Relaxed),
            builds_cancelled: self.builds_cancelled.load(Ordering::Relaxed),
            builds_failed: self.builds_failed.load(Ordering::Relaxed),
        }
    }
}
