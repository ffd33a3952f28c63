//! Cache configuration
//!
//! [`CacheOptions`] travels with each cache instance; [`RuntimeConfig`]
//! tunes the process-wide pools shared by every instance.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compression quality used when the host asks for "the configured default"
pub const COMPRESS_QUALITY_DEFAULT: u8 = 60;

/// Compression quality of a plain `CacheOptions::default()`
pub const COMPRESS_QUALITY_MAX: u8 = 100;

/// Upper bound on parallel encode slots
pub const MAX_ENCODE_SLOTS: usize = 8;

/// Failures tolerated before a cache instance gives up on reading
pub const DEFAULT_MAX_READ_FAILURES: u32 = 10;

// =============================================================================
// Per-cache Options
// =============================================================================

/// Options fixed when a cache instance is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Codec quality, 0..=100
    pub compress_quality: u8,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            compress_quality: COMPRESS_QUALITY_MAX,
        }
    }
}

impl CacheOptions {
    /// Options with the host's configured default quality (60)
    pub fn configured() -> Self {
        Self {
            compress_quality: COMPRESS_QUALITY_DEFAULT,
        }
    }

    pub fn with_quality(compress_quality: u8) -> Self {
        Self {
            compress_quality: compress_quality.min(100),
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Process-wide tunables for the shared pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Parallel encode slots; `None` uses available parallelism
    pub encode_slots: Option<usize>,
    /// Frames narrower and shorter than this share per-thread read buffers
    pub shared_buffer_max_dimension: u32,
    /// Interval between sweeps of buffers owned by exited threads
    pub shared_buffer_sweep_interval_ms: u64,
    /// Over-allocation factor applied when a read buffer grows
    pub read_buffer_growth: f32,
    /// Read failures tolerated before an instance is marked errored
    pub max_read_failures: u32,
    /// Only threads with this name prefix use shared buffers
    pub shared_buffer_thread_prefix: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            encode_slots: None,
            shared_buffer_max_dimension: 160,
            shared_buffer_sweep_interval_ms: 5_000,
            read_buffer_growth: 1.3,
            max_read_failures: DEFAULT_MAX_READ_FAILURES,
            shared_buffer_thread_prefix: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse from YAML and validate
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shared_buffer_sweep_interval_ms == 0 {
            return Err(Error::Config(
                "shared_buffer_sweep_interval_ms must be > 0".into(),
            ));
        }
        if !(self.read_buffer_growth >= 1.0) {
            return Err(Error::Config("read_buffer_growth must be >= 1.0".into()));
        }
        if self.encode_slots == Some(0) {
            return Err(Error::Config("encode_slots must be > 0".into()));
        }
        Ok(())
    }

    /// N = clamp(slots or available parallelism, 1, 8)
    pub fn slot_count(&self) -> usize {
        let wanted = self.encode_slots.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        wanted.clamp(1, MAX_ENCODE_SLOTS)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.shared_buffer_sweep_interval_ms)
    }

    /// True if frames of this size should use per-thread shared buffers
    pub fn uses_shared_buffers(&self, width: u32, height: u32) -> bool {
        width < self.shared_buffer_max_dimension && height < self.shared_buffer_max_dimension
    }
}
