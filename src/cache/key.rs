//! Cache identity

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File extension of cache files
pub const CACHE_FILE_EXTENSION: &str = "pcache2";

/// Identity of one cache file: source plus the size it was rendered at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Name of the animation source (usually its file name)
    pub source: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Whether the source was decoded without a frame-count limit
    pub no_limit: bool,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, width: u32, height: u32, no_limit: bool) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            no_limit,
        }
    }

    /// File name derived from every part of the key
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}{}.{}",
            self.source,
            self.width,
            self.height,
            if self.no_limit { "_nolimit" } else { "" },
            CACHE_FILE_EXTENSION
        )
    }

    /// Full path of the cache file inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}x{}", self.source, self.width, self.height)?;
        if self.no_limit {
            write!(f, " (no limit)")?;
        }
        Ok(())
    }
}
