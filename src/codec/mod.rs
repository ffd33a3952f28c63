//! Frame Codec Collaborators
//!
//! The cache engine never looks at pixels. It hands a [`FrameBuffer`] to a
//! [`FrameCodec`] and stores whatever bytes come back, so any deterministic
//! codec can sit behind the trait.
//!
//! # Layout
//!
//! ```text
//! FrameBuffer (RGBA8888, width × height × 4 bytes)
//!        │ encode(quality)
//!        ▼
//! compressed payload ──▶ cache file ──▶ decode ──▶ caller's FrameBuffer
//! ```

mod compression;

pub use compression::{Lz4FrameCodec, RawFrameCodec};

use crate::error::{Error, Result};

/// Bytes per pixel of the decode target format (RGBA8888)
pub const BYTES_PER_PIXEL: usize = 4;

// =============================================================================
// Frame Buffer
// =============================================================================

/// A decoded frame: the decode target filled by a source and by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a zeroed frame of the given dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Wrap existing pixel data, checking it matches the dimensions
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if pixels.len() != expected {
            return Err(Error::FrameSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Number of bytes a frame of these dimensions occupies
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns true if the frame has the given dimensions
    #[inline]
    pub fn has_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Overwrite every byte with `value`
    pub fn fill(&mut self, value: u8) {
        self.pixels.fill(value);
    }

    /// Copy decoded bytes into the frame, rejecting a length mismatch
    pub fn copy_from(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != self.pixels.len() {
            return Err(Error::FrameSizeMismatch {
                expected: self.pixels.len(),
                actual: data.len(),
            });
        }
        self.pixels.copy_from_slice(data);
        Ok(())
    }
}

// =============================================================================
// Codec Trait
// =============================================================================

/// Compresses a frame into bytes and back.
///
/// Implementations must be deterministic in the sense that the byte count
/// returned by `encode` is exactly what `decode` later receives.
pub trait FrameCodec: Send + Sync {
    /// Human-readable codec name, used in logs and errors
    fn name(&self) -> &'static str;

    /// Append the compressed form of `frame` to `out`.
    ///
    /// `quality` is 0..=100. Codecs without a quality notion may ignore it.
    fn encode(&self, frame: &FrameBuffer, quality: u8, out: &mut Vec<u8>) -> Result<()>;

    /// Decode `data` into `target`, which already has the expected dimensions
    fn decode(&self, data: &[u8], target: &mut FrameBuffer) -> Result<()>;
}
