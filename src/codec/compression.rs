//! Frame Compression
//!
//! LZ4 block compression for cached frames, plus a pass-through codec for
//! tests and for sources whose frames are already tiny.
//!
//! # Example
//!
//! ```
//! use animcache::codec::{FrameBuffer, FrameCodec, Lz4FrameCodec};
//!
//! let codec = Lz4FrameCodec::new();
//! let mut frame = FrameBuffer::new(16, 16);
//! frame.fill(0x7f);
//!
//! let mut payload = Vec::new();
//! codec.encode(&frame, 60, &mut payload).unwrap();
//!
//! let mut decoded = FrameBuffer::new(16, 16);
//! codec.decode(&payload, &mut decoded).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use super::{FrameBuffer, FrameCodec};
use crate::error::{Error, Result};

/// Lowest LZ4 high-compression level
const LZ4_MIN_LEVEL: i32 = 1;

/// Highest LZ4 high-compression level
const LZ4_MAX_LEVEL: i32 = 12;

/// Length of the size prefix written in front of every LZ4 block
const LZ4_SIZE_PREFIX_LEN: usize = 4;

// =============================================================================
// LZ4 Codec
// =============================================================================

/// LZ4 block codec. Quality selects the high-compression level.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4FrameCodec;

impl Lz4FrameCodec {
    pub fn new() -> Self {
        Self
    }

    /// Map a 0..=100 quality onto LZ4's 1..=12 level range
    pub fn level_for_quality(quality: u8) -> i32 {
        let quality = i32::from(quality.min(100));
        LZ4_MIN_LEVEL + quality * (LZ4_MAX_LEVEL - LZ4_MIN_LEVEL) / 100
    }
}

impl FrameCodec for Lz4FrameCodec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode(&self, frame: &FrameBuffer, quality: u8, out: &mut Vec<u8>) -> Result<()> {
        let level = Self::level_for_quality(quality);
        let compressed = lz4::block::compress(
            frame.pixels(),
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: self.name().into(),
            reason: e.to_string(),
        })?;
        out.extend_from_slice(&compressed);
        Ok(())
    }

    fn decode(&self, data: &[u8], target: &mut FrameBuffer) -> Result<()> {
        let expected = target.pixels().len();
        // The block carries its decompressed length as a little-endian prefix.
        if let Some(prefix) = data.get(..LZ4_SIZE_PREFIX_LEN) {
            let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if declared != expected {
                return Err(Error::FrameSizeMismatch {
                    expected,
                    actual: declared,
                });
            }
        }

        let written = lz4::block::decompress_to_buffer(data, None, target.pixels_mut()).map_err(|e| {
            Error::DecompressionFailed {
                algorithm: self.name().into(),
                reason: e.to_string(),
            }
        })?;
        if written != expected {
            return Err(Error::FrameSizeMismatch {
                expected,
                actual: written,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Raw Codec
// =============================================================================

/// Stores pixels as-is
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFrameCodec;

impl FrameCodec for RawFrameCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, frame: &FrameBuffer, _quality: u8, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(frame.pixels());
        Ok(())
    }

    fn decode(&self, data: &[u8], target: &mut FrameBuffer) -> Result<()> {
        target.copy_from(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height);
        for (i, byte) in frame.pixels_mut().iter_mut().enumerate() {
            *byte = (i / 4 % 251) as u8;
        }
        frame
    }

    #[test]
    fn test_lz4_compresses_flat_frames() {
        let codec = Lz4FrameCodec::new();
        let mut frame = FrameBuffer::new(64, 64);
        frame.fill(0x10);

        let mut payload = Vec::new();
        codec.encode(&frame, 60, &mut payload).unwrap();
        assert!(payload.len() < frame.pixels().len() / 10);
    }

    #[test]
    fn test_lz4_encode_appends() {
        let codec = Lz4FrameCodec::new();
        let frame = gradient(8, 8);

        let mut payload = vec![0xAA, 0xBB];
        codec.encode(&frame, 100, &mut payload).unwrap();
        assert_eq!(&payload[..2], &[0xAA, 0xBB]);

        let mut decoded = FrameBuffer::new(8, 8);
        codec.decode(&payload[2..], &mut decoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_lz4_rejects_wrong_target_size() {
        let codec = Lz4FrameCodec::new();
        let mut payload = Vec::new();
        codec.encode(&gradient(8, 8), 60, &mut payload).unwrap();

        let mut wrong = FrameBuffer::new(4, 4);
        assert!(matches!(
            codec.decode(&payload, &mut wrong),
            Err(Error::FrameSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_lz4_decodes_into_dirty_target() {
        let codec = Lz4FrameCodec::new();
        let frame = gradient(8, 8);
        let mut payload = Vec::new();
        codec.encode(&frame, 60, &mut payload).unwrap();

        let mut target = FrameBuffer::new(8, 8);
        for _ in 0..3 {
            target.fill(0xEE);
            codec.decode(&payload, &mut target).unwrap();
            assert_eq!(target, frame);
        }
    }

    #[test]
    fn test_lz4_rejects_short_block() {
        let codec = Lz4FrameCodec::new();
        let mut payload = Vec::new();
        codec.encode(&gradient(2, 2), 60, &mut payload).unwrap();

        let mut larger = FrameBuffer::new(4, 4);
        assert!(matches!(
            codec.decode(&payload, &mut larger),
            Err(Error::FrameSizeMismatch {
                expected: 64,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let codec = Lz4FrameCodec::new();
        let mut target = FrameBuffer::new(4, 4);
        let result = codec.decode(&[64, 0, 0, 0, 0xFF, 0xFF, 0xFF], &mut target);
        assert!(result.is_err());
    }

    #[test]
    fn test_quality_level_mapping() {
        assert_eq!(Lz4FrameCodec::level_for_quality(0), 1);
        assert_eq!(Lz4FrameCodec::level_for_quality(100), 12);
        assert_eq!(Lz4FrameCodec::level_for_quality(255), 12);
        assert_eq!(Lz4FrameCodec::level_for_quality(60), 7);
    }

    #[test]
    fn test_raw_codec_is_identity() {
        let codec = RawFrameCodec;
        let frame = gradient(5, 3);

        let mut payload = Vec::new();
        codec.encode(&frame, 0, &mut payload).unwrap();
        assert_eq!(payload, frame.pixels());

        let mut decoded = FrameBuffer::new(5, 3);
        codec.decode(&payload, &mut decoded).unwrap();
        assert_eq!(decoded, frame);
    }
}
