//! Animation Source Collaborator
//!
//! A [`FrameSource`] produces raw frames sequentially. The encoder pulls from
//! it on a single thread; implementations never see concurrent calls.

use crate::codec::FrameBuffer;

/// Producer of decoded frames for a cache build.
pub trait FrameSource {
    /// Called once before the first `next_frame` of a build
    fn prepare_for_generate_cache(&mut self) {}

    /// Decode the next frame into `target`. Returns false when exhausted.
    fn next_frame(&mut self, target: &mut FrameBuffer) -> bool;

    /// Called exactly once when a build ends, whatever the outcome
    fn release_for_generate_cache(&mut self) {}

    /// Fallback frame for degraded playback
    fn first_frame(&mut self, _target: &mut FrameBuffer) -> bool {
        false
    }
}

// =============================================================================
// Synthetic Source
// =============================================================================

/// Deterministic test-pattern source, finite or endless.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    frames: Option<usize>,
    position: usize,
    prepared: bool,
}

impl SyntheticSource {
    /// Source yielding exactly `frames` frames
    pub fn finite(frames: usize) -> Self {
        Self {
            frames: Some(frames),
            position: 0,
            prepared: false,
        }
    }

    /// Source that never runs out
    pub fn endless() -> Self {
        Self {
            frames: None,
            position: 0,
            prepared: false,
        }
    }

    /// Frames produced so far
    pub fn produced(&self) -> usize {
        self.position
    }

    /// True between `prepare_for_generate_cache` and `release_for_generate_cache`
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Fill `target` with the pattern for frame `index`
    pub fn paint(index: usize, target: &mut FrameBuffer) {
        let width = target.width() as usize;
        let shift = index as u32;
        for (i, px) in target.pixels_mut().chunks_exact_mut(4).enumerate() {
            let x = (i % width.max(1)) as u32;
            let y = (i / width.max(1)) as u32;
            px[0] = x.wrapping_add(shift) as u8;
            px[1] = y.wrapping_add(shift.wrapping_mul(3)) as u8;
            px[2] = (index % 256) as u8;
            px[3] = 0xFF;
        }
    }

    /// Build the expected frame `index` at the given size
    pub fn pattern(index: usize, width: u32, height: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height);
        Self::paint(index, &mut frame);
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn prepare_for_generate_cache(&mut self) {
        self.prepared = true;
    }

    fn next_frame(&mut self, target: &mut FrameBuffer) -> bool {
        if self.frames.is_some_and(|limit| self.position >= limit) {
            return false;
        }
        Self::paint(self.position, target);
        self.position += 1;
        true
    }

    fn release_for_generate_cache(&mut self) {
        self.prepared = false;
    }

    fn first_frame(&mut self, target: &mut FrameBuffer) -> bool {
        Self::paint(0, target);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_source_stops() {
        let mut source = SyntheticSource::finite(2);
        let mut frame = FrameBuffer::new(4, 4);

        assert!(source.next_frame(&mut frame));
        assert!(source.next_frame(&mut frame));
        assert!(!source.next_frame(&mut frame));
        assert_eq!(source.produced(), 2);

        source.prepare_for_generate_cache();
        assert!(source.is_prepared());
        source.release_for_generate_cache();
        assert!(!source.is_prepared());
    }

    #[test]
    fn test_frames_are_distinct() {
        let a = SyntheticSource::pattern(0, 8, 8);
        let b = SyntheticSource::pattern(1, 8, 8);
        assert_ne!(a, b);

        let mut source = SyntheticSource::endless();
        let mut frame = FrameBuffer::new(8, 8);
        source.next_frame(&mut frame);
        assert_eq!(frame, a);
    }

    #[test]
    fn test_first_frame_matches_pattern() {
        let mut source = SyntheticSource::finite(0);
        let mut frame = FrameBuffer::new(3, 3);
        assert!(source.first_frame(&mut frame));
        assert_eq!(frame, SyntheticSource::pattern(0, 3, 3));
    }
}
