//! Property-Based Tests for the Cache Format and Pipeline
//!
//! # Test Properties
//!
//! 1. **Index Layout**: a serialized index parses back positionally
//! 2. **Truncation**: any cut into the index table is rejected
//! 3. **Header Fuzz**: arbitrary header bytes never panic the reader
//! 4. **Logical Order**: built files list frames in pull order for any slot count

#![cfg(test)]

use std::io::Cursor;
use std::sync::Arc;

use proptest::prelude::*;

use super::config::RuntimeConfig;
use super::encoder::{BuildOutcome, FrameEncoder};
use super::format::{self, encode_index, read_index, CacheHeader, FrameIndexEntry};
use super::runtime::CacheRuntime;
use crate::codec::RawFrameCodec;
use crate::source::SyntheticSource;

// =============================================================================
// Property Strategies
// =============================================================================

/// Payload sizes for 1..40 frames
fn payload_sizes_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..512, 1..40)
}

/// Lay payloads out back-to-back after the header and finalize
fn file_with_sizes(sizes: &[u32]) -> (Vec<u8>, Vec<FrameIndexEntry>) {
    let mut raw = CacheHeader::PLACEHOLDER.encode().to_vec();
    let mut entries = Vec::with_capacity(sizes.len());
    for (i, size) in sizes.iter().enumerate() {
        entries.push(FrameIndexEntry::new(i as u32, raw.len() as u32, *size));
        raw.extend(std::iter::repeat(i as u8).take(*size as usize));
    }
    let index_offset = raw.len() as u32;
    raw.extend_from_slice(&encode_index(&entries));
    raw[..5].copy_from_slice(&CacheHeader::finalized(index_offset).encode());
    (raw, entries)
}

// =============================================================================
// Format Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_index_reads_back(sizes in payload_sizes_strategy()) {
        let (raw, entries) = file_with_sizes(&sizes);
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        let index = read_index(&mut cursor, &header).unwrap();
        prop_assert_eq!(index, entries);
    }

    #[test]
    fn prop_offsets_grow_in_write_order(sizes in payload_sizes_strategy()) {
        let (_, entries) = file_with_sizes(&sizes);
        for pair in entries.windows(2) {
            prop_assert!(pair[0].end() <= u64::from(pair[1].offset));
        }
    }

    #[test]
    fn prop_truncated_index_rejected(sizes in payload_sizes_strategy(), cut in 1usize..8) {
        let (mut raw, _) = file_with_sizes(&sizes);
        raw.truncate(raw.len() - cut);
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        prop_assert!(read_index(&mut cursor, &header).is_err());
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(raw in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut cursor = Cursor::new(raw);
        if let Ok(header) = CacheHeader::read_from(&mut cursor) {
            let _ = read_index(&mut cursor, &header);
        }
    }
}

// =============================================================================
// Pipeline Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_build_preserves_logical_order(frames in 1usize..30, slots in 1usize..=8) {
        let runtime = CacheRuntime::new(RuntimeConfig {
            encode_slots: Some(slots),
            ..Default::default()
        })
        .unwrap();
        let dir = std::env::temp_dir().join(format!("animcache-prop-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("prop.pcache2");

        let encoder = FrameEncoder::new(&path, 3, 2, Arc::new(RawFrameCodec), &runtime);
        let outcome = encoder.build(&mut SyntheticSource::finite(frames)).unwrap();
        prop_assert_eq!(outcome, BuildOutcome::Generated { frames: frames as u32 });

        let (_, index) = format::validate(&path).unwrap();
        let raw = std::fs::read(&path).unwrap();
        for (i, entry) in index.iter().enumerate() {
            let start = entry.offset as usize;
            let payload = &raw[start..start + entry.size as usize];
            let expected = SyntheticSource::pattern(i, 3, 2);
            prop_assert_eq!(payload, expected.pixels());
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
