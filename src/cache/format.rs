//! Cache File Format
//!
//! Pure encode/decode of the on-disk structures. All integers are big-endian.
//!
//! ```text
//! offset 0   finalized        u8 (0 | 1)
//! offset 1   index_offset     i32      meaningful only when finalized
//! offset 5   payloads ...     written back-to-back in completion order
//! index_offset:
//!            frame_count      i32      > 0
//!            frame_count × { offset: i32, size: i32 }   sorted by logical index
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{Error, Result};

/// Size of the fixed header (flag + index offset)
pub const HEADER_LEN: u64 = 5;

/// Size of one serialized index entry
pub const INDEX_ENTRY_LEN: usize = 8;

/// Size of the frame count preceding the index entries
pub const INDEX_COUNT_LEN: usize = 4;

/// Largest file offset the format can express
pub const MAX_FILE_OFFSET: u64 = i32::MAX as u64;

// =============================================================================
// Header
// =============================================================================

/// Fixed header at the start of every cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheHeader {
    /// True once the index table has been written
    pub finalized: bool,
    /// Byte offset of the index table
    pub index_offset: u32,
}

impl CacheHeader {
    /// Header written before any payload so the file reads as unfinished
    pub const PLACEHOLDER: CacheHeader = CacheHeader {
        finalized: false,
        index_offset: 0,
    };

    /// Header for a completed file
    pub fn finalized(index_offset: u32) -> Self {
        Self {
            finalized: true,
            index_offset,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[0] = u8::from(self.finalized);
        out[1..].copy_from_slice(&(self.index_offset as i32).to_be_bytes());
        out
    }

    pub fn decode(raw: &[u8; HEADER_LEN as usize]) -> Result<Self> {
        let mut buf = &raw[..];
        let finalized = buf.get_u8() != 0;
        let index_offset = buf.get_i32();
        if index_offset < 0 {
            return Err(Error::InvalidOffset(index_offset));
        }
        Ok(Self {
            finalized,
            index_offset: index_offset as u32,
        })
    }

    /// Read the header from the current position of `reader`
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut raw)?;
        Self::decode(&raw)
    }
}

// =============================================================================
// Frame Index
// =============================================================================

/// Location of one frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameIndexEntry {
    /// Logical frame index (pull order from the source)
    pub index: u32,
    /// Byte offset of the payload
    pub offset: u32,
    /// Payload length in bytes
    pub size: u32,
}

impl FrameIndexEntry {
    pub fn new(index: u32, offset: u32, size: u32) -> Self {
        Self {
            index,
            offset,
            size,
        }
    }

    /// Offset one past the payload's last byte
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }
}

/// Serialize an index table. Entries must already be in logical order.
pub fn encode_index(entries: &[FrameIndexEntry]) -> Bytes {
    let mut buf = BytesMut::with_capacity(INDEX_COUNT_LEN + entries.len() * INDEX_ENTRY_LEN);
    buf.put_i32(entries.len() as i32);
    for entry in entries {
        buf.put_i32(entry.offset as i32);
        buf.put_i32(entry.size as i32);
    }
    buf.freeze()
}

/// Parse `count × {offset, size}` pairs. The logical index is the position.
pub fn decode_entries(mut data: &[u8], count: usize) -> Result<Vec<FrameIndexEntry>> {
    if data.len() < count * INDEX_ENTRY_LEN {
        return Err(Error::corrupt(format!(
            "index table truncated: {} bytes for {} entries",
            data.len(),
            count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let offset = data.get_i32();
        let size = data.get_i32();
        if offset < 0 {
            return Err(Error::InvalidOffset(offset));
        }
        if size < 0 {
            return Err(Error::InvalidOffset(size));
        }
        entries.push(FrameIndexEntry::new(i as u32, offset as u32, size as u32));
    }
    Ok(entries)
}

/// Seek to the header's index table and read only the frame count.
///
/// Leaves `reader` positioned at the first index entry.
pub fn read_frame_count<R: Read + Seek>(reader: &mut R, header: &CacheHeader) -> Result<u32> {
    if !header.finalized {
        return Err(Error::corrupt("cache file is not finalized"));
    }
    if u64::from(header.index_offset) < HEADER_LEN {
        return Err(Error::corrupt(format!(
            "index offset {} overlaps the header",
            header.index_offset
        )));
    }

    reader.seek(SeekFrom::Start(u64::from(header.index_offset)))?;
    let mut raw_count = [0u8; INDEX_COUNT_LEN];
    reader.read_exact(&mut raw_count)?;
    let count = i32::from_be_bytes(raw_count);
    if count <= 0 {
        return Err(Error::InvalidFrameCount(count));
    }
    Ok(count as u32)
}

/// Seek to the header's index table and parse it.
///
/// The count is checked against the bytes actually left in the file before
/// anything is allocated.
pub fn read_index<R: Read + Seek>(reader: &mut R, header: &CacheHeader) -> Result<Vec<FrameIndexEntry>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let count = read_frame_count(reader, header)?;

    let table_len = u64::from(count) * INDEX_ENTRY_LEN as u64;
    let available = file_len.saturating_sub(u64::from(header.index_offset) + INDEX_COUNT_LEN as u64);
    if table_len > available {
        return Err(Error::corrupt(format!(
            "index table claims {} entries but only {} bytes remain",
            count, available
        )));
    }

    let mut raw = vec![0u8; table_len as usize];
    reader.read_exact(&mut raw)?;
    decode_entries(&raw, count as usize)
}

/// Read and check the header plus index of the file at `path`.
///
/// Succeeds only for a finalized file with at least one frame.
pub fn validate(path: &Path) -> Result<(CacheHeader, Vec<FrameIndexEntry>)> {
    let mut file = File::open(path)?;
    let header = CacheHeader::read_from(&mut file)?;
    let index = read_index(&mut file, &header)?;
    Ok((header, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn build_file(payloads: &[&[u8]]) -> Vec<u8> {
        let mut file = CacheHeader::PLACEHOLDER.encode().to_vec();
        let mut entries = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            entries.push(FrameIndexEntry::new(
                i as u32,
                file.len() as u32,
                payload.len() as u32,
            ));
            file.extend_from_slice(payload);
        }
        let index_offset = file.len() as u32;
        file.extend_from_slice(&encode_index(&entries));
        file[..5].copy_from_slice(&CacheHeader::finalized(index_offset).encode());
        file
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let header = CacheHeader::finalized(0x0102_0304);
        assert_eq!(header.encode(), [1, 1, 2, 3, 4]);
        assert_eq!(CacheHeader::PLACEHOLDER.encode(), [0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_header_rejects_negative_offset() {
        let raw = [1, 0xFF, 0xFF, 0xFF, 0xFE];
        assert_matches!(CacheHeader::decode(&raw), Err(Error::InvalidOffset(-2)));
    }

    #[test]
    fn test_index_layout() {
        let entries = [FrameIndexEntry::new(0, 5, 3), FrameIndexEntry::new(1, 8, 2)];
        let bytes = encode_index(&entries);
        assert_eq!(
            bytes.as_ref(),
            &[0, 0, 0, 2, 0, 0, 0, 5, 0, 0, 0, 3, 0, 0, 0, 8, 0, 0, 0, 2]
        );
    }

    #[test]
    fn test_read_index_from_file() {
        let raw = build_file(&[b"abc", b"de", b"f"]);
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        assert!(header.finalized);
        assert_eq!(header.index_offset, 11);

        let index = read_index(&mut cursor, &header).unwrap();
        assert_eq!(
            index,
            vec![
                FrameIndexEntry::new(0, 5, 3),
                FrameIndexEntry::new(1, 8, 2),
                FrameIndexEntry::new(2, 10, 1),
            ]
        );
    }

    #[test]
    fn test_read_frame_count_only() {
        let raw = build_file(&[b"abc", b"de"]);
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        assert_eq!(read_frame_count(&mut cursor, &header).unwrap(), 2);
        assert_eq!(cursor.position(), u64::from(header.index_offset) + 4);
    }

    #[test]
    fn test_zero_frame_count_is_invalid() {
        let mut raw = CacheHeader::finalized(5).encode().to_vec();
        raw.extend_from_slice(&0i32.to_be_bytes());
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        assert_matches!(
            read_index(&mut cursor, &header),
            Err(Error::InvalidFrameCount(0))
        );
    }

    #[test]
    fn test_unfinalized_file_is_rejected() {
        let mut raw = build_file(&[b"abc"]);
        raw[0] = 0;
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        assert_matches!(
            read_index(&mut cursor, &header),
            Err(Error::CorruptCache { .. })
        );
    }

    #[test]
    fn test_truncated_index_is_rejected() {
        let mut raw = build_file(&[b"abc", b"de"]);
        raw.truncate(raw.len() - 3);
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        assert_matches!(
            read_index(&mut cursor, &header),
            Err(Error::CorruptCache { .. })
        );
    }

    #[test]
    fn test_huge_count_does_not_allocate() {
        let mut raw = CacheHeader::finalized(5).encode().to_vec();
        raw.extend_from_slice(&i32::MAX.to_be_bytes());
        let mut cursor = Cursor::new(raw);
        let header = CacheHeader::read_from(&mut cursor).unwrap();
        assert_matches!(
            read_index(&mut cursor, &header),
            Err(Error::CorruptCache { .. })
        );
    }
}
