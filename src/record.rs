//! Record manager (`spec.md` §4.1): placement, reuse, and framing of
//! variable-length records.

use std::collections::{BTreeMap, VecDeque};

use crate::braf::RandomAccessStore;
use crate::checksum::crc32c;
use crate::error::{GvrsError, GvrsResult};

/// Size, in bytes, of the fixed record header (`u32` size + `i32` kind).
pub const RECORD_HEADER_SIZE: u64 = 8;
/// Size, in bytes, of the CRC-32C trailer when checksums are enabled.
pub const RECORD_TRAILER_SIZE: u64 = 4;
/// Smallest legal record, per `spec.md` §4.1's read-path validation.
pub const MIN_RECORD_SIZE: u64 = 16;
/// A freed block smaller than this (over the requested size) is absorbed
/// into the allocation rather than split off as its own free record.
pub const MIN_FREE_BLOCK_SIZE: u64 = 16;

/// `recordKind` value for a free record.
pub const KIND_FREE: i32 = -1;
/// `recordKind` value for a metadata record (directory or user metadata).
pub const KIND_METADATA: i32 = -2;
/// `recordKind` value for a reserved filespace record.
pub const KIND_FILESPACE: i32 = -3;

fn round_up_8(n: u64) -> u64 {
    (n + 7) & !7
}

/// One record read off disk: its kind and payload bytes (trailer stripped).
pub struct RecordData {
    pub offset: u64,
    pub size: u64,
    pub kind: i32,
    pub payload: Vec<u8>,
}

/// Tracks free and allocated space and places new records, per `spec.md`
/// §4.1. The free-space index is rebuilt in memory from a scan of the
/// record stream at open time (see `SPEC_FULL.md` §3); nothing about it is
/// persisted on disk beyond the free records themselves.
pub struct RecordManager {
    checksums_enabled: bool,
    header_size: u64,
    /// offset -> size, for locating adjacency during coalescing.
    free_by_offset: BTreeMap<u64, u64>,
    /// size -> offsets, for best-fit lookup. Ties broken by offset (the
    /// smallest offset in the deque is used first).
    free_by_size: BTreeMap<u64, VecDeque<u64>>,
}

impl RecordManager {
    #[must_use]
    pub fn new(checksums_enabled: bool, header_size: u64) -> Self {
        Self {
            checksums_enabled,
            header_size,
            free_by_offset: BTreeMap::new(),
            free_by_size: BTreeMap::new(),
        }
    }

    fn trailer_size(&self) -> u64 {
        if self.checksums_enabled {
            RECORD_TRAILER_SIZE
        } else {
            0
        }
    }

    /// Rebuilds the free-space index by scanning every record from just
    /// after the header to end of file.
    pub fn restore(
        store: &mut impl RandomAccessStore,
        checksums_enabled: bool,
        header_size: u64,
    ) -> GvrsResult<Self> {
        let mut manager = Self::new(checksums_enabled, header_size);
        let file_size = store.size()? as u64;
        let mut pos = header_size;
        while pos < file_size {
            store.seek_to(pos as i64)?;
            let size = store.read_u32()?;
            let kind = store.read_i32()?;
            if size == 0 {
                return Err(GvrsError::corrupt(
                    pos,
                    "recordSize is 0 before end of file",
                ));
            }
            let size = u64::from(size);
            if size < MIN_RECORD_SIZE || size % 8 != 0 || pos + size > file_size {
                return Err(GvrsError::corrupt(pos, "record framing invalid"));
            }
            if kind == KIND_FREE {
                manager.insert_free(pos, size);
            }
            pos += size;
        }
        Ok(manager)
    }

    fn insert_free(&mut self, offset: u64, size: u64) {
        self.free_by_offset.insert(offset, size);
        self.free_by_size.entry(size).or_default().push_back(offset);
    }

    fn remove_free(&mut self, offset: u64, size: u64) {
        self.free_by_offset.remove(&offset);
        if let Some(deque) = self.free_by_size.get_mut(&size) {
            if let Some(pos) = deque.iter().position(|&o| o == offset) {
                deque.remove(pos);
            }
            if deque.is_empty() {
                self.free_by_size.remove(&size);
            }
        }
    }

    /// Best-fit search: the smallest free block with `size >= needed`.
    fn best_fit(&self, needed: u64) -> Option<(u64, u64)> {
        self.free_by_size
            .range(needed..)
            .next()
            .map(|(&size, offsets)| (offsets[0], size))
    }

    /// Allocates a block of at least `needed` bytes, returning `(offset,
    /// block_size)`. Splits an oversize free block when the remainder would
    /// be at least [`MIN_FREE_BLOCK_SIZE`]; otherwise the whole block (and
    /// its slack) is handed to the caller.
    fn allocate(&mut self, store: &mut impl RandomAccessStore, needed: u64) -> GvrsResult<(u64, u64)> {
        if let Some((offset, size)) = self.best_fit(needed) {
            self.remove_free(offset, size);
            let remainder = size - needed;
            if remainder >= MIN_FREE_BLOCK_SIZE {
                self.write_free_record(store, offset + needed, remainder)?;
                self.insert_free(offset + needed, remainder);
                return Ok((offset, needed));
            }
            return Ok((offset, size));
        }
        let file_size = store.size()? as u64;
        Ok((file_size, needed))
    }

    fn write_free_record(&self, store: &mut impl RandomAccessStore, offset: u64, size: u64) -> GvrsResult<()> {
        let payload_len = size - RECORD_HEADER_SIZE - self.trailer_size();
        let mut buf = Vec::with_capacity(size as usize);
        buf.extend_from_slice(&u32::try_from(size).unwrap_or(u32::MAX).to_le_bytes());
        buf.extend_from_slice(&KIND_FREE.to_le_bytes());
        buf.resize(buf.len() + payload_len as usize, 0);
        if self.checksums_enabled {
            let crc = crc32c(&buf);
            buf.extend_from_slice(&crc.to_le_bytes());
        }
        store.seek_to(offset as i64)?;
        store.write_all_bytes(&buf)
    }

    /// Writes a new record holding `payload`, returning its offset.
    pub fn write_record(
        &mut self,
        store: &mut impl RandomAccessStore,
        kind: i32,
        payload: &[u8],
    ) -> GvrsResult<u64> {
        let trailer = self.trailer_size();
        let needed = round_up_8(RECORD_HEADER_SIZE + payload.len() as u64 + trailer);
        let (offset, block_size) = self.allocate(store, needed)?;

        let mut buf = Vec::with_capacity(block_size as usize);
        buf.extend_from_slice(&u32::try_from(block_size).map_err(|_| {
            GvrsError::InvalidSpec("record exceeds 4 GiB".into())
        })?.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(payload);
        let pad_len = block_size - RECORD_HEADER_SIZE - trailer - payload.len() as u64;
        buf.resize(buf.len() + pad_len as usize, 0);
        if self.checksums_enabled {
            let crc = crc32c(&buf);
            buf.extend_from_slice(&crc.to_le_bytes());
        }
        debug_assert_eq!(buf.len() as u64, block_size);

        store.seek_to(offset as i64)?;
        store.write_all_bytes(&buf)?;
        log::trace!("wrote record kind={kind} at offset={offset} size={block_size}");
        Ok(offset)
    }

    /// Frees the record at `old_offset`, then writes a fresh record for
    /// `payload` (possibly reusing the just-freed space, possibly at a new
    /// offset), per `spec.md` §4.1's rewrite semantics.
    pub fn rewrite_record(
        &mut self,
        store: &mut impl RandomAccessStore,
        old_offset: u64,
        kind: i32,
        payload: &[u8],
    ) -> GvrsResult<u64> {
        self.free_record(store, old_offset)?;
        self.write_record(store, kind, payload)
    }

    /// Marks the record at `offset` as free, coalescing with immediately
    /// adjacent free records on either side.
    pub fn free_record(&mut self, store: &mut impl RandomAccessStore, offset: u64) -> GvrsResult<()> {
        store.seek_to(offset as i64)?;
        let size = u64::from(store.read_u32()?);

        let mut merged_offset = offset;
        let mut merged_size = size;

        if let Some((&prev_offset, &prev_size)) = self
            .free_by_offset
            .range(..offset)
            .next_back()
            .filter(|&(&o, &s)| o + s == offset)
        {
            self.remove_free(prev_offset, prev_size);
            merged_offset = prev_offset;
            merged_size += prev_size;
        }

        if let Some(&next_size) = self.free_by_offset.get(&(merged_offset + merged_size)) {
            self.remove_free(merged_offset + merged_size, next_size);
            merged_size += next_size;
        }

        self.write_free_record(store, merged_offset, merged_size)?;
        self.insert_free(merged_offset, merged_size);
        Ok(())
    }

    /// Reads the record at `offset`, validating framing and (if enabled)
    /// its checksum.
    pub fn read_record(&self, store: &mut impl RandomAccessStore, offset: u64) -> GvrsResult<RecordData> {
        let file_size = store.size()? as u64;
        store.seek_to(offset as i64)?;
        let size = store.read_u32()?;
        let kind = store.read_i32()?;
        if size == 0 {
            return Err(GvrsError::corrupt(offset, "recordSize is 0"));
        }
        let size = u64::from(size);
        if size < MIN_RECORD_SIZE || size % 8 != 0 || offset + size > file_size {
            return Err(GvrsError::corrupt(offset, "record framing invalid"));
        }

        let trailer = self.trailer_size();
        let payload_len = size - RECORD_HEADER_SIZE - trailer;
        let mut payload = vec![0u8; payload_len as usize];
        store.read_exact_bytes(&mut payload)?;

        if self.checksums_enabled {
            let stored_crc = store.read_u32()?;
            store.seek_to(offset as i64)?;
            let mut covered = vec![0u8; (size - RECORD_TRAILER_SIZE) as usize];
            store.read_exact_bytes(&mut covered)?;
            let computed = crc32c(&covered);
            if computed != stored_crc {
                return Err(GvrsError::corrupt(offset, "CRC-32C mismatch"));
            }
        }

        Ok(RecordData {
            offset,
            size,
            kind,
            payload,
        })
    }

    /// Sum of free-block sizes currently tracked, for the invariant check
    /// in `spec.md` §8 (property 4).
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_by_offset.values().sum()
    }

    #[must_use]
    pub fn header_size(&self) -> u64 {
        self.header_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::braf::BufferedRandomAccessFile;
    use std::io::Cursor;

    fn new_store() -> BufferedRandomAccessFile<Cursor<Vec<u8>>> {
        BufferedRandomAccessFile::new(Cursor::new(vec![0u8; 32]))
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut store = new_store();
        let mut mgr = RecordManager::new(true, 32);
        let offset = mgr.write_record(&mut store, 5, b"hello world").unwrap();
        let record = mgr.read_record(&mut store, offset).unwrap();
        assert_eq!(record.kind, 5);
        assert_eq!(&record.payload, b"hello world");
    }

    #[test]
    fn rewrite_reuses_freed_space_when_same_size() {
        let mut store = new_store();
        let mut mgr = RecordManager::new(false, 32);
        let offset1 = mgr.write_record(&mut store, 1, b"0123456789ab").unwrap();
        let offset2 = mgr.rewrite_record(&mut store, offset1, 1, b"ZYXWVUTSRQPO").unwrap();
        assert_eq!(offset1, offset2, "same-size rewrite should reuse the freed block");
        let record = mgr.read_record(&mut store, offset2).unwrap();
        assert_eq!(&record.payload, b"ZYXWVUTSRQPO");
    }

    #[test]
    fn checksum_mismatch_is_corrupt_record() {
        let mut store = new_store();
        let mut mgr = RecordManager::new(true, 32);
        let offset = mgr.write_record(&mut store, 1, b"payload-bytes").unwrap();

        // Flip a byte inside the payload.
        store.seek_to(offset as i64 + 10).unwrap();
        let b = store.read_u8().unwrap();
        store.seek_to(offset as i64 + 10).unwrap();
        store.write_u8(b ^ 0xFF).unwrap();

        let err = mgr.read_record(&mut store, offset).unwrap_err();
        assert!(matches!(err, GvrsError::CorruptRecord { .. }));
    }

    #[test]
    fn free_then_allocate_coalesces_adjacent_blocks() {
        let mut store = new_store();
        let mut mgr = RecordManager::new(false, 32);
        let o1 = mgr.write_record(&mut store, 1, &[0u8; 8]).unwrap();
        let o2 = mgr.write_record(&mut store, 2, &[0u8; 8]).unwrap();
        mgr.free_record(&mut store, o1).unwrap();
        mgr.free_record(&mut store, o2).unwrap();
        // Exactly one merged free block should now exist, not two.
        assert_eq!(mgr.free_by_offset.len(), 1);
    }

    #[test]
    fn restore_rebuilds_free_list_from_scan() {
        let mut store = new_store();
        let mut mgr = RecordManager::new(false, 32);
        let offset = mgr.write_record(&mut store, 1, &[0u8; 16]).unwrap();
        mgr.free_record(&mut store, offset).unwrap();

        let restored = RecordManager::restore(&mut store, false, 32).unwrap();
        assert_eq!(restored.free_bytes(), mgr.free_bytes());
    }
}
