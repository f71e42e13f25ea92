//! Tile directory: maps tile index → file offset (`spec.md` §3 "Directory",
//! §4.2).
//!
//! Two on-disk variants exist, compact (32-bit words, offset ÷ 8) and
//! extended (64-bit offsets), selected at close time by whether every
//! nonzero offset fits the compact encoding.

use crate::braf::RandomAccessStore;
use crate::error::{GvrsError, GvrsResult};

/// The largest file offset a compact directory can address: `2^31 * 8`.
const COMPACT_MAX_OFFSET: u64 = (1u64 << 31) * 8;

/// A tile index → file offset map, covering a growing rectangular window of
/// populated tiles.
pub struct TileDirectory {
    n_rows_of_tiles: u32,
    n_cols_of_tiles: u32,
    /// `offset >> 3` per tile index, 0 meaning "not populated". Kept as
    /// `u64` in memory regardless of on-disk variant; the variant only
    /// affects serialization.
    offsets: Vec<u64>,
    row0: u32,
    row1: u32,
    col0: u32,
    col1: u32,
    any_populated: bool,
}

/// Which word width was used the last time this directory was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryVariant {
    Compact,
    Extended,
}

impl TileDirectory {
    #[must_use]
    pub fn new(n_rows_of_tiles: u32, n_cols_of_tiles: u32) -> Self {
        let n = (n_rows_of_tiles as usize) * (n_cols_of_tiles as usize);
        Self {
            n_rows_of_tiles,
            n_cols_of_tiles,
            offsets: vec![0; n],
            row0: 0,
            row1: 0,
            col0: 0,
            col1: 0,
            any_populated: false,
        }
    }

    fn grow_bounds(&mut self, tile_row: u32, tile_col: u32) {
        if !self.any_populated {
            self.row0 = tile_row;
            self.row1 = tile_row;
            self.col0 = tile_col;
            self.col1 = tile_col;
            self.any_populated = true;
        } else {
            self.row0 = self.row0.min(tile_row);
            self.row1 = self.row1.max(tile_row);
            self.col0 = self.col0.min(tile_col);
            self.col1 = self.col1.max(tile_col);
        }
    }

    /// Records that `tile_index`'s record now lives at `offset` (which must
    /// be 8-byte aligned).
    pub fn set(&mut self, tile_index: u32, offset: u64) {
        let tile_row = tile_index / self.n_cols_of_tiles;
        let tile_col = tile_index % self.n_cols_of_tiles;
        self.grow_bounds(tile_row, tile_col);
        self.offsets[tile_index as usize] = offset / 8;
    }

    /// Returns the stored offset for `tile_index`, or 0 if unpopulated.
    #[must_use]
    pub fn get(&self, tile_index: u32) -> u64 {
        self.offsets
            .get(tile_index as usize)
            .map_or(0, |w| w * 8)
    }

    #[must_use]
    pub fn has(&self, tile_index: u32) -> bool {
        self.get(tile_index) != 0
    }

    /// Clears a tile's entry (used when an all-fill tile is evicted and its
    /// record freed rather than rewritten).
    pub fn clear(&mut self, tile_index: u32) {
        if let Some(w) = self.offsets.get_mut(tile_index as usize) {
            *w = 0;
        }
    }

    #[must_use]
    pub fn populated_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        self.any_populated.then_some((self.row0, self.row1, self.col0, self.col1))
    }

    #[must_use]
    pub fn n_cols_of_tiles(&self) -> u32 {
        self.n_cols_of_tiles
    }

    fn required_variant(&self) -> DirectoryVariant {
        if self.offsets.iter().all(|&w| w * 8 <= COMPACT_MAX_OFFSET) {
            DirectoryVariant::Compact
        } else {
            DirectoryVariant::Extended
        }
    }

    /// Serializes the directory's populated window to `out`, choosing the
    /// variant automatically. Returns the variant used.
    pub fn persist(&self, out: &mut impl RandomAccessStore) -> GvrsResult<DirectoryVariant> {
        let variant = self.required_variant();
        let (row0, row1, col0, col1) = self.populated_bounds().unwrap_or((0, 0, 0, 0));
        out.write_u8(match variant {
            DirectoryVariant::Compact => 0,
            DirectoryVariant::Extended => 1,
        })?;
        out.write_u32(row0)?;
        out.write_u32(row1)?;
        out.write_u32(col0)?;
        out.write_u32(col1)?;
        out.write_u32(self.n_rows_of_tiles)?;
        out.write_u32(self.n_cols_of_tiles)?;
        for tile_row in row0..=row1 {
            for tile_col in col0..=col1 {
                let idx = tile_row * self.n_cols_of_tiles + tile_col;
                let word = self.offsets[idx as usize];
                match variant {
                    DirectoryVariant::Compact => {
                        let w = u32::try_from(word).map_err(|_| {
                            GvrsError::InvalidSpec("directory offset overflowed compact word".into())
                        })?;
                        out.write_u32(w)?;
                    }
                    DirectoryVariant::Extended => out.write_i64(word as i64)?,
                }
            }
        }
        Ok(variant)
    }

    /// Reconstructs a directory previously written by [`Self::persist`].
    pub fn restore(input: &mut impl RandomAccessStore) -> GvrsResult<Self> {
        let variant_tag = input.read_u8()?;
        let variant = match variant_tag {
            0 => DirectoryVariant::Compact,
            1 => DirectoryVariant::Extended,
            other => {
                return Err(GvrsError::corrupt(0, format!("unknown directory variant {other}")))
            }
        };
        let row0 = input.read_u32()?;
        let row1 = input.read_u32()?;
        let col0 = input.read_u32()?;
        let col1 = input.read_u32()?;
        let n_rows_of_tiles = input.read_u32()?;
        let n_cols_of_tiles = input.read_u32()?;
        let mut dir = Self::new(n_rows_of_tiles, n_cols_of_tiles);
        if row1 >= row0 && col1 >= col0 {
            for tile_row in row0..=row1 {
                for tile_col in col0..=col1 {
                    let offset = match variant {
                        DirectoryVariant::Compact => u64::from(input.read_u32()?) * 8,
                        DirectoryVariant::Extended => (input.read_i64()? as u64) * 8,
                    };
                    if offset != 0 {
                        let idx = tile_row * n_cols_of_tiles + tile_col;
                        dir.set(idx, offset);
                    }
                }
            }
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::braf::BufferedRandomAccessFile;

    #[test]
    fn set_get_round_trip() {
        let mut dir = TileDirectory::new(10, 10);
        assert!(!dir.has(55));
        dir.set(55, 800);
        assert_eq!(dir.get(55), 800);
        assert!(dir.has(55));
    }

    #[test]
    fn persist_restore_round_trip() {
        let mut dir = TileDirectory::new(4, 4);
        dir.set(0, 64);
        dir.set(5, 128);
        dir.set(15, 4096);

        let mut store = BufferedRandomAccessFile::new(Cursor::new(Vec::<u8>::new()));
        let variant = dir.persist(&mut store).unwrap();
        assert_eq!(variant, DirectoryVariant::Compact);

        store.seek_to(0).unwrap();
        let restored = TileDirectory::restore(&mut store).unwrap();
        assert_eq!(restored.get(0), 64);
        assert_eq!(restored.get(5), 128);
        assert_eq!(restored.get(15), 4096);
        assert!(!restored.has(1));
    }

    #[test]
    fn chooses_extended_when_offset_exceeds_compact_range() {
        let mut dir = TileDirectory::new(1, 2);
        dir.set(0, 64);
        dir.set(1, COMPACT_MAX_OFFSET + 8);
        assert_eq!(dir.required_variant(), DirectoryVariant::Extended);
    }
}
