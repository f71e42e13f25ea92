//! `GvrsFile`: the open file handle tying header, directory, record
//! manager, tile cache, and codec registry together (`spec.md` §4, §5).
//!
//! Lifecycle is `Closed -> Open(ReadOnly | ReadWrite) -> Closing -> Closed`.
//! `Closed` and `Closing` are not represented as runtime states: opening
//! produces a live `GvrsFile`, and `close` consumes it by value, so the
//! type system (not a flag) prevents any further use of a closed handle.
//! `Closing` is simply the interval during which `close` runs its flush.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::accessor::ElementAccessor;
use crate::assistant::BackgroundDecompressor;
use crate::braf::{BufferedRandomAccessFile, RandomAccessStore};
use crate::cache::{CacheSize, TileCache};
use crate::codec::{CodecMaster, TileDecoder, TileEncoder};
use crate::directory::TileDirectory;
use crate::element::ElementSpec;
use crate::error::{GvrsError, GvrsResult};
use crate::header::{CodecRecord, FileHeader};
use crate::record::{RecordManager, KIND_METADATA};
use crate::spec::GvrsFileSpecification;
use crate::tile::Tile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// An open GVRS file. Reads and writes go through named [`ElementAccessor`]
/// handles; this type owns the I/O plumbing they share.
pub struct GvrsFile {
    store: BufferedRandomAccessFile<File>,
    header: FileHeader,
    directory: TileDirectory,
    records: RecordManager,
    cache: TileCache,
    /// Shared with the background assistant's decode jobs (`spec.md` §5):
    /// codecs are registered once at open and never mutated afterward, so
    /// concurrent `&CodecMaster` access from the assistant thread and this
    /// one is data-race-free without any hand-off protocol.
    codecs: Arc<CodecMaster>,
    /// Off-thread decoder (`spec.md` §4.7). Used for opportunistic
    /// read-ahead; the application thread still decodes synchronously on a
    /// genuine cache miss that isn't already in flight.
    assistant: BackgroundDecompressor,
    /// Tile indices currently submitted to `assistant` and not yet absorbed
    /// into the cache.
    prefetching: HashSet<u32>,
    mode: OpenMode,
    poisoned: bool,
}

fn build_codec_master(records: &[CodecRecord]) -> GvrsResult<CodecMaster> {
    let mut master = CodecMaster::new();
    for record in records {
        let (encoder, decoder): (Option<Box<dyn TileEncoder>>, Option<Box<dyn TileDecoder>>) =
            built_in_codec(&record.name);
        master.register(record.name.clone(), encoder, decoder)?;
    }
    Ok(master)
}

#[cfg(feature = "deflate")]
fn built_in_codec(name: &str) -> (Option<Box<dyn TileEncoder>>, Option<Box<dyn TileDecoder>>) {
    if name == "gvrs-deflate" {
        (
            Some(Box::new(crate::codec::deflate::DeflateCodec)),
            Some(Box::new(crate::codec::deflate::DeflateCodec)),
        )
    } else {
        (None, None)
    }
}

#[cfg(not(feature = "deflate"))]
fn built_in_codec(_name: &str) -> (Option<Box<dyn TileEncoder>>, Option<Box<dyn TileDecoder>>) {
    (None, None)
}

impl GvrsFile {
    /// Creates a new file at `path`, failing if one already exists.
    pub fn create(path: &Path, spec: &GvrsFileSpecification) -> GvrsResult<Self> {
        spec.validate_ready_to_create()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut store = BufferedRandomAccessFile::new(file);

        let header = FileHeader {
            checksums_enabled: spec.checksums_enabled(),
            n_rows: spec.n_rows(),
            n_cols: spec.n_cols(),
            tile_rows: spec.tile_rows(),
            tile_cols: spec.tile_cols(),
            elements: spec.elements().to_vec(),
            codecs: spec.codecs().to_vec(),
            directory_record_offset: 0,
        };
        let header_size = header.write(&mut store)?;

        let records = RecordManager::new(header.checksums_enabled, header_size);
        let directory = TileDirectory::new(header.n_rows_of_tiles(), header.n_cols_of_tiles());
        let codecs = Arc::new(build_codec_master(&header.codecs)?);
        let standard_tile_bytes = Tile::standard_byte_size(
            header.tile_rows as usize,
            header.tile_cols as usize,
            &header.elements,
        );
        let cache = TileCache::new(spec.cache_size(), standard_tile_bytes);

        let mut gvrs = Self {
            store,
            header,
            directory,
            records,
            cache,
            codecs,
            assistant: BackgroundDecompressor::new(),
            prefetching: HashSet::new(),
            mode: OpenMode::ReadWrite,
            poisoned: false,
        };
        // Persist an (empty) directory immediately so the file is
        // self-consistent even if it is closed without a single write.
        gvrs.persist_directory()?;
        Ok(gvrs)
    }

    /// Opens an existing file. `writable` selects `ReadWrite` vs `ReadOnly`.
    pub fn open(path: &Path, writable: bool) -> GvrsResult<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let mut store = BufferedRandomAccessFile::new(file);

        let (header, header_size) = FileHeader::read(&mut store)?;
        let records = RecordManager::restore(&mut store, header.checksums_enabled, header_size)?;

        let directory = if header.directory_record_offset == 0 {
            TileDirectory::new(header.n_rows_of_tiles(), header.n_cols_of_tiles())
        } else {
            let record = records.read_record(&mut store, header.directory_record_offset)?;
            let mut payload_store =
                BufferedRandomAccessFile::new(std::io::Cursor::new(record.payload));
            TileDirectory::restore(&mut payload_store)?
        };

        let codecs = Arc::new(build_codec_master(&header.codecs)?);
        let standard_tile_bytes = Tile::standard_byte_size(
            header.tile_rows as usize,
            header.tile_cols as usize,
            &header.elements,
        );
        let cache = TileCache::new(CacheSize::Medium, standard_tile_bytes);
        let mode = if writable { OpenMode::ReadWrite } else { OpenMode::ReadOnly };

        Ok(Self {
            store,
            header,
            directory,
            records,
            cache,
            codecs,
            assistant: BackgroundDecompressor::new(),
            prefetching: HashSet::new(),
            mode,
            poisoned: false,
        })
    }

    /// Replaces the tile cache with one sized for `cache_size`, discarding
    /// (and, if necessary, flushing) whatever is currently cached.
    pub fn set_cache_size(&mut self, cache_size: CacheSize) -> GvrsResult<()> {
        let standard_tile_bytes = Tile::standard_byte_size(
            self.header.tile_rows as usize,
            self.header.tile_cols as usize,
            &self.header.elements,
        );
        for mut tile in self.cache.drain() {
            if tile.is_dirty() {
                self.writeback_tile(&mut tile)?;
            }
        }
        self.cache = TileCache::new(cache_size, standard_tile_bytes);
        Ok(())
    }

    #[must_use]
    pub fn n_rows(&self) -> u32 {
        self.header.n_rows
    }

    #[must_use]
    pub fn n_cols(&self) -> u32 {
        self.header.n_cols
    }

    #[must_use]
    pub fn tile_rows(&self) -> u32 {
        self.header.tile_rows
    }

    #[must_use]
    pub fn tile_cols(&self) -> u32 {
        self.header.tile_cols
    }

    #[must_use]
    pub fn elements(&self) -> &[ElementSpec] {
        &self.header.elements
    }

    #[must_use]
    pub fn checksums_enabled(&self) -> bool {
        self.header.checksums_enabled
    }

    /// Bytes currently tracked as free (reusable) space in the record
    /// stream.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.records.free_bytes()
    }

    /// Borrows a typed accessor for the named element.
    pub fn element(&mut self, name: &str) -> GvrsResult<ElementAccessor<'_>> {
        let index = self.element_index(name)?;
        Ok(ElementAccessor::new(self, index))
    }

    fn element_index(&self, name: &str) -> GvrsResult<usize> {
        self.header
            .elements
            .iter()
            .position(|e| e.name() == name)
            .ok_or_else(|| GvrsError::InvalidSpec(format!("no such element '{name}'")))
    }

    fn tile_geometry(&self, row: u32, col: u32) -> GvrsResult<(u32, usize, usize)> {
        if row >= self.header.n_rows || col >= self.header.n_cols {
            return Err(GvrsError::InvalidSpec(format!(
                "cell ({row}, {col}) is out of bounds for a {}x{} grid",
                self.header.n_rows, self.header.n_cols
            )));
        }
        let tile_row = row / self.header.tile_rows;
        let tile_col = col / self.header.tile_cols;
        let tile_index = tile_row * self.header.n_cols_of_tiles() + tile_col;
        let local_row = (row % self.header.tile_rows) as usize;
        let local_col = (col % self.header.tile_cols) as usize;
        Ok((tile_index, local_row, local_col))
    }

    /// `getOrLoad` (`spec.md` §4.6): promote-if-cached, else absorb any
    /// tiles the background assistant has already decoded, else decode
    /// synchronously (waiting on the assistant instead if a prefetch for
    /// this exact tile is already in flight).
    fn ensure_tile_loaded(&mut self, tile_index: u32) -> GvrsResult<()> {
        if self.cache.contains(tile_index) {
            return Ok(());
        }

        self.absorb_assistant_results(tile_index)?;
        if !self.cache.contains(tile_index) {
            let n_rows = self.header.tile_rows as usize;
            let n_cols = self.header.tile_cols as usize;
            let tile = if self.prefetching.remove(&tile_index) {
                self.assistant.wait_for(tile_index)?
            } else if self.directory.has(tile_index) {
                let offset = self.directory.get(tile_index);
                let record = self.records.read_record(&mut self.store, offset)?;
                Tile::decode(tile_index, &self.header.elements, n_rows, n_cols, &self.codecs, &record.payload)?
            } else {
                Tile::new_fill(tile_index, &self.header.elements, n_rows, n_cols)
            };
            self.insert_tile_evicting(tile)?;
        }

        if let Err(e) = self.prefetch_next_tile(tile_index) {
            log::warn!("prefetch of the tile after {tile_index} failed: {e}");
        }
        Ok(())
    }

    /// Drains whatever the background assistant has already finished and
    /// inserts it into the cache, `target` last so it remains
    /// most-recently-used (`spec.md` §4.6 step 2). A failed decode of some
    /// other, merely-prefetched tile is logged and dropped rather than
    /// propagated: a stray background failure must not fail an unrelated
    /// load. A failure of `target` itself is still returned, since the
    /// caller is waiting on that exact tile.
    fn absorb_assistant_results(&mut self, target: u32) -> GvrsResult<()> {
        let mut results = self.assistant.drain();
        if results.is_empty() {
            return Ok(());
        }
        results.sort_by_key(|(idx, _)| *idx == target);
        for (idx, result) in results {
            self.prefetching.remove(&idx);
            match result {
                Ok(tile) => self.insert_tile_evicting(tile)?,
                Err(e) if idx == target => return Err(e),
                Err(e) => log::warn!("background decode of prefetched tile {idx} failed: {e}"),
            }
        }
        Ok(())
    }

    fn insert_tile_evicting(&mut self, tile: Tile) -> GvrsResult<()> {
        if let Some(mut evicted) = self.cache.insert(tile) {
            if evicted.is_dirty() {
                self.writeback_tile(&mut evicted)?;
            }
        }
        Ok(())
    }

    /// Opportunistic read-ahead (`spec.md` §2 component 7, "prefetch
    /// handoff to the background decoder"): after loading a tile, hand the
    /// next tile in the same row of tiles to the assistant if it already
    /// has a persisted record and isn't already cached or in flight. Never
    /// wraps into the next row, since that tile is not spatially adjacent.
    fn prefetch_next_tile(&mut self, tile_index: u32) -> GvrsResult<()> {
        let n_cols_of_tiles = self.header.n_cols_of_tiles();
        let tile_col = tile_index % n_cols_of_tiles;
        if tile_col + 1 >= n_cols_of_tiles {
            return Ok(());
        }
        let next = tile_index + 1;
        if self.cache.contains(next) || self.prefetching.contains(&next) || !self.directory.has(next) {
            return Ok(());
        }

        let offset = self.directory.get(next);
        let record = self.records.read_record(&mut self.store, offset)?;
        let codecs = Arc::clone(&self.codecs);
        let specs = self.header.elements.clone();
        let tile_rows = self.header.tile_rows as usize;
        let tile_cols = self.header.tile_cols as usize;
        let payload = record.payload;
        self.assistant
            .submit(next, move || Tile::decode(next, &specs, tile_rows, tile_cols, &codecs, &payload));
        self.prefetching.insert(next);
        Ok(())
    }

    pub(crate) fn read_value(&mut self, element_index: usize, row: u32, col: u32) -> GvrsResult<f64> {
        let (tile_index, local_row, local_col) = self.tile_geometry(row, col)?;
        self.ensure_tile_loaded(tile_index)?;
        let n_cols = self.header.tile_cols as usize;
        let tile = self
            .cache
            .get_mut(tile_index)
            .expect("ensure_tile_loaded just inserted this tile");
        let idx = local_row * n_cols + local_col;
        Ok(tile.plane(element_index).read_value(idx))
    }

    pub(crate) fn write_value(
        &mut self,
        element_index: usize,
        row: u32,
        col: u32,
        value: f64,
    ) -> GvrsResult<()> {
        if self.poisoned {
            return Err(GvrsError::Poisoned);
        }
        if self.mode != OpenMode::ReadWrite {
            return Err(GvrsError::NotOpenForWriting);
        }
        let (tile_index, local_row, local_col) = self.tile_geometry(row, col)?;
        self.ensure_tile_loaded(tile_index)?;
        let n_cols = self.header.tile_cols as usize;
        let element_name = self.header.elements[element_index].name().to_string();
        let tile = self
            .cache
            .get_mut(tile_index)
            .expect("ensure_tile_loaded just inserted this tile");
        let idx = local_row * n_cols + local_col;
        tile.plane_mut(element_index).write_value(idx, value, &element_name)?;
        tile.mark_dirty();
        Ok(())
    }

    /// Writes a tile's current contents to its record (or frees the record
    /// if the tile has decayed back to all-fill), updating the directory.
    /// Any I/O failure here poisons the handle: a partially-written record
    /// stream cannot be trusted for further mutation.
    fn writeback_tile(&mut self, tile: &mut Tile) -> GvrsResult<()> {
        let result = self.writeback_tile_inner(tile);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn writeback_tile_inner(&mut self, tile: &mut Tile) -> GvrsResult<()> {
        let tile_index = tile.tile_index();
        if tile.is_all_fill() {
            if self.directory.has(tile_index) {
                let offset = self.directory.get(tile_index);
                self.records.free_record(&mut self.store, offset)?;
                self.directory.clear(tile_index);
            }
        } else {
            let payload = tile.encode(&self.codecs);
            let kind = i32::try_from(tile_index)
                .map_err(|_| GvrsError::InvalidSpec("tile index exceeds i32::MAX".into()))?;
            let offset = if self.directory.has(tile_index) {
                let old_offset = self.directory.get(tile_index);
                self.records.rewrite_record(&mut self.store, old_offset, kind, &payload)?
            } else {
                self.records.write_record(&mut self.store, kind, &payload)?
            };
            self.directory.set(tile_index, offset);
        }
        tile.clear_dirty();
        Ok(())
    }

    fn persist_directory(&mut self) -> GvrsResult<()> {
        let mut payload_store = BufferedRandomAccessFile::new(std::io::Cursor::new(Vec::<u8>::new()));
        self.directory.persist(&mut payload_store)?;
        let payload = payload_store.into_inner().into_inner();

        let offset = if self.header.directory_record_offset == 0 {
            self.records.write_record(&mut self.store, KIND_METADATA, &payload)?
        } else {
            self.records.rewrite_record(
                &mut self.store,
                self.header.directory_record_offset,
                KIND_METADATA,
                &payload,
            )?
        };
        self.header.directory_record_offset = offset;
        self.header.write(&mut self.store)?;
        Ok(())
    }

    /// Writes every dirty cached tile and the directory/header to disk.
    /// Does not request an OS-level sync; see [`Self::close`].
    pub fn flush_all(&mut self) -> GvrsResult<()> {
        if self.mode != OpenMode::ReadWrite {
            return Ok(());
        }
        if self.poisoned {
            return Err(GvrsError::Poisoned);
        }
        for mut tile in self.cache.drain() {
            if tile.is_dirty() {
                self.writeback_tile(&mut tile)?;
            }
        }
        self.persist_directory()?;
        self.store.flush()?;
        Ok(())
    }

    /// Flushes (if open for writing) and durably syncs the file, then
    /// consumes the handle. Ownership, not a runtime flag, is what makes a
    /// closed file unusable afterward.
    pub fn close(mut self) -> GvrsResult<()> {
        if self.mode == OpenMode::ReadWrite {
            self.flush_all()?;
            self.store.sync()?;
        }
        Ok(())
    }
}

impl Drop for GvrsFile {
    /// Best-effort flush if the caller never called [`Self::close`]. Errors
    /// are swallowed, matching `BufWriter`'s documented drop behavior:
    /// call `close` explicitly to observe a final write failure.
    fn drop(&mut self) {
        if self.mode == OpenMode::ReadWrite && !self.poisoned {
            let _ = self.flush_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSize;
    use tempfile::tempdir;

    fn spec_with_one_element() -> GvrsFileSpecification {
        GvrsFileSpecification::new(100, 100, 10, 10)
            .unwrap()
            .add_element(ElementSpec::float32("z", -1000.0, 1000.0, f32::NAN).unwrap())
            .unwrap()
    }

    #[test]
    fn create_write_reopen_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.gvrs");

        let mut gvrs = GvrsFile::create(&path, &spec_with_one_element()).unwrap();
        gvrs.element("z").unwrap().set(5, 5, 42.5).unwrap();
        gvrs.close().unwrap();

        let mut reopened = GvrsFile::open(&path, false).unwrap();
        assert_eq!(reopened.element("z").unwrap().get(5, 5).unwrap(), 42.5);
        assert!(reopened.element("z").unwrap().get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn write_on_read_only_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.gvrs");
        GvrsFile::create(&path, &spec_with_one_element()).unwrap().close().unwrap();

        let mut readonly = GvrsFile::open(&path, false).unwrap();
        let err = readonly.element("z").unwrap().set(0, 0, 1.0).unwrap_err();
        assert!(matches!(err, GvrsError::NotOpenForWriting));
    }

    #[test]
    fn all_fill_tile_frees_its_record_on_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.gvrs");
        let mut gvrs = GvrsFile::create(&path, &spec_with_one_element()).unwrap();

        gvrs.element("z").unwrap().set(0, 0, 7.0).unwrap();
        gvrs.flush_all().unwrap();
        assert!(gvrs.directory.has(0));

        gvrs.element("z").unwrap().set(0, 0, f64::NAN).unwrap();
        gvrs.flush_all().unwrap();
        assert!(!gvrs.directory.has(0), "an all-fill tile must not keep a record");
    }

    #[test]
    fn eviction_under_small_cache_writes_back_dirty_tiles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.gvrs");
        let mut gvrs = GvrsFile::create(&path, &spec_with_one_element()).unwrap();
        gvrs.set_cache_size(CacheSize::Custom(1)).unwrap(); // forces a 1-tile cache

        gvrs.element("z").unwrap().set(1, 1, 1.0).unwrap();
        gvrs.element("z").unwrap().set(50, 50, 2.0).unwrap(); // different tile, evicts the first
        gvrs.element("z").unwrap().set(1, 1, 1.0).unwrap(); // re-touch, forces reload from disk

        assert_eq!(gvrs.element("z").unwrap().get(1, 1).unwrap(), 1.0);
        assert_eq!(gvrs.element("z").unwrap().get(50, 50).unwrap(), 2.0);
    }

    #[test]
    fn unknown_element_name_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.gvrs");
        let mut gvrs = GvrsFile::create(&path, &spec_with_one_element()).unwrap();
        assert!(gvrs.element("does-not-exist").is_err());
    }
}
