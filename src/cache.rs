//! Bounded tile cache (`spec.md` §4.5): an LRU keyed by tile index, sized
//! by byte budget rather than tile count.
//!
//! The background assistant (`spec.md` §4.7) is not a field of this type:
//! it needs the record manager and codec registry to turn a tile index into
//! a decoded `Tile`, neither of which this cache has. [`crate::file::GvrsFile`]
//! owns the assistant and drives the `getOrLoad` handoff (§4.6) around calls
//! into this LRU.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::tile::Tile;

/// Preset cache budgets, plus an escape hatch for callers with their own
/// numbers. Byte budgets are converted to a tile count using the grid's
/// standard (uncompressed) tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSize {
    Small,
    Medium,
    Large,
    Custom(usize),
}

impl CacheSize {
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            CacheSize::Small => 2 * 1024 * 1024,
            CacheSize::Medium => 32 * 1024 * 1024,
            CacheSize::Large => 256 * 1024 * 1024,
            CacheSize::Custom(n) => n,
        }
    }
}

/// An LRU of decoded tiles. Eviction is exposed to the caller as a returned
/// `Tile` rather than performed silently, since an evicted dirty tile must
/// be written back before it is dropped (`spec.md` §4.5, §4.8).
pub struct TileCache {
    lru: LruCache<u32, Tile>,
}

impl TileCache {
    /// Builds a cache sized to hold at least one tile, however small the
    /// byte budget.
    #[must_use]
    pub fn new(size: CacheSize, standard_tile_bytes: usize) -> Self {
        let tile_count = (size.bytes() / standard_tile_bytes.max(1)).max(1);
        let cap = NonZeroUsize::new(tile_count).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: LruCache::new(cap),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lru.cap().get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    #[must_use]
    pub fn contains(&self, tile_index: u32) -> bool {
        self.lru.contains(&tile_index)
    }

    /// Touches `tile_index`, promoting it to most-recently-used.
    pub fn get_mut(&mut self, tile_index: u32) -> Option<&mut Tile> {
        self.lru.get_mut(&tile_index)
    }

    /// Inserts `tile`, evicting and returning the least-recently-used entry
    /// if the cache was already at capacity.
    pub fn insert(&mut self, tile: Tile) -> Option<Tile> {
        let tile_index = tile.tile_index();
        self.lru.push(tile_index, tile).map(|(_, evicted)| evicted)
    }

    /// Removes and returns a specific tile, if cached.
    pub fn remove(&mut self, tile_index: u32) -> Option<Tile> {
        self.lru.pop(&tile_index)
    }

    /// Drains every cached tile, least-recently-used first, for use when
    /// closing a file (every dirty tile must be flushed).
    pub fn drain(&mut self) -> Vec<Tile> {
        let mut drained = Vec::with_capacity(self.lru.len());
        while let Some((_, tile)) = self.lru.pop_lru() {
            drained.push(tile);
        }
        drained
    }
}
