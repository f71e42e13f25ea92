//! Builder for a new GVRS file's fixed layout: grid/tile geometry, element
//! list, codec list, and checksum policy (`spec.md` §3, §6.1).

use crate::cache::CacheSize;
use crate::element::ElementSpec;
use crate::error::{GvrsError, GvrsResult};
use crate::header::CodecRecord;

/// Describes the geometry and element/codec layout of a GVRS file to be
/// created. Immutable once the file exists: none of this can change across
/// an open/close cycle.
#[derive(Debug, Clone)]
pub struct GvrsFileSpecification {
    n_rows: u32,
    n_cols: u32,
    tile_rows: u32,
    tile_cols: u32,
    elements: Vec<ElementSpec>,
    codecs: Vec<CodecRecord>,
    checksums_enabled: bool,
    cache_size: CacheSize,
}

impl GvrsFileSpecification {
    /// Starts a specification for an `n_rows` x `n_cols` grid tiled into
    /// `tile_rows` x `tile_cols` blocks. The built-in `gvrs-deflate` codec
    /// is registered at tag 0 by default.
    pub fn new(n_rows: u32, n_cols: u32, tile_rows: u32, tile_cols: u32) -> GvrsResult<Self> {
        if n_rows == 0 || n_cols == 0 {
            return Err(GvrsError::InvalidSpec("grid dimensions must be nonzero".into()));
        }
        if tile_rows == 0 || tile_cols == 0 {
            return Err(GvrsError::InvalidSpec("tile dimensions must be nonzero".into()));
        }
        Ok(Self {
            n_rows,
            n_cols,
            tile_rows,
            tile_cols,
            elements: Vec::new(),
            codecs: vec![CodecRecord {
                name: "gvrs-deflate".into(),
                hint: String::new(),
            }],
            checksums_enabled: true,
            cache_size: CacheSize::Medium,
        })
    }

    /// Appends an element. Names must be unique within a specification.
    pub fn add_element(mut self, element: ElementSpec) -> GvrsResult<Self> {
        if self.elements.iter().any(|e| e.name() == element.name()) {
            return Err(GvrsError::InvalidSpec(format!(
                "duplicate element name '{}'",
                element.name()
            )));
        }
        self.elements.push(element);
        Ok(self)
    }

    /// Registers an additional codec identifier with a free-form hint
    /// string. Only `gvrs-deflate` has a built-in implementation; other
    /// names are recorded but have no encoder/decoder, so tiles can never
    /// select them.
    pub fn add_codec(mut self, name: impl Into<String>, hint: impl Into<String>) -> GvrsResult<Self> {
        let name = name.into();
        if self.codecs.iter().any(|c| c.name == name) {
            return Err(GvrsError::InvalidSpec(format!("duplicate codec name '{name}'")));
        }
        self.codecs.push(CodecRecord {
            name,
            hint: hint.into(),
        });
        Ok(self)
    }

    #[must_use]
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_cache_size(mut self, cache_size: CacheSize) -> Self {
        self.cache_size = cache_size;
        self
    }

    #[must_use]
    pub fn n_rows(&self) -> u32 {
        self.n_rows
    }

    #[must_use]
    pub fn n_cols(&self) -> u32 {
        self.n_cols
    }

    #[must_use]
    pub fn tile_rows(&self) -> u32 {
        self.tile_rows
    }

    #[must_use]
    pub fn tile_cols(&self) -> u32 {
        self.tile_cols
    }

    #[must_use]
    pub fn elements(&self) -> &[ElementSpec] {
        &self.elements
    }

    #[must_use]
    pub fn codecs(&self) -> &[CodecRecord] {
        &self.codecs
    }

    #[must_use]
    pub fn checksums_enabled(&self) -> bool {
        self.checksums_enabled
    }

    #[must_use]
    pub fn cache_size(&self) -> CacheSize {
        self.cache_size
    }

    pub(crate) fn validate_ready_to_create(&self) -> GvrsResult<()> {
        if self.elements.is_empty() {
            return Err(GvrsError::InvalidSpec(
                "a GVRS file must declare at least one element".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(GvrsFileSpecification::new(0, 10, 1, 1).is_err());
        assert!(GvrsFileSpecification::new(10, 10, 0, 1).is_err());
    }

    #[test]
    fn default_codec_list_has_deflate_at_tag_zero() {
        let spec = GvrsFileSpecification::new(10, 10, 4, 4).unwrap();
        assert_eq!(spec.codecs()[0].name, "gvrs-deflate");
    }

    #[test]
    fn rejects_duplicate_element_names() {
        let spec = GvrsFileSpecification::new(10, 10, 4, 4).unwrap();
        let spec = spec
            .add_element(ElementSpec::int32("z", 0, 10, -1).unwrap())
            .unwrap();
        assert!(spec.add_element(ElementSpec::int32("z", 0, 5, 0).unwrap()).is_err());
    }

    #[test]
    fn validate_ready_to_create_requires_an_element() {
        let spec = GvrsFileSpecification::new(10, 10, 4, 4).unwrap();
        assert!(spec.validate_ready_to_create().is_err());
    }
}
