//! Codec registry ("CodecMaster", `spec.md` §4.3): a name → (encoder,
//! decoder) table dispatched by a per-tile codec tag byte.

#[cfg(feature = "deflate")]
pub mod deflate;

use crate::element::DataType;
use crate::error::{GvrsError, GvrsResult};

/// A plane of tile values, typed.
///
/// `IntCodedFloat32` planes are carried as `Int32` here; the element layer
/// handles scale/offset conversion, codecs only ever see integer or float
/// samples.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaneValues {
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

impl PlaneValues {
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            PlaneValues::Int32(_) => DataType::Int32,
            PlaneValues::Int16(_) => DataType::Int16,
            PlaneValues::Float32(_) => DataType::Float32,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            PlaneValues::Int32(v) => v.len(),
            PlaneValues::Int16(v) => v.len(),
            PlaneValues::Float32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compresses one element plane. Implementations may decline to compress
/// (returning `None`), in which case the caller falls back to the standard
/// (raw) layout.
pub trait TileEncoder: Send + Sync {
    fn encode(&self, n_rows: usize, n_cols: usize, values: &PlaneValues) -> Option<Vec<u8>>;
}

/// Reverses a `TileEncoder`'s output.
pub trait TileDecoder: Send + Sync {
    fn decode(
        &self,
        n_rows: usize,
        n_cols: usize,
        data_type: DataType,
        bytes: &[u8],
    ) -> GvrsResult<PlaneValues>;
}

/// One entry in the codec registry: a name, a fixed tag (its position in the
/// registry), and optional encoder/decoder implementations.
pub struct CodecEntry {
    name: String,
    encoder: Option<Box<dyn TileEncoder>>,
    decoder: Option<Box<dyn TileDecoder>>,
}

impl CodecEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    #[must_use]
    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }
}

/// Maximum length of a codec identifier (`spec.md` §4.3).
pub const MAX_CODEC_NAME_LEN: usize = 16;

/// An ordered table of codecs, dispatched by a tag byte equal to each
/// codec's position in the list.
#[derive(Default)]
pub struct CodecMaster {
    entries: Vec<CodecEntry>,
}

impl CodecMaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec, returning its tag byte (its index in the list).
    ///
    /// # Errors
    /// Returns `InvalidSpec` if the name is not valid identifier syntax, is
    /// longer than [`MAX_CODEC_NAME_LEN`], or duplicates an existing name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        encoder: Option<Box<dyn TileEncoder>>,
        decoder: Option<Box<dyn TileDecoder>>,
    ) -> GvrsResult<u8> {
        let name = name.into();
        validate_codec_name(&name)?;
        if self.entries.iter().any(|e| e.name == name) {
            return Err(GvrsError::InvalidSpec(format!(
                "codec '{name}' already registered"
            )));
        }
        let tag = u8::try_from(self.entries.len()).map_err(|_| {
            GvrsError::InvalidSpec("codec registry exceeds 256 entries".into())
        })?;
        self.entries.push(CodecEntry {
            name,
            encoder,
            decoder,
        });
        Ok(tag)
    }

    #[must_use]
    pub fn entries(&self) -> &[CodecEntry] {
        &self.entries
    }

    #[must_use]
    pub fn find_tag(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .and_then(|i| u8::try_from(i).ok())
    }

    /// Tries every registered encoder with an encoder in order, returning
    /// the first one willing to compress the plane, tagged by its registry
    /// position. Returns `None` if no codec compresses it (or none are
    /// registered), in which case the caller must fall back to the standard
    /// layout.
    pub(crate) fn encode(
        &self,
        n_rows: usize,
        n_cols: usize,
        values: &PlaneValues,
    ) -> Option<(u8, Vec<u8>)> {
        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(enc) = &entry.encoder {
                if let Some(bytes) = enc.encode(n_rows, n_cols, values) {
                    let tag = u8::try_from(idx).ok()?;
                    return Some((tag, bytes));
                }
            }
        }
        None
    }

    pub(crate) fn decode(
        &self,
        tag: u8,
        n_rows: usize,
        n_cols: usize,
        data_type: DataType,
        bytes: &[u8],
    ) -> GvrsResult<PlaneValues> {
        let entry = self
            .entries
            .get(tag as usize)
            .ok_or(GvrsError::CodecMissing { tag })?;
        let decoder = entry.decoder.as_ref().ok_or(GvrsError::CodecMissing { tag })?;
        decoder.decode(n_rows, n_cols, data_type, bytes)
    }
}

pub(crate) fn validate_codec_name(name: &str) -> GvrsResult<()> {
    if name.is_empty() || name.len() > MAX_CODEC_NAME_LEN {
        return Err(GvrsError::InvalidSpec(format!(
            "codec name '{name}' must be 1-{MAX_CODEC_NAME_LEN} characters"
        )));
    }
    if !name.is_ascii() {
        return Err(GvrsError::InvalidSpec(format!(
            "codec name '{name}' must be ASCII"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphabetic() {
        return Err(GvrsError::InvalidSpec(format!(
            "codec name '{name}' must start with a letter"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(GvrsError::InvalidSpec(format!(
            "codec name '{name}' has invalid characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::deflate::DeflateCodec;

    #[test]
    fn register_assigns_sequential_tags() {
        let mut master = CodecMaster::new();
        let a = master
            .register("gvrs-deflate", Some(Box::new(DeflateCodec)), Some(Box::new(DeflateCodec)))
            .unwrap();
        let b = master.register("no-op", None, None).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut master = CodecMaster::new();
        master.register("dup", None, None).unwrap();
        assert!(master.register("dup", None, None).is_err());
    }

    #[test]
    fn missing_decoder_reports_codec_missing() {
        let mut master = CodecMaster::new();
        master.register("encode-only", Some(Box::new(DeflateCodec)), None).unwrap();
        let err = master.decode(0, 2, 2, DataType::Int32, &[]).unwrap_err();
        assert!(matches!(err, GvrsError::CodecMissing { tag: 0 }));
    }
}
