//! Raster tiles: in-memory typed cell arrays, and the on-disk tile payload
//! format (`spec.md` §3 "Tile", §4.4 "Tile element").

use crate::codec::{CodecMaster, PlaneValues};
use crate::element::{DataType, ElementSpec};
use crate::error::{GvrsError, GvrsResult};

/// Format version written as the first byte of every tile record payload,
/// ahead of the per-element planes (`spec.md` §3's "per-tile header byte").
const TILE_PAYLOAD_VERSION: u8 = 1;

/// One element's worth of cell data within a tile.
pub struct TileElementPlane {
    data_type: DataType,
    n_rows: usize,
    n_cols: usize,
    min_value: f64,
    max_value: f64,
    fill_value: f64,
    scale: f64,
    offset: f64,
    values: PlaneValues,
}

fn standard_size(n_cells: usize, width: usize) -> usize {
    // Padded to a 4-byte boundary, per spec.md §3.
    let raw = n_cells * width;
    (raw + 3) & !3
}

impl TileElementPlane {
    fn new_fill(spec: &ElementSpec, n_rows: usize, n_cols: usize) -> Self {
        let n = n_rows * n_cols;
        let fill = spec.fill_value();
        let values = match spec.data_type() {
            DataType::Int32 => PlaneValues::Int32(vec![fill.trunc() as i32; n]),
            DataType::IntCodedFloat32 => {
                let stored = (fill * spec.scale() + spec.offset()).round() as i32;
                PlaneValues::Int32(vec![stored; n])
            }
            DataType::Int16 => PlaneValues::Int16(vec![fill.trunc() as i16; n]),
            DataType::Float32 => PlaneValues::Float32(vec![fill as f32; n]),
        };
        Self {
            data_type: spec.data_type(),
            n_rows,
            n_cols,
            min_value: spec.min_value(),
            max_value: spec.max_value(),
            fill_value: spec.fill_value(),
            scale: spec.scale(),
            offset: spec.offset(),
            values,
        }
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    fn value_in_bounds(&self, v: f64) -> bool {
        v == self.fill_value || (v >= self.min_value && v <= self.max_value)
    }

    /// Reads the cell at `idx` (row-major index within the tile) as `f64`
    /// user units, reversing `IntCodedFloat32` scaling.
    #[must_use]
    pub fn read_value(&self, idx: usize) -> f64 {
        match &self.values {
            PlaneValues::Int32(v) => {
                if self.data_type == DataType::IntCodedFloat32 {
                    (f64::from(v[idx]) - self.offset) / self.scale
                } else {
                    f64::from(v[idx])
                }
            }
            PlaneValues::Int16(v) => f64::from(v[idx]),
            PlaneValues::Float32(v) => f64::from(v[idx]),
        }
    }

    /// Writes `v` (user units) to cell `idx`, applying the element's range
    /// and fill/NaN policy (`spec.md` §4.4).
    pub fn write_value(&mut self, idx: usize, v: f64, element_name: &str) -> GvrsResult<()> {
        let reject = || GvrsError::ValueOutOfRange {
            element: element_name.to_string(),
            value: format!("{v}"),
        };
        match &mut self.values {
            PlaneValues::Int32(arr) => {
                let truncated = v.trunc();
                if self.data_type == DataType::IntCodedFloat32 {
                    if !self.value_in_bounds(v) {
                        return Err(reject());
                    }
                    arr[idx] = (v * self.scale + self.offset).round() as i32;
                } else {
                    if !self.value_in_bounds(truncated) {
                        return Err(reject());
                    }
                    arr[idx] = truncated as i32;
                }
            }
            PlaneValues::Int16(arr) => {
                let truncated = v.trunc();
                if !self.value_in_bounds(truncated) {
                    return Err(reject());
                }
                arr[idx] = truncated as i16;
            }
            PlaneValues::Float32(arr) => {
                if v.is_nan() {
                    if !self.fill_value.is_nan() {
                        return Err(reject());
                    }
                } else if !self.value_in_bounds(v) {
                    return Err(reject());
                }
                arr[idx] = v as f32;
            }
        }
        Ok(())
    }

    /// True if at least one cell holds a non-fill value.
    #[must_use]
    pub fn has_valid_data(&self) -> bool {
        let n = match &self.values {
            PlaneValues::Int32(v) => v.len(),
            PlaneValues::Int16(v) => v.len(),
            PlaneValues::Float32(v) => v.len(),
        };
        (0..n).any(|idx| {
            let v = self.read_value(idx);
            if self.fill_value.is_nan() {
                !v.is_nan()
            } else {
                v != self.fill_value
            }
        })
    }

    /// True iff every cell holds the fill value (the logical inverse of
    /// [`Self::has_valid_data`], kept as a separate method per `spec.md`
    /// §4.4's naming).
    #[must_use]
    pub fn has_fill_data_values(&self) -> bool {
        !self.has_valid_data()
    }

    /// Encodes this plane to its on-disk bytes: either the codec's
    /// compressed form (tag byte + payload) if strictly shorter than the
    /// standard layout, or the raw little-endian standard dump.
    #[must_use]
    pub fn encode(&self, codec: &CodecMaster) -> Vec<u8> {
        let n = self.n_rows * self.n_cols;
        let std_size = standard_size(n, self.data_type.width());
        if let Some((tag, mut payload)) = codec.encode(self.n_rows, self.n_cols, &self.values) {
            if payload.len() + 1 < std_size {
                let mut out = Vec::with_capacity(payload.len() + 1);
                out.push(tag);
                out.append(&mut payload);
                return out;
            }
        }
        self.standard_bytes()
    }

    fn standard_bytes(&self) -> Vec<u8> {
        let mut out = match &self.values {
            PlaneValues::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>(),
            PlaneValues::Int16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>(),
            PlaneValues::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>(),
        };
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    /// Decodes `bytes` back into a plane, inferring standard-vs-compressed
    /// by comparing the byte length to the standard size (`spec.md` §4.4).
    pub fn decode(
        spec: &ElementSpec,
        n_rows: usize,
        n_cols: usize,
        codec: &CodecMaster,
        bytes: &[u8],
    ) -> GvrsResult<Self> {
        let n = n_rows * n_cols;
        let data_type = spec.data_type();
        let std_size = standard_size(n, data_type.width());
        let values = if bytes.len() == std_size {
            decode_standard(data_type, n, bytes)?
        } else {
            let tag = *bytes.first().ok_or_else(|| GvrsError::corrupt(0, "empty tile plane"))?;
            codec.decode(tag, n_rows, n_cols, data_type, &bytes[1..])?
        };
        Ok(Self {
            data_type,
            n_rows,
            n_cols,
            min_value: spec.min_value(),
            max_value: spec.max_value(),
            fill_value: spec.fill_value(),
            scale: spec.scale(),
            offset: spec.offset(),
            values,
        })
    }
}

fn decode_standard(data_type: DataType, n: usize, bytes: &[u8]) -> GvrsResult<PlaneValues> {
    let width = data_type.width();
    let raw = &bytes[..n * width];
    Ok(match data_type {
        DataType::Int32 | DataType::IntCodedFloat32 => PlaneValues::Int32(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().expect("4 bytes")))
                .collect(),
        ),
        DataType::Int16 => PlaneValues::Int16(
            raw.chunks_exact(2)
                .map(|c| i16::from_le_bytes(c.try_into().expect("2 bytes")))
                .collect(),
        ),
        DataType::Float32 => PlaneValues::Float32(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().expect("4 bytes")))
                .collect(),
        ),
    })
}

/// An in-memory raster tile: one [`TileElementPlane`] per element, plus the
/// bookkeeping the cache needs (`spec.md` §3 "Tile").
pub struct Tile {
    tile_index: u32,
    n_rows: usize,
    n_cols: usize,
    planes: Vec<TileElementPlane>,
    dirty: bool,
}

impl Tile {
    /// Constructs a fill-initialized tile (used on first write, or on a
    /// read miss that the facade synthesizes).
    #[must_use]
    pub fn new_fill(tile_index: u32, specs: &[ElementSpec], n_rows: usize, n_cols: usize) -> Self {
        let planes = specs.iter().map(|s| TileElementPlane::new_fill(s, n_rows, n_cols)).collect();
        Self {
            tile_index,
            n_rows,
            n_cols,
            planes,
            dirty: false,
        }
    }

    #[must_use]
    pub fn tile_index(&self) -> u32 {
        self.tile_index
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    #[must_use]
    pub fn plane(&self, element_index: usize) -> &TileElementPlane {
        &self.planes[element_index]
    }

    pub fn plane_mut(&mut self, element_index: usize) -> &mut TileElementPlane {
        &mut self.planes[element_index]
    }

    /// True if every element plane holds only its fill value: such a tile
    /// must not be persisted (`spec.md` §3).
    #[must_use]
    pub fn is_all_fill(&self) -> bool {
        self.planes.iter().all(TileElementPlane::has_fill_data_values)
    }

    /// Serializes the full tile payload: version byte, then per element a
    /// `u32` length followed by that many bytes (resolved layout, see
    /// `SPEC_FULL.md` §3).
    #[must_use]
    pub fn encode(&self, codec: &CodecMaster) -> Vec<u8> {
        let mut out = vec![TILE_PAYLOAD_VERSION];
        for plane in &self.planes {
            let bytes = plane.encode(codec);
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    /// Deserializes a tile payload produced by [`Self::encode`].
    pub fn decode(
        tile_index: u32,
        specs: &[ElementSpec],
        n_rows: usize,
        n_cols: usize,
        codec: &CodecMaster,
        bytes: &[u8],
    ) -> GvrsResult<Self> {
        if bytes.first().copied() != Some(TILE_PAYLOAD_VERSION) {
            return Err(GvrsError::corrupt(0, "unrecognized tile payload version"));
        }
        let mut cursor = 1usize;
        let mut planes = Vec::with_capacity(specs.len());
        for spec in specs {
            let len_bytes = bytes
                .get(cursor..cursor + 4)
                .ok_or_else(|| GvrsError::corrupt(0, "truncated tile plane length"))?;
            let len = u32::from_le_bytes(len_bytes.try_into().expect("4 bytes")) as usize;
            cursor += 4;
            let plane_bytes = bytes
                .get(cursor..cursor + len)
                .ok_or_else(|| GvrsError::corrupt(0, "truncated tile plane data"))?;
            cursor += len;
            planes.push(TileElementPlane::decode(spec, n_rows, n_cols, codec, plane_bytes)?);
        }
        Ok(Self {
            tile_index,
            n_rows,
            n_cols,
            planes,
            dirty: false,
        })
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Approximate in-memory footprint in bytes, used by the cache to
    /// convert a byte budget into a tile count (`spec.md` §4.6).
    #[must_use]
    pub fn standard_byte_size(n_rows: usize, n_cols: usize, specs: &[ElementSpec]) -> usize {
        let n = n_rows * n_cols;
        specs.iter().map(|s| standard_size(n, s.data_type().width())).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::deflate::DeflateCodec;

    fn codec_master() -> CodecMaster {
        let mut m = CodecMaster::new();
        m.register("gvrs-deflate", Some(Box::new(DeflateCodec)), Some(Box::new(DeflateCodec)))
            .unwrap();
        m
    }

    #[test]
    fn fill_tile_is_all_fill() {
        let spec = ElementSpec::float32("z", -100.0, 100.0, f32::NAN).unwrap();
        let tile = Tile::new_fill(0, std::slice::from_ref(&spec), 4, 4);
        assert!(tile.is_all_fill());
    }

    #[test]
    fn write_then_read_is_not_all_fill() {
        let spec = ElementSpec::float32("z", -100.0, 100.0, f32::NAN).unwrap();
        let mut tile = Tile::new_fill(0, std::slice::from_ref(&spec), 4, 4);
        tile.plane_mut(0).write_value(0, 3.5, "z").unwrap();
        assert!(!tile.is_all_fill());
        assert_eq!(tile.plane(0).read_value(0), 3.5);
    }

    #[test]
    fn encode_decode_round_trip() {
        let specs = vec![
            ElementSpec::int32("a", 0, 1000, -1).unwrap(),
            ElementSpec::float32("b", -1.0, 1.0, f32::NAN).unwrap(),
        ];
        let codec = codec_master();
        let mut tile = Tile::new_fill(7, &specs, 10, 10);
        tile.plane_mut(0).write_value(5, 42.0, "a").unwrap();
        tile.plane_mut(1).write_value(5, 0.25, "b").unwrap();

        let bytes = tile.encode(&codec);
        let decoded = Tile::decode(7, &specs, 10, 10, &codec, &bytes).unwrap();
        assert_eq!(decoded.plane(0).read_value(5), 42.0);
        assert_eq!(decoded.plane(1).read_value(5), 0.25);
        assert_eq!(decoded.plane(0).read_value(0), -1.0);
    }

    #[test]
    fn range_enforcement() {
        let spec = ElementSpec::int32("r", 0, 100, -1).unwrap();
        let mut tile = Tile::new_fill(0, std::slice::from_ref(&spec), 1, 1);
        assert!(tile.plane_mut(0).write_value(0, 50.0, "r").is_ok());
        assert!(tile.plane_mut(0).write_value(0, 101.0, "r").is_err());
        assert!(tile.plane_mut(0).write_value(0, -1.0, "r").is_ok());
    }

    #[test]
    fn nan_write_requires_nan_fill() {
        let nan_fill = ElementSpec::float32("a", -1.0, 1.0, f32::NAN).unwrap();
        let mut t1 = Tile::new_fill(0, std::slice::from_ref(&nan_fill), 1, 1);
        assert!(t1.plane_mut(0).write_value(0, f64::NAN, "a").is_ok());

        let zero_fill = ElementSpec::float32("b", -1.0, 1.0, 0.0).unwrap();
        let mut t2 = Tile::new_fill(0, std::slice::from_ref(&zero_fill), 1, 1);
        assert!(t2.plane_mut(0).write_value(0, f64::NAN, "b").is_err());
    }
}
