//! Built-in DEFLATE tile codec, registered by default at tag 0.
//!
//! Mirrors the reference crate's own use of `flate2` to compress directory
//! and metadata bytes, applied here to tile element planes instead.

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::codec::{PlaneValues, TileDecoder, TileEncoder};
use crate::element::DataType;
use crate::error::{GvrsError, GvrsResult};

/// DEFLATE-backed encoder/decoder for tile element planes.
pub struct DeflateCodec;

fn plane_to_bytes(values: &PlaneValues) -> Vec<u8> {
    match values {
        PlaneValues::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PlaneValues::Int16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PlaneValues::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
    }
}

fn bytes_to_plane(data_type: DataType, n: usize, raw: &[u8]) -> GvrsResult<PlaneValues> {
    match data_type {
        DataType::Int32 | DataType::IntCodedFloat32 => {
            expect_len(raw, n * 4)?;
            Ok(PlaneValues::Int32(
                raw.chunks_exact(4)
                    .map(|c| i32::from_le_bytes(c.try_into().expect("4 bytes")))
                    .collect(),
            ))
        }
        DataType::Int16 => {
            expect_len(raw, n * 2)?;
            Ok(PlaneValues::Int16(
                raw.chunks_exact(2)
                    .map(|c| i16::from_le_bytes(c.try_into().expect("2 bytes")))
                    .collect(),
            ))
        }
        DataType::Float32 => {
            expect_len(raw, n * 4)?;
            Ok(PlaneValues::Float32(
                raw.chunks_exact(4)
                    .map(|c| f32::from_le_bytes(c.try_into().expect("4 bytes")))
                    .collect(),
            ))
        }
    }
}

fn expect_len(raw: &[u8], expected: usize) -> GvrsResult<()> {
    if raw.len() != expected {
        return Err(GvrsError::corrupt(
            0,
            format!("decompressed plane length {} != expected {expected}", raw.len()),
        ));
    }
    Ok(())
}

impl TileEncoder for DeflateCodec {
    fn encode(&self, _n_rows: usize, _n_cols: usize, values: &PlaneValues) -> Option<Vec<u8>> {
        let raw = plane_to_bytes(values);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).ok()?;
        encoder.finish().ok()
    }
}

impl TileDecoder for DeflateCodec {
    fn decode(
        &self,
        n_rows: usize,
        n_cols: usize,
        data_type: DataType,
        bytes: &[u8],
    ) -> GvrsResult<PlaneValues> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| GvrsError::corrupt(0, format!("deflate decode failed: {e}")))?;
        bytes_to_plane(data_type, n_rows * n_cols, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_each_type() {
        let codec = DeflateCodec;
        for values in [
            PlaneValues::Int32(vec![1, -2, 3, 4]),
            PlaneValues::Int16(vec![1, -2, 3, 4]),
            PlaneValues::Float32(vec![1.5, -2.25, 0.0, 4.0]),
        ] {
            let encoded = codec.encode(2, 2, &values).expect("deflate always accepts");
            let decoded = codec
                .decode(2, 2, values.data_type(), &encoded)
                .expect("decode should succeed");
            assert_eq!(decoded, values);
        }
    }
}
