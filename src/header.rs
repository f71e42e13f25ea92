//! File header: magic, format version, grid/tile geometry, element and
//! codec specifications (`spec.md` §6.1).

use crate::braf::RandomAccessStore;
use crate::checksum::crc32c;
use crate::codec::MAX_CODEC_NAME_LEN;
use crate::element::{DataType, ElementSpec, MAX_ELEMENT_NAME_LEN};
use crate::error::{GvrsError, GvrsResult};

const MAGIC: [u8; 4] = *b"GVRS";
const FORMAT_VERSION_MAJOR: u8 = 1;
const FORMAT_VERSION_MINOR: u8 = 0;

fn round_up_8(n: u64) -> u64 {
    (n + 7) & !7
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> GvrsResult<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| GvrsError::InvalidSpec(format!("string '{s}' exceeds 65535 bytes")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// A cursor over an in-memory byte slice, used to parse the header body
/// that was already read off disk in one shot.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> GvrsResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| GvrsError::corrupt(0, "header truncated"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> GvrsResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> GvrsResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> GvrsResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> GvrsResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn f64(&mut self) -> GvrsResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn string(&mut self) -> GvrsResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GvrsError::corrupt(0, format!("non-UTF8 string: {e}")))
    }
}

/// One entry in the codec registry as persisted in the header: a name plus
/// an opaque configuration hint string (e.g. a compression level).
#[derive(Debug, Clone)]
pub struct CodecRecord {
    pub name: String,
    pub hint: String,
}

/// The fixed geometry, element list, and codec list that together describe
/// how to interpret every record in a GVRS file.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub checksums_enabled: bool,
    pub n_rows: u32,
    pub n_cols: u32,
    pub tile_rows: u32,
    pub tile_cols: u32,
    pub elements: Vec<ElementSpec>,
    pub codecs: Vec<CodecRecord>,
    /// Offset of the most recently written directory metadata record, or 0
    /// if the directory has never been persisted.
    pub directory_record_offset: u64,
}

impl FileHeader {
    #[must_use]
    pub fn n_rows_of_tiles(&self) -> u32 {
        self.n_rows.div_ceil(self.tile_rows)
    }

    #[must_use]
    pub fn n_cols_of_tiles(&self) -> u32 {
        self.n_cols.div_ceil(self.tile_cols)
    }

    fn encode_body(&self) -> GvrsResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION_MAJOR);
        buf.push(FORMAT_VERSION_MINOR);
        buf.push(u8::from(self.checksums_enabled));
        buf.push(0); // reserved
        buf.extend_from_slice(&self.n_rows.to_le_bytes());
        buf.extend_from_slice(&self.n_cols.to_le_bytes());
        buf.extend_from_slice(&self.tile_rows.to_le_bytes());
        buf.extend_from_slice(&self.tile_cols.to_le_bytes());

        let n_elements = u16::try_from(self.elements.len())
            .map_err(|_| GvrsError::InvalidSpec("too many elements".into()))?;
        buf.extend_from_slice(&n_elements.to_le_bytes());
        for element in &self.elements {
            put_str(&mut buf, element.name())?;
            buf.push(element.data_type().tag());
            buf.extend_from_slice(&element.min_value().to_le_bytes());
            buf.extend_from_slice(&element.max_value().to_le_bytes());
            buf.extend_from_slice(&element.fill_value().to_le_bytes());
            buf.extend_from_slice(&element.scale().to_le_bytes());
            buf.extend_from_slice(&element.offset().to_le_bytes());
            put_str(&mut buf, element.description())?;
            put_str(&mut buf, element.label())?;
            put_str(&mut buf, element.units())?;
        }

        let n_codecs = u16::try_from(self.codecs.len())
            .map_err(|_| GvrsError::InvalidSpec("too many codecs".into()))?;
        buf.extend_from_slice(&n_codecs.to_le_bytes());
        for codec in &self.codecs {
            put_str(&mut buf, &codec.name)?;
            put_str(&mut buf, &codec.hint)?;
        }

        buf.extend_from_slice(&self.directory_record_offset.to_le_bytes());
        Ok(buf)
    }

    /// Writes the header starting at offset 0, padding to an 8-byte
    /// boundary, and returns the resulting header size (where the record
    /// stream begins).
    pub fn write(&self, store: &mut impl RandomAccessStore) -> GvrsResult<u64> {
        let body = self.encode_body()?;
        let crc = crc32c(&body);

        let unpadded = body.len() as u64 + 4;
        let header_size = round_up_8(unpadded);

        let mut framed = body;
        framed.extend_from_slice(&crc.to_le_bytes());
        framed.resize(header_size as usize, 0);

        store.seek_to(0)?;
        store.write_all_bytes(&framed)?;
        Ok(header_size)
    }

    /// Reads and validates the header at the start of `store`, returning it
    /// along with the header size (where the record stream begins).
    pub fn read(store: &mut impl RandomAccessStore) -> GvrsResult<(Self, u64)> {
        store.seek_to(0)?;
        let file_size = store.size()? as u64;
        // Headers are small; read a generous prefix and reparse once we
        // know the true body length from the element/codec counts.
        let probe_len = file_size.min(1 << 20) as usize;
        let mut probe = vec![0u8; probe_len];
        store.read_exact_bytes(&mut probe)?;

        let mut cursor = Reader::new(&probe);
        let magic: [u8; 4] = cursor.take(4)?.try_into().expect("4 bytes");
        if magic != MAGIC {
            return Err(GvrsError::UnsupportedFormat("bad magic number".into()));
        }
        let major = cursor.u8()?;
        let _minor = cursor.u8()?;
        if major != FORMAT_VERSION_MAJOR {
            return Err(GvrsError::UnsupportedFormat(format!(
                "unsupported format version {major}"
            )));
        }
        let checksums_enabled = cursor.u8()? != 0;
        let _reserved = cursor.u8()?;
        let n_rows = cursor.u32()?;
        let n_cols = cursor.u32()?;
        let tile_rows = cursor.u32()?;
        let tile_cols = cursor.u32()?;

        let n_elements = cursor.u16()?;
        let mut elements = Vec::with_capacity(n_elements as usize);
        for _ in 0..n_elements {
            let name = cursor.string()?;
            let tag = cursor.u8()?;
            let data_type = DataType::from_tag(tag)?;
            let min = cursor.f64()?;
            let max = cursor.f64()?;
            let fill = cursor.f64()?;
            let scale = cursor.f64()?;
            let offset = cursor.f64()?;
            let description = cursor.string()?;
            let label = cursor.string()?;
            let units = cursor.string()?;
            if name.len() > MAX_ELEMENT_NAME_LEN {
                return Err(GvrsError::corrupt(0, "element name too long"));
            }
            let spec = rebuild_element_spec(name, data_type, min, max, fill, scale, offset)?
                .with_description(description)
                .with_label(label)
                .with_units(units);
            elements.push(spec);
        }

        let n_codecs = cursor.u16()?;
        let mut codecs = Vec::with_capacity(n_codecs as usize);
        for _ in 0..n_codecs {
            let name = cursor.string()?;
            if name.len() > MAX_CODEC_NAME_LEN {
                return Err(GvrsError::corrupt(0, "codec name too long"));
            }
            let hint = cursor.string()?;
            codecs.push(CodecRecord { name, hint });
        }

        let directory_record_offset = cursor.u64()?;

        let body_end = cursor.pos as u64;
        let computed = crc32c(&probe[..body_end as usize]);
        let stored_crc = u32::from_le_bytes(
            cursor.take(4)?.try_into().expect("4 bytes"),
        );
        if computed != stored_crc {
            return Err(GvrsError::corrupt(0, "header CRC-32C mismatch"));
        }

        let unpadded = body_end + 4;
        let header_size = round_up_8(unpadded);

        let header = FileHeader {
            checksums_enabled,
            n_rows,
            n_cols,
            tile_rows,
            tile_cols,
            elements,
            codecs,
            directory_record_offset,
        };
        Ok((header, header_size))
    }
}

fn rebuild_element_spec(
    name: String,
    data_type: DataType,
    min: f64,
    max: f64,
    fill: f64,
    scale: f64,
    offset: f64,
) -> GvrsResult<ElementSpec> {
    match data_type {
        DataType::Int32 => ElementSpec::int32(name, min as i32, max as i32, fill as i32),
        DataType::Int16 => ElementSpec::int16(name, min as i16, max as i16, fill as i16),
        DataType::Float32 => ElementSpec::float32(name, min as f32, max as f32, fill as f32),
        DataType::IntCodedFloat32 => {
            ElementSpec::int_coded_float32(name, min as f32, max as f32, fill as f32, scale, offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::braf::BufferedRandomAccessFile;
    use std::io::Cursor;

    fn sample_header() -> FileHeader {
        FileHeader {
            checksums_enabled: true,
            n_rows: 1000,
            n_cols: 2000,
            tile_rows: 64,
            tile_cols: 64,
            elements: vec![
                ElementSpec::float32("z", -500.0, 9000.0, f32::NAN).unwrap(),
                ElementSpec::int_coded_float32("temp", -40.0, 60.0, -9999.0, 10.0, 0.0).unwrap(),
            ],
            codecs: vec![CodecRecord {
                name: "gvrs-deflate".into(),
                hint: String::new(),
            }],
            directory_record_offset: 0,
        }
    }

    #[test]
    fn write_read_round_trip() {
        let header = sample_header();
        let mut store = BufferedRandomAccessFile::new(Cursor::new(Vec::<u8>::new()));
        let header_size = header.write(&mut store).unwrap();
        assert_eq!(header_size % 8, 0);

        let (restored, restored_size) = FileHeader::read(&mut store).unwrap();
        assert_eq!(header_size, restored_size);
        assert_eq!(restored.n_rows, 1000);
        assert_eq!(restored.n_cols, 2000);
        assert_eq!(restored.elements.len(), 2);
        assert_eq!(restored.elements[0].name(), "z");
        assert_eq!(restored.codecs[0].name, "gvrs-deflate");
        assert_eq!(restored.n_rows_of_tiles(), 1000_u32.div_ceil(64));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut store = BufferedRandomAccessFile::new(Cursor::new(vec![0u8; 64]));
        let err = FileHeader::read(&mut store).unwrap_err();
        assert!(matches!(err, GvrsError::UnsupportedFormat(_)));
    }

    #[test]
    fn detects_header_corruption() {
        let header = sample_header();
        let mut store = BufferedRandomAccessFile::new(Cursor::new(Vec::<u8>::new()));
        header.write(&mut store).unwrap();

        store.seek_to(20).unwrap();
        let b = store.read_u8().unwrap();
        store.seek_to(20).unwrap();
        store.write_u8(b ^ 0x01).unwrap();

        let err = FileHeader::read(&mut store).unwrap_err();
        assert!(matches!(err, GvrsError::CorruptRecord { .. }));
    }
}
