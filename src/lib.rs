//! GVRS: a random-access, disk-backed storage engine for very large 2D
//! raster grids, built from fixed-size tiles addressed through a directory
//! and a reusable, checksummed record stream.
//!
//! Typical use:
//!
//! ```no_run
//! use gvrs::{ElementSpec, GvrsFile, GvrsFileSpecification};
//!
//! # fn main() -> gvrs::GvrsResult<()> {
//! let spec = GvrsFileSpecification::new(1000, 1000, 64, 64)?
//!     .add_element(ElementSpec::float32("elevation", -500.0, 9000.0, f32::NAN)?)?;
//! let mut file = GvrsFile::create(std::path::Path::new("/tmp/example.gvrs"), &spec)?;
//! file.element("elevation")?.set(10, 10, 123.4)?;
//! file.close()?;
//! # Ok(())
//! # }
//! ```

mod accessor;
mod assistant;
mod braf;
mod cache;
mod checksum;
mod codec;
mod directory;
mod element;
mod error;
mod file;
mod header;
pub mod inspector;
mod record;
mod spec;
mod tile;

pub use accessor::ElementAccessor;
pub use assistant::BackgroundDecompressor;
pub use braf::{BufferedRandomAccessFile, RandomAccessStore};
pub use cache::CacheSize;
pub use codec::{CodecMaster, PlaneValues, TileDecoder, TileEncoder};
pub use element::{DataType, ElementSpec};
pub use error::{GvrsError, GvrsResult};
pub use file::GvrsFile;
pub use spec::GvrsFileSpecification;
pub use tile::Tile;

#[cfg(feature = "deflate")]
pub use codec::deflate::DeflateCodec;
