//! Crate-wide error type.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type GvrsResult<T> = Result<T, GvrsError>;

/// Everything that can go wrong while opening, reading from, or writing to
/// a GVRS file.
#[derive(Debug, Error)]
pub enum GvrsError {
    /// The underlying storage (the BRAF) failed a read, write, or seek.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record's framing was invalid, or its CRC-32C trailer did not match.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord {
        /// Byte offset of the record that failed validation.
        offset: u64,
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// The file's magic number or version is not one this crate understands.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// An element name, range, or tile/grid shape violated a format
    /// constraint.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A mutating operation was attempted on a file opened read-only.
    #[error("file is not open for writing")]
    NotOpenForWriting,

    /// A written value was rejected by the element's range or NaN policy.
    #[error("value out of range for element {element}: {value}")]
    ValueOutOfRange {
        /// Name of the element the write targeted.
        element: String,
        /// String form of the rejected value.
        value: String,
    },

    /// A tile used a codec tag whose decoder is not registered.
    #[error("codec missing: tag {tag} has no decoder registered")]
    CodecMissing {
        /// The codec tag byte found in the tile payload.
        tag: u8,
    },

    /// A prior unrecoverable error has poisoned this file handle; it now
    /// refuses all further mutations.
    #[error("file handle is poisoned by a prior fatal error")]
    Poisoned,
}

impl GvrsError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        GvrsError::CorruptRecord {
            offset,
            reason: reason.into(),
        }
    }
}
