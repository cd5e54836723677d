//! Error types for DLG parsing and writing.

use thiserror::Error;

/// Result type alias for DLG operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for DLG operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrong file signature or version in the GFF header.
    #[error("Invalid GFF signature: expected {expected:?}, got {actual:?}")]
    InvalidSignature { expected: String, actual: String },

    /// Header fields that contradict each other.
    #[error("Invalid GFF layout: {0}")]
    InvalidFormat(String),

    /// A read would run past the end of the buffer.
    #[error("Read of {len} bytes at offset {offset} exceeds buffer size {size}")]
    BufferBoundaryViolation { offset: usize, len: usize, size: usize },

    /// A struct, field or label index outside its table.
    #[error("{table} index {index} out of bounds (table has {len} entries)")]
    InvalidIndex {
        table: &'static str,
        index: u32,
        len: usize,
    },

    /// The struct table is empty, so there is no root struct.
    #[error("GFF file has no root struct")]
    MissingRootStruct,

    /// Malformed XML interchange document.
    #[error("Invalid XML: {0}")]
    InvalidXml(String),
}
