use thiserror::Error;

use crate::PayloadMode;

pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Every failure the transport core can report.
///
/// All variants are recoverable at the call boundary and carry enough detail to
/// drive a retry (e.g. [`TransportError::MissingFragments`] lists exactly which
/// codes to rescan).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid region format: {0:?}")]
    InvalidRegionFormat(String),

    #[error("sheet not found: {0:?}")]
    SheetNotFound(String),

    #[error("workbook has no sheets")]
    EmptyWorkbook,

    #[error("region too large: {cells} cells exceeds maximum {max}")]
    RegionTooLarge { cells: u64, max: u64 },

    #[error("payload too large: {size} bytes exceeds maximum {max} bytes; use region mode instead")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("framed data too short: {len} bytes")]
    TooShort { len: usize },

    #[error("checksum mismatch: expected {expected:#010x}, actual {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("decompression failed: {0}")]
    DecompressionFailure(String),

    #[error("serialization failed: {0}")]
    SerializationFailure(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailure(String),

    #[error("payload mode mismatch: expected {expected}, found {found}")]
    ModeMismatch {
        expected: PayloadMode,
        found: PayloadMode,
    },

    #[error("unsupported format version {version} (requires {minimum}+)")]
    UnsupportedVersion { version: u32, minimum: u32 },

    #[error("capacity {capacity} is too small to hold any fragment")]
    CapacityTooSmall { capacity: usize },

    #[error("malformed fragment header ({reason}): {fragment:?}")]
    MalformedFragmentHeader {
        fragment: String,
        reason: &'static str,
    },

    #[error("fragment {index} carries invalid base64 data")]
    InvalidFragmentEncoding { index: u32 },

    #[error("inconsistent fragment set: {0}")]
    InconsistentFragmentSet(String),

    #[error("ambiguous fragment set: single-code payloads cannot be mixed with other codes")]
    AmbiguousFragmentSet,

    #[error("incomplete data: missing fragments {0:?}")]
    MissingFragments(Vec<u32>),

    #[error("no fragments to combine")]
    NoFragments,

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}
