//! Chunked, checksummed transport of files and spreadsheet regions over a
//! sequence of optical codes.
//!
//! The pipeline is symmetric:
//!
//! - encode: artifact → canonical bytes → [`frame`] (zlib + CRC32) → [`split`] → fragment texts
//! - decode: scanned texts → [`reassemble`] → [`frame`] verify/decompress → artifact
//!
//! Rendering fragments as optical patterns and decoding them from images is an
//! external concern; see [`acquire`] for the contracts.

pub mod acquire;
pub mod codec;
pub mod config;
mod error;
pub mod frame;
pub mod fsutil;
pub mod jobs;
pub mod progress;
pub mod reassemble;
pub mod snapshot;
pub mod split;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use codec::{Artifact, RestoreFailure, Restored, TransportCodec, FILE_MODE_MARKER};
pub use config::{ConfigError, RegionDefaults, TransportConfig};
pub use error::{Result, TransportError};
pub use frame::IntegrityFrame;
pub use progress::{CancellationToken, NoProgress, ProgressObserver};
pub use reassemble::{combine, CombinedPayload, FragmentSet, InsertOutcome};
pub use snapshot::{CaptureOptions, CellRecord, RegionSnapshot, SnapshotMeta};
pub use split::{split, Fragment, FragmentPosition};

/// Discriminates a raw-file payload from a region-snapshot payload.
///
/// The wire names (`file` / `region`) appear verbatim in fragment headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    File,
    Region,
}

impl PayloadMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            PayloadMode::File => "file",
            PayloadMode::Region => "region",
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadMode {
    type Err = UnknownPayloadMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(PayloadMode::File),
            "region" => Ok(PayloadMode::Region),
            _ => Err(UnknownPayloadMode),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownPayloadMode;

impl fmt::Display for UnknownPayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown payload mode")
    }
}

impl std::error::Error for UnknownPayloadMode {}

/// Canonical byte content ready for splitting, plus its kind.
///
/// For file payloads `bytes` already includes the [`FILE_MODE_MARKER`] prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    mode: PayloadMode,
    bytes: Vec<u8>,
}

impl Payload {
    pub fn new(mode: PayloadMode, bytes: Vec<u8>) -> Self {
        Self { mode, bytes }
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_wire_names_round_trip() {
        for mode in [PayloadMode::File, PayloadMode::Region] {
            assert_eq!(mode.as_str().parse::<PayloadMode>(), Ok(mode));
        }
        assert_eq!("REGION".parse::<PayloadMode>(), Err(UnknownPayloadMode));
    }
}
