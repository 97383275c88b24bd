//! Integrity frame: `crc32(compressed) as u32 BE || zlib(payload)`.
//!
//! The checksum covers the *compressed* bytes so corruption is detected before
//! any decompression is attempted.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::{Result, TransportError};

/// Length of the big-endian CRC32 header.
pub const CHECKSUM_LEN: usize = 4;

/// A parsed (not necessarily verified) integrity frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityFrame {
    pub checksum: u32,
    pub compressed: Vec<u8>,
}

impl IntegrityFrame {
    /// Compress `payload` and compute the checksum over the compressed bytes.
    pub fn encode(payload: &[u8]) -> Result<Self> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        let compressed = encoder.finish()?;
        let checksum = crc32fast::hash(&compressed);
        log::debug!(
            "framed {} bytes into {} compressed bytes (crc32 {checksum:#010x})",
            payload.len(),
            compressed.len()
        );
        Ok(Self {
            checksum,
            compressed,
        })
    }

    /// Split framed bytes into checksum and body without verifying anything.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHECKSUM_LEN {
            return Err(TransportError::TooShort { len: bytes.len() });
        }
        let (head, body) = bytes.split_at(CHECKSUM_LEN);
        let checksum = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        Ok(Self {
            checksum,
            compressed: body.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHECKSUM_LEN + self.compressed.len());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.compressed);
        out
    }

    pub fn verify(&self) -> Result<()> {
        let actual = crc32fast::hash(&self.compressed);
        if actual != self.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Verify, then inflate the body.
    pub fn decompress(&self) -> Result<Vec<u8>> {
        self.verify()?;
        let mut out = Vec::new();
        ZlibDecoder::new(self.compressed.as_slice())
            .read_to_end(&mut out)
            .map_err(|err| TransportError::DecompressionFailure(err.to_string()))?;
        Ok(out)
    }
}

/// Frame `payload` and return the wire bytes.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    Ok(IntegrityFrame::encode(payload)?.to_bytes())
}

/// Verify and unwrap wire bytes produced by [`encode`].
pub fn decode(framed: &[u8]) -> Result<Vec<u8>> {
    IntegrityFrame::parse(framed)?.decompress()
}
