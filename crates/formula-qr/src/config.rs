//! Transport configuration and its JSON persistence.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum characters per optical code.
pub const DEFAULT_CAPACITY: usize = 1800;

/// Smallest capacity accepted from a configuration file.
pub const MIN_CONFIGURED_CAPACITY: usize = 1000;

/// Snapshot format version written by this build.
pub const DEFAULT_FORMAT_VERSION: u32 = 8;

/// Raw files above this size must be sent as regions instead.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_REGION: &str = "A1:D10";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Last region selection, remembered between runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionDefaults {
    pub last_region: String,
    /// Empty selects the active sheet.
    pub last_sheet: String,
}

impl Default for RegionDefaults {
    fn default() -> Self {
        Self {
            last_region: DEFAULT_REGION.to_string(),
            last_sheet: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum characters per code.
    ///
    /// Default: 1800
    pub capacity: usize,

    /// Format version stamped on new fragments and snapshots.
    ///
    /// Default: 8
    pub format_version: u32,

    /// File-mode size ceiling in bytes.
    ///
    /// Default: 10 MiB
    pub max_file_bytes: u64,

    pub region: RegionDefaults,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            format_version: DEFAULT_FORMAT_VERSION,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            region: RegionDefaults::default(),
        }
    }
}

impl TransportConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::info!("no config at {display}, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: display,
                    source,
                })
            }
        };
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: display,
            source,
        })?;
        Ok(config.validated())
    }

    /// Replace out-of-range values with defaults, logging each replacement.
    pub fn validated(mut self) -> Self {
        if self.capacity < MIN_CONFIGURED_CAPACITY {
            log::warn!(
                "configured capacity {} is below {MIN_CONFIGURED_CAPACITY}; using {DEFAULT_CAPACITY}",
                self.capacity
            );
            self.capacity = DEFAULT_CAPACITY;
        }
        self
    }

    /// Write as pretty JSON, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let display = path.display().to_string();
        let json = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Json {
            path: display.clone(),
            source,
        })?;
        crate::fsutil::atomic_write_bytes(path, &json).map_err(|source| ConfigError::Io {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.capacity, 1800);
        assert_eq!(config.format_version, 8);
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.region.last_region, "A1:D10");
        assert_eq!(config.region.last_sheet, "");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"capacity": 2500, "region": {"last_sheet": "Data"}}"#)
                .unwrap();
        assert_eq!(config.capacity, 2500);
        assert_eq!(config.format_version, DEFAULT_FORMAT_VERSION);
        assert_eq!(config.region.last_region, DEFAULT_REGION);
        assert_eq!(config.region.last_sheet, "Data");
    }

    #[test]
    fn small_capacity_falls_back_to_default() {
        let config = TransportConfig {
            capacity: 999,
            ..TransportConfig::default()
        }
        .validated();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);

        let config = TransportConfig {
            capacity: MIN_CONFIGURED_CAPACITY,
            ..TransportConfig::default()
        }
        .validated();
        assert_eq!(config.capacity, MIN_CONFIGURED_CAPACITY);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("qr.json");

        assert_eq!(TransportConfig::load(&path).unwrap(), TransportConfig::default());

        let mut config = TransportConfig::default();
        config.capacity = 2200;
        config.region.last_region = "B2:C3".to_string();
        config.save(&path).unwrap();

        assert_eq!(TransportConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qr.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TransportConfig::load(&path),
            Err(ConfigError::Json { .. })
        ));
    }
}
