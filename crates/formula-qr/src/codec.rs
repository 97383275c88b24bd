//! End-to-end encode/decode of files and regions.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use formula_model::Workbook;
use thiserror::Error;

use crate::config::TransportConfig;
use crate::jobs::{JobKind, JobStore};
use crate::progress::{CancellationToken, ProgressObserver, ScaledProgress};
use crate::reassemble::combine_cancellable;
use crate::snapshot::{self, CaptureOptions, RegionSnapshot};
use crate::split::{split, Fragment};
use crate::{frame, Payload, PayloadMode, Result, TransportError};

/// Literal prefix placed in front of the integrity frame of a raw file.
pub const FILE_MODE_MARKER: &[u8] = b"FILE_MODE:";

/// File name used by [`RestoreFailure::write_diagnostics`].
pub const DIAGNOSTIC_FILE_NAME: &str = "restore_debug.dat";

/// Something to send.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    File { name: String, bytes: Vec<u8> },
    Region(RegionSnapshot),
}

/// Something received.
#[derive(Clone, Debug)]
pub enum Restored {
    File {
        bytes: Vec<u8>,
    },
    Region {
        snapshot: RegionSnapshot,
        workbook: Workbook,
    },
}

impl Restored {
    pub fn mode(&self) -> PayloadMode {
        match self {
            Restored::File { .. } => PayloadMode::File,
            Restored::Region { .. } => PayloadMode::Region,
        }
    }
}

/// A failed decode, keeping the combined bytes (when combining succeeded) so
/// they can be inspected offline.
#[derive(Debug, Error)]
#[error("restore failed: {error}")]
pub struct RestoreFailure {
    #[source]
    pub error: TransportError,
    pub combined: Option<Vec<u8>>,
}

impl RestoreFailure {
    fn before_combining(error: TransportError) -> Self {
        Self {
            error,
            combined: None,
        }
    }

    /// Write the combined bytes to `dir/restore_debug.dat`.
    ///
    /// Returns `None` when there was nothing combined to write.
    pub fn write_diagnostics(&self, dir: &Path) -> io::Result<Option<PathBuf>> {
        let Some(bytes) = &self.combined else {
            return Ok(None);
        };
        let path = dir.join(DIAGNOSTIC_FILE_NAME);
        crate::fsutil::atomic_write_bytes(&path, bytes)?;
        log::info!("wrote {} raw bytes to {}", bytes.len(), path.display());
        Ok(Some(path))
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransportCodec {
    config: TransportConfig,
    jobs: Option<Arc<JobStore>>,
}

impl TransportCodec {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, jobs: None }
    }

    /// Record every [`encode`](Self::encode) and [`decode`](Self::decode) as a
    /// job in `store`.
    pub fn with_jobs(mut self, store: Arc<JobStore>) -> Self {
        self.jobs = Some(store);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Run `work` with progress mirrored into a fresh job, when a store is set.
    fn tracked<T, E: fmt::Display>(
        &self,
        kind: JobKind,
        observer: &dyn ProgressObserver,
        work: impl FnOnce(&dyn ProgressObserver) -> Result<T, E>,
    ) -> Result<T, E> {
        let Some(store) = &self.jobs else {
            return work(observer);
        };
        let handle = store.create(kind);
        let outcome = work(&|percent: f32, message: &str| {
            observer.report(percent, message);
            handle.report(percent, message);
        });
        match &outcome {
            Ok(_) => handle.complete("done"),
            Err(err) => handle.fail(&err.to_string()),
        }
        outcome
    }

    /// Capture a region using the configured format version.
    pub fn capture_region(
        &self,
        workbook: &Workbook,
        source_name: &str,
        region: &str,
        sheet: Option<&str>,
        observer: &dyn ProgressObserver,
    ) -> Result<RegionSnapshot> {
        let options = CaptureOptions {
            source_name: source_name.to_string(),
            format_version: self.config.format_version,
        };
        snapshot::capture(workbook, region, sheet, &options, observer)
    }

    /// Canonical bytes of `artifact`, framed and ready to split.
    pub fn payload(&self, artifact: &Artifact) -> Result<Payload> {
        match artifact {
            Artifact::File { name, bytes } => {
                let size = bytes.len() as u64;
                if size > self.config.max_file_bytes {
                    return Err(TransportError::PayloadTooLarge {
                        size,
                        max: self.config.max_file_bytes,
                    });
                }
                let framed = frame::encode(bytes)?;
                let mut out = Vec::with_capacity(FILE_MODE_MARKER.len() + framed.len());
                out.extend_from_slice(FILE_MODE_MARKER);
                out.extend_from_slice(&framed);
                log::info!("file {name:?}: {size} bytes, {} framed", out.len());
                Ok(Payload::new(PayloadMode::File, out))
            }
            Artifact::Region(snapshot) => {
                if snapshot.meta.mode != PayloadMode::Region {
                    return Err(TransportError::ModeMismatch {
                        expected: PayloadMode::Region,
                        found: snapshot.meta.mode,
                    });
                }
                let bytes = snapshot::serialize_to_bytes(snapshot)?;
                let framed = frame::encode(&bytes)?;
                log::info!(
                    "region {} of {:?}: {} bytes, {} framed",
                    snapshot.meta.region,
                    snapshot.meta.sheet_name,
                    bytes.len(),
                    framed.len()
                );
                Ok(Payload::new(PayloadMode::Region, framed))
            }
        }
    }

    /// Serialize, frame and split `artifact`.
    pub fn encode(
        &self,
        artifact: &Artifact,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fragment>> {
        self.tracked(JobKind::Encode, observer, |observer| {
            self.encode_untracked(artifact, observer, cancel)
        })
    }

    fn encode_untracked(
        &self,
        artifact: &Artifact,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fragment>> {
        observer.report(0.0, "serializing");
        let payload = self.payload(artifact)?;
        cancel.check()?;
        observer.report(30.0, "compressed and checksummed");

        let fragments = split(
            payload.bytes(),
            self.config.capacity,
            self.config.format_version,
            payload.mode(),
            &ScaledProgress::new(observer, 30.0, 100.0),
            cancel,
        )?;
        log::info!(
            "encoded {} payload into {} fragment(s)",
            payload.mode(),
            fragments.len()
        );
        Ok(fragments)
    }

    /// Read and encode a file, refusing oversized files before reading them.
    pub fn encode_file_at(
        &self,
        path: &Path,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fragment>> {
        let size = std::fs::metadata(path)?.len();
        if size > self.config.max_file_bytes {
            return Err(TransportError::PayloadTooLarge {
                size,
                max: self.config.max_file_bytes,
            });
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(path)?;
        self.encode(&Artifact::File { name, bytes }, observer, cancel)
    }

    /// Combine scanned texts and restore the artifact they carry.
    pub fn decode<I, S>(
        &self,
        texts: I,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Restored, RestoreFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tracked(JobKind::Decode, observer, |observer| {
            self.decode_untracked(texts, observer, cancel)
        })
    }

    fn decode_untracked<I, S>(
        &self,
        texts: I,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Restored, RestoreFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        observer.report(0.0, "combining fragments");
        let combined =
            combine_cancellable(texts, cancel).map_err(RestoreFailure::before_combining)?;
        observer.report(
            40.0,
            &format!("combined {} fragment(s)", combined.fragment_count),
        );

        let restored = self.restore(&combined.bytes).and_then(|restored| {
            match combined.mode {
                Some(announced) if announced != restored.mode() => {
                    Err(TransportError::ModeMismatch {
                        expected: announced,
                        found: restored.mode(),
                    })
                }
                _ => Ok(restored),
            }
        });
        match restored {
            Ok(restored) => {
                observer.report(100.0, "restored");
                Ok(restored)
            }
            Err(error) => {
                log::error!("restore failed: {error}");
                Err(RestoreFailure {
                    error,
                    combined: Some(combined.bytes),
                })
            }
        }
    }

    /// Restore combined bytes, routing on the file-mode marker.
    pub fn restore(&self, combined: &[u8]) -> Result<Restored> {
        if let Some(framed) = combined.strip_prefix(FILE_MODE_MARKER) {
            let bytes = frame::decode(framed)?;
            log::info!("restored file of {} bytes", bytes.len());
            return Ok(Restored::File { bytes });
        }

        let bytes = frame::decode(combined)?;
        let snapshot = snapshot::deserialize_from_bytes(&bytes)?;
        let workbook = snapshot::materialize(&snapshot);
        log::info!(
            "restored region {} from {:?}",
            snapshot.meta.region,
            snapshot.meta.source_name
        );
        Ok(Restored::Region { snapshot, workbook })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoProgress;
    use formula_model::CellValue;

    fn texts(fragments: Vec<Fragment>) -> Vec<String> {
        fragments.into_iter().map(Fragment::into_text).collect()
    }

    fn small_codec() -> TransportCodec {
        TransportCodec::new(TransportConfig {
            capacity: 200,
            ..TransportConfig::default()
        })
    }

    #[test]
    fn file_round_trip() {
        let codec = small_codec();
        let bytes: Vec<u8> = (0..4096u32).map(|i| (i * 7919 % 256) as u8).collect();
        let artifact = Artifact::File {
            name: "blob.bin".to_string(),
            bytes: bytes.clone(),
        };
        let fragments = codec
            .encode(&artifact, &NoProgress, &CancellationToken::new())
            .unwrap();
        assert!(fragments.len() > 1);
        assert!(fragments.iter().all(|f| f.mode == PayloadMode::File));

        let restored = codec
            .decode(texts(fragments), &NoProgress, &CancellationToken::new())
            .unwrap();
        let Restored::File { bytes: out } = restored else {
            panic!("expected a file");
        };
        assert_eq!(out, bytes);
    }

    #[test]
    fn single_fragment_file_round_trip() {
        let codec = TransportCodec::default();
        let artifact = Artifact::File {
            name: "note.txt".to_string(),
            bytes: b"short note".to_vec(),
        };
        let fragments = codec
            .encode(&artifact, &NoProgress, &CancellationToken::new())
            .unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].is_single());

        let restored = codec
            .decode(texts(fragments), &NoProgress, &CancellationToken::new())
            .unwrap();
        assert!(matches!(restored, Restored::File { bytes } if bytes == b"short note"));
    }

    #[test]
    fn file_size_is_guarded() {
        let codec = TransportCodec::new(TransportConfig {
            max_file_bytes: 16,
            ..TransportConfig::default()
        });
        let artifact = Artifact::File {
            name: "big".to_string(),
            bytes: vec![0; 17],
        };
        assert_eq!(
            codec
                .encode(&artifact, &NoProgress, &CancellationToken::new())
                .unwrap_err(),
            TransportError::PayloadTooLarge { size: 17, max: 16 }
        );
    }

    #[test]
    fn region_round_trip() {
        let mut wb = Workbook::new();
        let id = wb.add_sheet("Sheet1");
        let sheet = wb.sheet_mut(id).unwrap();
        sheet.set_value_a1("A1", "header".into()).unwrap();
        sheet.set_value_a1("B2", 3.5.into()).unwrap();

        let codec = TransportCodec::default();
        let snapshot = codec
            .capture_region(&wb, "book.json", "A1:B2", None, &NoProgress)
            .unwrap();
        let fragments = codec
            .encode(&Artifact::Region(snapshot.clone()), &NoProgress, &CancellationToken::new())
            .unwrap();

        let Restored::Region {
            snapshot: restored,
            workbook,
        } = codec
            .decode(texts(fragments), &NoProgress, &CancellationToken::new())
            .unwrap()
        else {
            panic!("expected a region");
        };
        assert_eq!(restored, snapshot);
        assert_eq!(restored.meta.source_name, "book.json");
        let sheet = &workbook.sheets[0];
        assert_eq!(sheet.value_a1("A1").unwrap(), CellValue::from("header"));
        assert_eq!(sheet.value_a1("B2").unwrap(), CellValue::Number(3.5));
    }

    #[test]
    fn failure_keeps_combined_bytes() {
        let codec = TransportCodec::default();
        let junk = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"FILE_MODE:\x00\x00\x00\x00garbage",
        );
        let failure = codec
            .decode([junk], &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            failure.error,
            TransportError::ChecksumMismatch { .. }
        ));
        assert_eq!(
            failure.combined.as_deref(),
            Some(&b"FILE_MODE:\x00\x00\x00\x00garbage"[..])
        );

        let dir = tempfile::tempdir().unwrap();
        let path = failure.write_diagnostics(dir.path()).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), DIAGNOSTIC_FILE_NAME);
        assert_eq!(
            std::fs::read(path).unwrap(),
            b"FILE_MODE:\x00\x00\x00\x00garbage"
        );
    }

    #[test]
    fn missing_fragments_have_no_diagnostics() {
        let codec = small_codec();
        let artifact = Artifact::File {
            name: "x".to_string(),
            bytes: (0..2000u32).map(|i| (i * 13 % 256) as u8).collect(),
        };
        let mut fragments = texts(
            codec
                .encode(&artifact, &NoProgress, &CancellationToken::new())
                .unwrap(),
        );
        fragments.remove(0);

        let failure = codec
            .decode(fragments, &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(failure.error, TransportError::MissingFragments(vec![1]));
        assert_eq!(failure.combined, None);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(failure.write_diagnostics(dir.path()).unwrap(), None);
    }

    #[test]
    fn header_mode_must_match_payload() {
        let codec = small_codec();
        let artifact = Artifact::File {
            name: "x".to_string(),
            bytes: (0..2000u32).map(|i| (i * 13 % 256) as u8).collect(),
        };
        let relabelled: Vec<String> = texts(
            codec
                .encode(&artifact, &NoProgress, &CancellationToken::new())
                .unwrap(),
        )
        .into_iter()
        .map(|text| text.replacen("|file|", "|region|", 1))
        .collect();

        let failure = codec
            .decode(relabelled, &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            failure.error,
            TransportError::ModeMismatch {
                expected: PayloadMode::Region,
                found: PayloadMode::File
            }
        );
    }
    #[test]
    fn jobs_follow_encode_and_decode() {
        use crate::jobs::JobStatus;

        let store = JobStore::new();
        let codec = small_codec().with_jobs(Arc::clone(&store));
        let artifact = Artifact::File {
            name: "notes.txt".to_string(),
            bytes: (0..4096u32).map(|i| (i * 7919 % 256) as u8).collect(),
        };
        let fragments = codec
            .encode(&artifact, &NoProgress, &CancellationToken::new())
            .unwrap();
        let mut texts = texts(fragments);
        assert!(texts.len() > 1);
        texts.pop();
        let failure = codec
            .decode(&texts, &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(failure.error, TransportError::MissingFragments(_)));

        let jobs = store.list();
        assert_eq!(jobs.len(), 2);
        let encode = jobs.iter().find(|job| job.kind == JobKind::Encode).unwrap();
        assert_eq!(encode.status, JobStatus::Completed);
        assert_eq!(encode.progress, 100);
        let decode = jobs.iter().find(|job| job.kind == JobKind::Decode).unwrap();
        assert_eq!(decode.status, JobStatus::Failed);
        assert!(decode.message.contains("missing fragments"), "{}", decode.message);
    }

    #[test]
    fn caller_observer_still_sees_progress_when_tracked() {
        let codec = small_codec().with_jobs(JobStore::new());
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |percent: f32, _: &str| seen.lock().unwrap().push(percent);
        let artifact = Artifact::File {
            name: "a".to_string(),
            bytes: vec![1, 2, 3],
        };
        codec
            .encode(&artifact, &sink, &CancellationToken::new())
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
    }
}
