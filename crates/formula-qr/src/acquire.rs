//! Contracts with the optical pattern codec, and scan collection.
//!
//! Rendering a text into a code image and detecting codes in an image are left
//! to implementations of [`PatternEncoder`] and [`PatternDecoder`]. This module
//! only deals with the texts they produce.

use std::collections::HashSet;

use crate::progress::{CancellationToken, ProgressObserver};
use crate::split::Fragment;
use crate::{Result, TransportError};

/// Symbology reported by a detector.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodeKind {
    QrCode,
    /// Anything else a detector may report (barcodes, data matrix, ...).
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedCode {
    pub kind: CodeKind,
    pub text: String,
}

impl ScannedCode {
    pub fn qr(text: impl Into<String>) -> Self {
        Self {
            kind: CodeKind::QrCode,
            text: text.into(),
        }
    }
}

/// Renders fragment texts as optical codes.
pub trait PatternEncoder {
    type Image;
    type Error: std::error::Error;

    /// Render `text` (at most `capacity` characters) with a human-readable caption.
    fn render(&self, text: &str, capacity: usize, label: &str) -> Result<Self::Image, Self::Error>;
}

/// Detects optical codes in an image or video frame.
pub trait PatternDecoder {
    type Error: std::error::Error;

    fn decode(&self, image: &[u8]) -> Result<Vec<ScannedCode>, Self::Error>;
}

/// Render every fragment, labelled with its position.
pub fn render_fragments<E: PatternEncoder>(
    encoder: &E,
    fragments: &[Fragment],
    capacity: usize,
) -> Result<Vec<E::Image>, E::Error> {
    fragments
        .iter()
        .map(|fragment| encoder.render(fragment.text(), capacity, &fragment.label()))
        .collect()
}

/// De-duplicates scanned texts, keeping first-seen order.
///
/// Only QR results are accepted; other symbologies are ignored.
#[derive(Clone, Debug, Default)]
pub struct ScanCollector {
    seen: HashSet<String>,
    texts: Vec<String>,
}

impl ScanCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `code` is a QR text not seen before.
    pub fn offer(&mut self, code: ScannedCode) -> bool {
        if code.kind != CodeKind::QrCode || self.seen.contains(&code.text) {
            return false;
        }
        self.seen.insert(code.text.clone());
        self.texts.push(code.text);
        true
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn into_texts(self) -> Vec<String> {
        self.texts
    }
}

/// Run `decoder` over a sequence of images (stills or video frames) and
/// collect the distinct QR texts found.
///
/// A frame the decoder cannot handle is logged and skipped. `frame_count`, if
/// known, drives percentage progress.
pub fn collect_from_images<D, I, B>(
    decoder: &D,
    images: I,
    frame_count: Option<usize>,
    observer: &dyn ProgressObserver,
    cancel: &CancellationToken,
) -> Result<Vec<String>>
where
    D: PatternDecoder,
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut collector = ScanCollector::new();
    let mut processed = 0usize;
    for image in images {
        cancel.check()?;
        processed += 1;
        match decoder.decode(image.as_ref()) {
            Ok(codes) => {
                for code in codes {
                    if collector.offer(code) {
                        let n = collector.len();
                        let percent = frame_count
                            .filter(|total| *total > 0)
                            .map_or(0.0, |total| 100.0 * processed as f32 / total as f32);
                        observer.report(percent.min(100.0), &format!("new code #{n}"));
                    }
                }
            }
            Err(err) => log::warn!("skipping frame {processed}: {err}"),
        }
    }

    log::info!(
        "scanned {processed} frames, found {} distinct codes",
        collector.len()
    );
    if collector.is_empty() {
        return Err(TransportError::NoFragments);
    }
    Ok(collector.into_texts())
}
