//! Splitting a framed blob into capacity-bounded fragment texts.
//!
//! Multi-fragment wire format (bit-exact):
//!
//! ```text
//! QR:<index>/<total>|v<version>|<mode>|<base64 slice>
//! ```
//!
//! A blob small enough for one code is emitted without any header; its text is
//! just the base64 of the blob.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::progress::{CancellationToken, ProgressObserver};
use crate::{PayloadMode, Result, TransportError};

pub const HEADER_PREFIX: &str = "QR:";

/// Largest fragment count a sequence may announce. A 10 MiB file at the
/// minimum configured capacity needs about 15 000 fragments.
pub const MAX_FRAGMENTS: u32 = 1 << 16;

/// Position of a fragment within a multi-fragment sequence (1-based).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FragmentPosition {
    pub index: u32,
    pub total: u32,
}

/// One rendered unit of the split stream.
///
/// Header-less single fragments keep their mode and version here, since the
/// text itself does not carry them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub position: Option<FragmentPosition>,
    pub format_version: u32,
    pub mode: PayloadMode,
    text: String,
}

impl Fragment {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_single(&self) -> bool {
        self.position.is_none()
    }

    /// Caption for a rendered code, e.g. `QR 3/12` or `Single QR`.
    pub fn label(&self) -> String {
        match self.position {
            Some(FragmentPosition { index, total }) => format!("QR {index}/{total}"),
            None => "Single QR".to_string(),
        }
    }
}

/// Negotiated slicing of a blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitPlan {
    Single,
    Chunked { chunk_len: usize, total: u32 },
}

/// Share of the capacity initially budgeted for raw bytes, in tenths.
const RAW_BUDGET_TENTHS: usize = 7;
/// Each backoff round keeps this many tenths of the previous budget.
const BACKOFF_TENTHS: usize = 9;

fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

fn header(position: FragmentPosition, format_version: u32, mode: PayloadMode) -> String {
    format!(
        "{HEADER_PREFIX}{}/{}|v{format_version}|{mode}|",
        position.index, position.total
    )
}

/// Find the largest slice length, starting from 70% of `capacity` and backing
/// off by 10% per round, for which every fragment text fits `capacity`.
pub fn plan(
    blob_len: usize,
    capacity: usize,
    format_version: u32,
    mode: PayloadMode,
) -> Result<SplitPlan> {
    let budget = capacity * RAW_BUDGET_TENTHS / 10;
    if blob_len <= budget && base64_len(blob_len) <= capacity {
        return Ok(SplitPlan::Single);
    }

    let mut chunk_len = budget;
    while chunk_len >= 1 {
        let total = u32::try_from(blob_len.div_ceil(chunk_len))
            .ok()
            .filter(|total| *total <= MAX_FRAGMENTS)
            .ok_or(TransportError::CapacityTooSmall { capacity })?;
        if longest_fragment(blob_len, chunk_len, total, format_version, mode) <= capacity {
            log::debug!(
                "split plan: {blob_len} bytes into {total} fragments of {chunk_len} raw bytes (capacity {capacity})"
            );
            return Ok(SplitPlan::Chunked { chunk_len, total });
        }
        chunk_len = chunk_len * BACKOFF_TENTHS / 10;
    }

    Err(TransportError::CapacityTooSmall { capacity })
}

/// Exact length of the longest fragment text for a given slicing.
///
/// Only two fragments can be longest: the last full slice (widest index with a
/// full payload) and the final, possibly short, slice.
fn longest_fragment(
    blob_len: usize,
    chunk_len: usize,
    total: u32,
    format_version: u32,
    mode: PayloadMode,
) -> usize {
    let header_len =
        |index| header(FragmentPosition { index, total }, format_version, mode).len();
    let last_len = blob_len - (total as usize - 1) * chunk_len;
    let last = header_len(total) + base64_len(last_len);
    if total > 1 {
        last.max(header_len(total - 1) + base64_len(chunk_len))
    } else {
        last
    }
}

/// Split `blob` into fragments whose texts never exceed `capacity`.
///
/// Fragments are returned in ascending index order. The observer is called
/// once per fragment; cancellation is polled between fragments.
pub fn split(
    blob: &[u8],
    capacity: usize,
    format_version: u32,
    mode: PayloadMode,
    observer: &dyn ProgressObserver,
    cancel: &CancellationToken,
) -> Result<Vec<Fragment>> {
    cancel.check()?;
    let (chunk_len, total) = match plan(blob.len(), capacity, format_version, mode)? {
        SplitPlan::Single => {
            observer.report(100.0, "generated single fragment");
            return Ok(vec![Fragment {
                position: None,
                format_version,
                mode,
                text: STANDARD.encode(blob),
            }]);
        }
        SplitPlan::Chunked { chunk_len, total } => (chunk_len, total),
    };

    let render = |index: u32, slice: &[u8]| {
        let position = FragmentPosition { index, total };
        let mut text = header(position, format_version, mode);
        STANDARD.encode_string(slice, &mut text);
        Fragment {
            position: Some(position),
            format_version,
            mode,
            text,
        }
    };
    render_all(blob, chunk_len, total, &render, observer, cancel)
}

#[cfg(not(feature = "parallel"))]
fn render_all(
    blob: &[u8],
    chunk_len: usize,
    total: u32,
    render: &(dyn Fn(u32, &[u8]) -> Fragment + Sync),
    observer: &dyn ProgressObserver,
    cancel: &CancellationToken,
) -> Result<Vec<Fragment>> {
    let mut fragments = Vec::with_capacity(total as usize);
    for (i, slice) in blob.chunks(chunk_len).enumerate() {
        cancel.check()?;
        let index = i as u32 + 1;
        fragments.push(render(index, slice));
        observer.report(
            100.0 * index as f32 / total as f32,
            &format!("generated fragment {index}/{total}"),
        );
    }
    Ok(fragments)
}

#[cfg(feature = "parallel")]
fn render_all(
    blob: &[u8],
    chunk_len: usize,
    total: u32,
    render: &(dyn Fn(u32, &[u8]) -> Fragment + Sync),
    observer: &dyn ProgressObserver,
    cancel: &CancellationToken,
) -> Result<Vec<Fragment>> {
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    let observer = crate::progress::SerializedObserver::new(observer);
    let done = AtomicU32::new(0);
    blob.par_chunks(chunk_len)
        .enumerate()
        .map(|(i, slice)| {
            cancel.check()?;
            let fragment = render(i as u32 + 1, slice);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            observer.report(
                100.0 * n as f32 / total as f32,
                &format!("generated fragment {n}/{total}"),
            );
            Ok(fragment)
        })
        .collect()
}
