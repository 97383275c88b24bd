//! Reassembling scanned fragment texts into the framed blob.
//!
//! Input order does not matter and exact duplicates are tolerated; anything
//! contradictory is rejected instead of guessed at.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::progress::CancellationToken;
use crate::split::{HEADER_PREFIX, MAX_FRAGMENTS};
use crate::{PayloadMode, Result, TransportError};

/// Bytes recovered from a fragment collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedPayload {
    pub bytes: Vec<u8>,
    /// Mode announced by the fragment headers (`None` for a single code).
    pub mode: Option<PayloadMode>,
    pub format_version: Option<u32>,
    pub fragment_count: usize,
}

/// Result of offering one text to a [`FragmentSet`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, PartialEq, Eq)]
struct FragmentHeader {
    index: u32,
    total: u32,
    format_version: u32,
    mode: PayloadMode,
}

fn malformed(text: &str, reason: &'static str) -> TransportError {
    TransportError::MalformedFragmentHeader {
        fragment: text.to_string(),
        reason,
    }
}

fn parse_decimal(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse `QR:<i>/<total>|v<version>|<mode>|<segment>`.
fn parse_header(text: &str) -> Result<(FragmentHeader, &str)> {
    let mut parts = text.splitn(4, '|');
    let (Some(position), Some(version), Some(mode), Some(segment)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed(text, "expected 4 '|'-separated parts"));
    };

    let position = position.strip_prefix(HEADER_PREFIX).unwrap_or(position);
    let (index, total) = position
        .split_once('/')
        .ok_or_else(|| malformed(text, "position is not <index>/<total>"))?;
    let index = parse_decimal(index).ok_or_else(|| malformed(text, "invalid index"))?;
    let total = parse_decimal(total).ok_or_else(|| malformed(text, "invalid total"))?;
    if total == 0 || index == 0 || index > total {
        return Err(malformed(text, "index out of range"));
    }
    if total > MAX_FRAGMENTS {
        return Err(malformed(text, "total out of range"));
    }

    let format_version = version
        .strip_prefix('v')
        .and_then(parse_decimal)
        .ok_or_else(|| malformed(text, "invalid version"))?;
    let mode = mode
        .parse::<PayloadMode>()
        .map_err(|_| malformed(text, "unknown mode"))?;

    Ok((
        FragmentHeader {
            index,
            total,
            format_version,
            mode,
        },
        segment,
    ))
}

/// An incrementally filled, unordered collection of fragments.
///
/// Suitable for acquisition loops: feed texts as they are scanned and use
/// [`missing`](Self::missing) to tell the user which codes to rescan.
#[derive(Clone, Debug, Default)]
pub struct FragmentSet {
    single: Option<String>,
    total: Option<u32>,
    mode: Option<PayloadMode>,
    format_version: Option<u32>,
    segments: BTreeMap<u32, String>,
}

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one scanned text. Surrounding whitespace is ignored.
    pub fn insert(&mut self, text: &str) -> Result<InsertOutcome> {
        let text = text.trim();
        if !text.starts_with(HEADER_PREFIX) {
            return self.insert_single(text);
        }
        if self.single.is_some() {
            return Err(TransportError::AmbiguousFragmentSet);
        }

        let (header, segment) = parse_header(text)?;
        self.check_consistent(&header)?;

        match self.segments.get(&header.index) {
            Some(existing) if existing == segment => Ok(InsertOutcome::Duplicate),
            Some(_) => Err(TransportError::InconsistentFragmentSet(format!(
                "fragment {} received twice with different content",
                header.index
            ))),
            None => {
                self.total = Some(header.total);
                self.mode = Some(header.mode);
                self.format_version = Some(header.format_version);
                self.segments.insert(header.index, segment.to_string());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn insert_single(&mut self, text: &str) -> Result<InsertOutcome> {
        if !self.segments.is_empty() {
            return Err(TransportError::AmbiguousFragmentSet);
        }
        match &self.single {
            Some(existing) if existing == text => Ok(InsertOutcome::Duplicate),
            Some(_) => Err(TransportError::AmbiguousFragmentSet),
            None => {
                self.single = Some(text.to_string());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn check_consistent(&self, header: &FragmentHeader) -> Result<()> {
        let conflict = |what: &str, seen: String, got: String| {
            Err(TransportError::InconsistentFragmentSet(format!(
                "{what} {got} in fragment {} conflicts with {seen}",
                header.index
            )))
        };
        if let Some(total) = self.total.filter(|t| *t != header.total) {
            return conflict("total", total.to_string(), header.total.to_string());
        }
        if let Some(mode) = self.mode.filter(|m| *m != header.mode) {
            return conflict("mode", mode.to_string(), header.mode.to_string());
        }
        if let Some(version) = self.format_version.filter(|v| *v != header.format_version) {
            return conflict(
                "version",
                version.to_string(),
                header.format_version.to_string(),
            );
        }
        Ok(())
    }

    /// Number of distinct fragments received.
    pub fn received(&self) -> usize {
        if self.single.is_some() {
            1
        } else {
            self.segments.len()
        }
    }

    /// Announced total, once any header-bearing fragment has been seen.
    pub fn total(&self) -> Option<u32> {
        match self.single {
            Some(_) => Some(1),
            None => self.total,
        }
    }

    /// Indices in `1..=total` not received yet, ascending.
    pub fn missing(&self) -> Vec<u32> {
        match self.total {
            Some(total) if self.single.is_none() => (1..=total)
                .filter(|i| !self.segments.contains_key(i))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.single.is_some()
            || self
                .total
                .is_some_and(|total| self.segments.len() == total as usize)
    }

    /// Decode and concatenate all segments in index order.
    pub fn assemble(&self) -> Result<CombinedPayload> {
        if let Some(single) = &self.single {
            let bytes = STANDARD
                .decode(single)
                .map_err(|_| TransportError::InvalidFragmentEncoding { index: 1 })?;
            return Ok(CombinedPayload {
                bytes,
                mode: None,
                format_version: None,
                fragment_count: 1,
            });
        }

        if self.total.is_none() {
            return Err(TransportError::NoFragments);
        }
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(TransportError::MissingFragments(missing));
        }

        let mut bytes = Vec::new();
        for (index, segment) in &self.segments {
            STANDARD
                .decode_vec(segment, &mut bytes)
                .map_err(|_| TransportError::InvalidFragmentEncoding { index: *index })?;
        }
        log::debug!(
            "combined {} fragments into {} bytes",
            self.segments.len(),
            bytes.len()
        );
        Ok(CombinedPayload {
            bytes,
            mode: self.mode,
            format_version: self.format_version,
            fragment_count: self.segments.len(),
        })
    }
}

/// Combine scanned texts (any order, duplicates allowed) into the framed blob.
pub fn combine<I, S>(texts: I) -> Result<CombinedPayload>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    combine_cancellable(texts, &CancellationToken::new())
}

/// [`combine`], polling `cancel` between fragments.
pub fn combine_cancellable<I, S>(texts: I, cancel: &CancellationToken) -> Result<CombinedPayload>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = FragmentSet::new();
    for text in texts {
        cancel.check()?;
        set.insert(text.as_ref())?;
    }
    set.assemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fragment(index: u32, total: u32, data: &[u8]) -> String {
        format!("QR:{index}/{total}|v8|file|{}", STANDARD.encode(data))
    }

    #[test]
    fn parses_wire_header() {
        let (header, segment) = parse_header("QR:2/7|v8|region|AAEC").unwrap();
        assert_eq!(
            header,
            FragmentHeader {
                index: 2,
                total: 7,
                format_version: 8,
                mode: PayloadMode::Region,
            }
        );
        assert_eq!(segment, "AAEC");
    }

    #[test]
    fn rejects_malformed_headers() {
        let cases = [
            ("QR:1/2|v8|file", "expected 4 '|'-separated parts"),
            ("QR:12|v8|file|AA==", "position is not <index>/<total>"),
            ("QR:x/2|v8|file|AA==", "invalid index"),
            ("QR:1/+2|v8|file|AA==", "invalid total"),
            ("QR:3/2|v8|file|AA==", "index out of range"),
            ("QR:0/2|v8|file|AA==", "index out of range"),
            ("QR:1/4294967295|v8|file|AA==", "total out of range"),
            ("QR:1/65537|v8|file|AA==", "total out of range"),
            ("QR:1/2|8|file|AA==", "invalid version"),
            ("QR:1/2|v8|zip|AA==", "unknown mode"),
        ];
        for (text, reason) in cases {
            assert_eq!(
                combine([text]).unwrap_err(),
                malformed(text, reason),
                "{text}"
            );
        }
    }

    #[test]
    fn reassembles_in_index_order() {
        let texts = [
            fragment(3, 3, b"ghi"),
            fragment(1, 3, b"abc"),
            fragment(2, 3, b"def"),
        ];
        let combined = combine(&texts).unwrap();
        assert_eq!(combined.bytes, b"abcdefghi");
        assert_eq!(combined.mode, Some(PayloadMode::File));
        assert_eq!(combined.format_version, Some(8));
        assert_eq!(combined.fragment_count, 3);
    }

    #[test]
    fn segments_are_decoded_individually() {
        // Slices whose length is not a multiple of 3 carry padding mid-stream.
        let texts = [fragment(1, 2, b"ab"), fragment(2, 2, b"cd")];
        assert_eq!(combine(&texts).unwrap().bytes, b"abcd");
    }

    #[test]
    fn reports_missing_fragments() {
        let texts: Vec<String> = [1, 2, 4, 5].iter().map(|&i| fragment(i, 5, b"x")).collect();
        assert_eq!(
            combine(&texts).unwrap_err(),
            TransportError::MissingFragments(vec![3])
        );
    }

    #[test]
    fn tracks_progress_incrementally() {
        let mut set = FragmentSet::new();
        assert_eq!(set.total(), None);
        assert!(!set.is_complete());

        assert_eq!(set.insert(&fragment(2, 3, b"b")).unwrap(), InsertOutcome::Inserted);
        assert_eq!(set.insert(&fragment(2, 3, b"b")).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(set.received(), 1);
        assert_eq!(set.total(), Some(3));
        assert_eq!(set.missing(), vec![1, 3]);

        set.insert(&fragment(1, 3, b"a")).unwrap();
        set.insert(&format!("  {}\n", fragment(3, 3, b"c"))).unwrap();
        assert!(set.is_complete());
        assert_eq!(set.assemble().unwrap().bytes, b"abc");
    }

    #[test]
    fn conflicting_fragments_are_rejected() {
        let err = combine([fragment(1, 2, b"a"), fragment(1, 2, b"z")]).unwrap_err();
        assert!(matches!(err, TransportError::InconsistentFragmentSet(_)));

        let err = combine([fragment(1, 2, b"a"), fragment(2, 3, b"b")]).unwrap_err();
        assert!(matches!(err, TransportError::InconsistentFragmentSet(_)));

        let err = combine(["QR:1/2|v8|file|AA==", "QR:2/2|v7|file|AA=="]).unwrap_err();
        assert!(matches!(err, TransportError::InconsistentFragmentSet(_)));

        let err = combine(["QR:1/2|v8|file|AA==", "QR:2/2|v8|region|AA=="]).unwrap_err();
        assert!(matches!(err, TransportError::InconsistentFragmentSet(_)));
    }

    #[test]
    fn single_payloads() {
        let single = STANDARD.encode(b"whole");
        let combined = combine([single.as_str(), single.as_str()]).unwrap();
        assert_eq!(combined.bytes, b"whole");
        assert_eq!(combined.mode, None);
        assert_eq!(combined.fragment_count, 1);

        let other = STANDARD.encode(b"other");
        assert_eq!(
            combine([single.as_str(), other.as_str()]).unwrap_err(),
            TransportError::AmbiguousFragmentSet
        );
        assert_eq!(
            combine([single.clone(), fragment(1, 1, b"x")]).unwrap_err(),
            TransportError::AmbiguousFragmentSet
        );
        assert_eq!(
            combine([fragment(1, 1, b"x"), single]).unwrap_err(),
            TransportError::AmbiguousFragmentSet
        );
    }

    #[test]
    fn invalid_base64_names_the_fragment() {
        let err = combine([fragment(1, 2, b"a"), "QR:2/2|v8|file|!!!".to_string()]).unwrap_err();
        assert_eq!(err, TransportError::InvalidFragmentEncoding { index: 2 });

        let err = combine(["not base64 at all"]).unwrap_err();
        assert_eq!(err, TransportError::InvalidFragmentEncoding { index: 1 });
    }

    #[test]
    fn empty_input_has_nothing_to_combine() {
        assert_eq!(
            combine(Vec::<String>::new()).unwrap_err(),
            TransportError::NoFragments
        );
    }

    #[test]
    fn cancellation_is_honoured() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            combine_cancellable([fragment(1, 1, b"a")], &cancel).unwrap_err(),
            TransportError::Cancelled
        );
    }
}
