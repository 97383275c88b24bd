//! Region snapshots: a rectangular slice of a worksheet (values, styles and
//! merges) with enough metadata to rebuild it elsewhere.

use chrono::{DateTime, Utc};
use formula_model::{
    truncate_sheet_name, CellRef, CellValue, Range, Style, Workbook, Worksheet, EXCEL_MAX_COLS,
    EXCEL_MAX_ROWS,
};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_FORMAT_VERSION;
use crate::progress::ProgressObserver;
use crate::{PayloadMode, Result, TransportError};

/// Oldest snapshot format this build can read.
pub const MIN_SUPPORTED_FORMAT_VERSION: u32 = 4;

/// Strings longer than this many characters are cut during capture.
pub const TRUNCATION_LIMIT: usize = 1000;

/// Appended to every truncated string so the loss is visible after restore.
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Restored sheet names are cut to this many characters.
pub const RESTORED_SHEET_NAME_LEN: usize = 30;

/// Sheet name used when the snapshot does not carry one.
pub const DEFAULT_RESTORED_SHEET_NAME: &str = "Restored";

/// Upper bound on `width * height` of a captured region.
pub const MAX_REGION_CELLS: u64 = 1 << 20;

/// One captured cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Name of the document the region was captured from.
    pub source_name: String,
    pub sheet_name: String,
    /// Normalized A1 range of the captured region in the source sheet.
    pub region: String,
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub mode: PayloadMode,
}

/// A captured region.
///
/// `rows` is row-major and exactly `height x width` of the source region.
/// `merged_ranges` are relative to the region origin (`A1`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub rows: Vec<Vec<CellRecord>>,
    #[serde(default)]
    pub merged_ranges: Vec<Range>,
    pub meta: SnapshotMeta,
}

impl RegionSnapshot {
    /// `(height, width)` of the captured grid.
    pub fn dimensions(&self) -> (usize, usize) {
        (
            self.rows.len(),
            self.rows.first().map_or(0, |row| row.len()),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureOptions {
    pub source_name: String,
    pub format_version: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            source_name: String::new(),
            format_version: DEFAULT_FORMAT_VERSION,
        }
    }
}

/// Parse a region expression such as `B2:C3`, `b2 : c3` or `D4`.
///
/// Letters are case-insensitive, all whitespace is ignored, and a single cell
/// becomes a 1x1 region. Absolute markers (`$`) are not accepted.
pub fn parse_region(expr: &str) -> Result<Range> {
    let invalid = || TransportError::InvalidRegionFormat(expr.to_string());

    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !compact.bytes().all(|b| b.is_ascii_alphanumeric() || b == b':') {
        return Err(invalid());
    }

    let (start, end) = compact.split_once(':').unwrap_or((&compact, &compact));
    let start = CellRef::from_a1(start).map_err(|_| invalid())?;
    let end = CellRef::from_a1(end).map_err(|_| invalid())?;
    Ok(Range::new(start, end))
}

/// Capture `region_spec` from a sheet of `workbook`.
///
/// `sheet` selects a sheet by name (case-insensitive); `None` or an empty name
/// selects the active sheet. Progress is reported in the `0..=50` range.
pub fn capture(
    workbook: &Workbook,
    region_spec: &str,
    sheet: Option<&str>,
    options: &CaptureOptions,
    observer: &dyn ProgressObserver,
) -> Result<RegionSnapshot> {
    let region = parse_region(region_spec)?;
    let cells = u64::from(region.width()) * u64::from(region.height());
    if cells > MAX_REGION_CELLS {
        return Err(TransportError::RegionTooLarge {
            cells,
            max: MAX_REGION_CELLS,
        });
    }

    let worksheet = select_sheet(workbook, sheet)?;
    log::info!(
        "capturing {region} ({cells} cells) from sheet {:?}",
        worksheet.name
    );

    let height = region.height();
    let mut rows = Vec::with_capacity(height as usize);
    for (offset, row) in (region.start.row..=region.end.row).enumerate() {
        let record_row = (region.start.col..=region.end.col)
            .map(|col| capture_cell(workbook, worksheet, CellRef::new(row, col)))
            .collect();
        rows.push(record_row);

        let done = offset as f32 + 1.0;
        observer.report(
            50.0 * done / height as f32,
            &format!("captured row {}/{height}", offset + 1),
        );
    }

    Ok(RegionSnapshot {
        rows,
        merged_ranges: clip_merges(worksheet, region),
        meta: SnapshotMeta {
            source_name: options.source_name.clone(),
            sheet_name: worksheet.name.clone(),
            region: region.to_string(),
            format_version: options.format_version,
            created_at: Utc::now(),
            mode: PayloadMode::Region,
        },
    })
}

fn select_sheet<'a>(workbook: &'a Workbook, sheet: Option<&str>) -> Result<&'a Worksheet> {
    match sheet.filter(|name| !name.is_empty()) {
        Some(name) => workbook
            .sheet_by_name(name)
            .ok_or_else(|| TransportError::SheetNotFound(name.to_string())),
        None => workbook.active_sheet().ok_or(TransportError::EmptyWorkbook),
    }
}

fn capture_cell(workbook: &Workbook, worksheet: &Worksheet, cell: CellRef) -> CellRecord {
    let style = workbook
        .style(worksheet.style_id(cell))
        .filter(|style| !style.is_default())
        .cloned();
    CellRecord {
        value: truncate_value(worksheet.value(cell)),
        style,
    }
}

/// Merges that intersect `region`, clipped to it and moved to region-relative
/// coordinates. Clips that collapse to a single cell are dropped.
fn clip_merges(worksheet: &Worksheet, region: Range) -> Vec<Range> {
    worksheet
        .merged_regions()
        .iter()
        .filter_map(|merge| merge.range.intersection(&region))
        .filter(|clip| !clip.is_single_cell())
        .filter_map(|clip| clip.relative_to(region.start))
        .collect()
}

/// Cut strings longer than [`TRUNCATION_LIMIT`] characters and mark them.
pub fn truncate_value(value: CellValue) -> CellValue {
    match value {
        CellValue::String(s) if s.chars().count() > TRUNCATION_LIMIT => {
            let mut cut: String = s.chars().take(TRUNCATION_LIMIT).collect();
            cut.push_str(TRUNCATION_MARKER);
            CellValue::String(cut)
        }
        other => other,
    }
}

/// Canonical binary (CBOR) encoding of a snapshot.
pub fn serialize_to_bytes(snapshot: &RegionSnapshot) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(snapshot, &mut out)
        .map_err(|err| TransportError::SerializationFailure(err.to_string()))?;
    Ok(out)
}

/// Decode bytes produced by [`serialize_to_bytes`].
///
/// The mode tag and format version are checked before the cell grid is
/// decoded, so a foreign or outdated payload reports the precise reason.
pub fn deserialize_from_bytes(bytes: &[u8]) -> Result<RegionSnapshot> {
    #[derive(Deserialize)]
    struct Probe {
        meta: ProbeMeta,
    }

    #[derive(Deserialize)]
    struct ProbeMeta {
        mode: PayloadMode,
        format_version: u32,
    }

    let probe: Probe = ciborium::from_reader(bytes)
        .map_err(|err| TransportError::DeserializationFailure(err.to_string()))?;
    if probe.meta.mode != PayloadMode::Region {
        return Err(TransportError::ModeMismatch {
            expected: PayloadMode::Region,
            found: probe.meta.mode,
        });
    }
    if probe.meta.format_version < MIN_SUPPORTED_FORMAT_VERSION {
        return Err(TransportError::UnsupportedVersion {
            version: probe.meta.format_version,
            minimum: MIN_SUPPORTED_FORMAT_VERSION,
        });
    }

    let snapshot: RegionSnapshot = ciborium::from_reader(bytes)
        .map_err(|err| TransportError::DeserializationFailure(err.to_string()))?;
    check_shape(&snapshot).map_err(TransportError::DeserializationFailure)?;
    Ok(snapshot)
}

/// The grid must be a non-empty rectangle that fits a worksheet, agree with
/// the recorded region, and hold every merge.
fn check_shape(snapshot: &RegionSnapshot) -> Result<(), String> {
    let height = snapshot.rows.len();
    let width = snapshot.rows.first().map_or(0, Vec::len);
    if height == 0 || width == 0 {
        return Err("snapshot grid is empty".to_string());
    }
    if let Some(row) = snapshot.rows.iter().position(|row| row.len() != width) {
        return Err(format!(
            "row {} has {} cells, expected {width}",
            row + 1,
            snapshot.rows[row].len()
        ));
    }
    if height > EXCEL_MAX_ROWS as usize || width > EXCEL_MAX_COLS as usize {
        return Err(format!("{height}x{width} grid exceeds worksheet bounds"));
    }
    if (height as u64) * (width as u64) > MAX_REGION_CELLS {
        return Err(format!("{height}x{width} grid exceeds {MAX_REGION_CELLS} cells"));
    }

    if let Ok(region) = parse_region(&snapshot.meta.region) {
        if (region.height() as usize, region.width() as usize) != (height, width) {
            return Err(format!("region {region} does not match {height}x{width} grid"));
        }
    }

    let grid = (height as u32, width as u32);
    for merge in &snapshot.merged_ranges {
        let (start, end) = (merge.start, merge.end);
        if start.row > end.row || start.col > end.col || end.row >= grid.0 || end.col >= grid.1 {
            return Err(format!("merge {start:?}..{end:?} lies outside the grid"));
        }
    }
    Ok(())
}

/// Build a new single-sheet workbook holding the snapshot anchored at `A1`.
///
/// Merges are applied after the values; a merge that cannot be applied is
/// logged and skipped.
pub fn materialize(snapshot: &RegionSnapshot) -> Workbook {
    let mut workbook = Workbook::new();
    let mut name = truncate_sheet_name(&snapshot.meta.sheet_name, RESTORED_SHEET_NAME_LEN);
    if name.is_empty() {
        name = DEFAULT_RESTORED_SHEET_NAME.to_string();
    }
    let mut sheet = Worksheet::new(workbook.add_sheet(name.clone()), name);

    for (r, row) in snapshot.rows.iter().enumerate() {
        for (c, record) in row.iter().enumerate() {
            let (Ok(r), Ok(c)) = (u32::try_from(r), u32::try_from(c)) else {
                continue;
            };
            if r >= EXCEL_MAX_ROWS || c >= EXCEL_MAX_COLS {
                log::warn!("skipping cell outside worksheet bounds (row {r}, col {c})");
                continue;
            }
            let cell = CellRef::new(r, c);
            sheet.set_value(cell, record.value.clone());
            if let Some(style) = &record.style {
                let base = workbook
                    .style(sheet.style_id(cell))
                    .cloned()
                    .unwrap_or_default();
                let style_id = workbook.intern_style(style.overlay(&base));
                sheet.set_style_id(cell, style_id);
            }
        }
    }

    for range in &snapshot.merged_ranges {
        if let Err(err) = sheet.merge_range(*range) {
            log::warn!("skipping merge {range}: {err}");
        }
    }

    if let Some(slot) = workbook.sheets.first_mut() {
        *slot = sheet;
    }
    workbook
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoProgress;
    use formula_model::{Font, Style};
    use pretty_assertions::assert_eq;

    fn sample_workbook() -> Workbook {
        let mut wb = Workbook::new();
        let id = wb.add_sheet("Data");
        let bold = wb.intern_style(Style {
            font: Some(Font {
                bold: true,
                ..Font::default()
            }),
            ..Style::default()
        });
        let sheet = wb.sheet_mut(id).unwrap();
        sheet.set_value_a1("B2", 1.0.into()).unwrap();
        sheet.set_value_a1("C2", "x".into()).unwrap();
        sheet.set_value_a1("B3", 2.0.into()).unwrap();
        sheet.set_value_a1("C3", "y".into()).unwrap();
        sheet.set_style_id(CellRef::new(1, 1), bold);
        sheet.merge_range(Range::from_a1("B2:C2").unwrap()).unwrap();
        wb
    }

    #[test]
    fn parses_region_expressions() {
        let cases = [
            ("A1:D10", "A1:D10"),
            ("b2 : c3", "B2:C3"),
            (" d4 ", "D4"),
            ("C3:B2", "B2:C3"),
            ("AA10:ab12", "AA10:AB12"),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_region(input).unwrap().to_string(), expected, "{input}");
        }
        assert!(parse_region("D4").unwrap().is_single_cell());
    }

    #[test]
    fn rejects_malformed_regions() {
        for input in ["", "   ", "A", "1", "A0", "A1:", ":B2", "A1:B2:C3", "$A$1", "A1B", "A1;B2"] {
            assert_eq!(
                parse_region(input),
                Err(TransportError::InvalidRegionFormat(input.to_string())),
                "{input}"
            );
        }
    }

    #[test]
    fn captures_values_styles_and_clipped_merges() {
        let wb = sample_workbook();
        let snapshot = capture(&wb, "B2:C3", None, &CaptureOptions::default(), &NoProgress).unwrap();

        assert_eq!(snapshot.dimensions(), (2, 2));
        assert_eq!(snapshot.rows[0][0].value, CellValue::Number(1.0));
        assert_eq!(snapshot.rows[0][1].value, CellValue::from("x"));
        assert_eq!(snapshot.rows[1][0].value, CellValue::Number(2.0));
        assert_eq!(snapshot.rows[1][1].value, CellValue::from("y"));
        assert!(snapshot.rows[0][0].style.is_some());
        assert_eq!(snapshot.rows[0][1].style, None);
        assert_eq!(snapshot.merged_ranges, vec![Range::from_a1("A1:B1").unwrap()]);
        assert_eq!(snapshot.meta.region, "B2:C3");
        assert_eq!(snapshot.meta.sheet_name, "Data");
        assert_eq!(snapshot.meta.format_version, DEFAULT_FORMAT_VERSION);
        assert_eq!(snapshot.meta.mode, PayloadMode::Region);
    }

    #[test]
    fn merges_collapsing_to_one_cell_are_dropped() {
        let wb = sample_workbook();
        let snapshot = capture(&wb, "C2:D3", None, &CaptureOptions::default(), &NoProgress).unwrap();
        assert!(snapshot.merged_ranges.is_empty());
    }

    #[test]
    fn unknown_sheet_is_reported() {
        let wb = sample_workbook();
        let err = capture(&wb, "A1", Some("Missing"), &CaptureOptions::default(), &NoProgress)
            .unwrap_err();
        assert_eq!(err, TransportError::SheetNotFound("Missing".to_string()));

        let err = capture(&Workbook::new(), "A1", None, &CaptureOptions::default(), &NoProgress)
            .unwrap_err();
        assert_eq!(err, TransportError::EmptyWorkbook);
    }

    #[test]
    fn oversized_region_is_rejected() {
        let wb = sample_workbook();
        let err = capture(&wb, "A1:Z1048576", None, &CaptureOptions::default(), &NoProgress)
            .unwrap_err();
        assert!(matches!(err, TransportError::RegionTooLarge { .. }));
    }

    #[test]
    fn capture_reports_up_to_half() {
        let wb = sample_workbook();
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |percent: f32, _: &str| seen.lock().unwrap().push(percent);
        capture(&wb, "B2:C3", None, &CaptureOptions::default(), &sink).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![25.0, 50.0]);
    }

    #[test]
    fn long_strings_are_truncated_visibly() {
        let long = "a".repeat(TRUNCATION_LIMIT + 1);
        let CellValue::String(cut) = truncate_value(CellValue::String(long)) else {
            panic!("expected string");
        };
        assert_eq!(cut.chars().count(), TRUNCATION_LIMIT + TRUNCATION_MARKER.len());
        assert!(cut.ends_with(TRUNCATION_MARKER));

        let exact = "b".repeat(TRUNCATION_LIMIT);
        assert_eq!(
            truncate_value(CellValue::String(exact.clone())),
            CellValue::String(exact)
        );
        assert_eq!(truncate_value(CellValue::Number(3.0)), CellValue::Number(3.0));
    }

    #[test]
    fn bytes_round_trip() {
        let wb = sample_workbook();
        let snapshot = capture(&wb, "A1:D4", None, &CaptureOptions::default(), &NoProgress).unwrap();
        let bytes = serialize_to_bytes(&snapshot).unwrap();
        assert_eq!(deserialize_from_bytes(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn version_and_mode_are_gated() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "B2", None, &CaptureOptions::default(), &NoProgress).unwrap();

        snapshot.meta.format_version = 2;
        let err = deserialize_from_bytes(&serialize_to_bytes(&snapshot).unwrap()).unwrap_err();
        assert_eq!(
            err,
            TransportError::UnsupportedVersion {
                version: 2,
                minimum: MIN_SUPPORTED_FORMAT_VERSION
            }
        );

        snapshot.meta.format_version = DEFAULT_FORMAT_VERSION;
        snapshot.meta.mode = PayloadMode::File;
        let err = deserialize_from_bytes(&serialize_to_bytes(&snapshot).unwrap()).unwrap_err();
        assert_eq!(
            err,
            TransportError::ModeMismatch {
                expected: PayloadMode::Region,
                found: PayloadMode::File
            }
        );
    }

    fn shape_error(snapshot: &RegionSnapshot) -> String {
        match deserialize_from_bytes(&serialize_to_bytes(snapshot).unwrap()) {
            Err(TransportError::DeserializationFailure(reason)) => reason,
            other => panic!("expected a deserialization failure, got {other:?}"),
        }
    }

    #[test]
    fn ragged_grid_is_rejected() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "B2:C3", None, &CaptureOptions::default(), &NoProgress).unwrap();
        snapshot.rows[1].pop();
        assert_eq!(shape_error(&snapshot), "row 2 has 1 cells, expected 2");
    }

    #[test]
    fn grid_wider_than_a_worksheet_is_rejected() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "A1", None, &CaptureOptions::default(), &NoProgress).unwrap();
        snapshot.rows = vec![vec![CellRecord::default(); EXCEL_MAX_COLS as usize + 1]];
        snapshot.meta.region = String::new();
        assert_eq!(
            shape_error(&snapshot),
            format!("1x{} grid exceeds worksheet bounds", EXCEL_MAX_COLS + 1)
        );
    }

    #[test]
    fn grid_must_match_region_and_hold_merges() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "B2:C3", None, &CaptureOptions::default(), &NoProgress).unwrap();

        let mut wrong_region = snapshot.clone();
        wrong_region.meta.region = "A1:C3".to_string();
        assert_eq!(
            shape_error(&wrong_region),
            "region A1:C3 does not match 2x2 grid"
        );

        let mut empty = snapshot.clone();
        empty.rows.clear();
        assert_eq!(shape_error(&empty), "snapshot grid is empty");

        snapshot.merged_ranges.push(Range::from_a1("B2:C2").unwrap());
        assert!(shape_error(&snapshot).starts_with("merge "));
    }

    #[test]
    fn materialize_skips_cells_beyond_worksheet_bounds() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "A1", None, &CaptureOptions::default(), &NoProgress).unwrap();
        let mut row = vec![CellRecord::default(); EXCEL_MAX_COLS as usize + 1];
        row[0].value = CellValue::from("first");
        row[EXCEL_MAX_COLS as usize].value = CellValue::from("overflow");
        snapshot.rows = vec![row];

        let restored = materialize(&snapshot);
        let sheet = &restored.sheets[0];
        assert_eq!(sheet.value_a1("A1").unwrap(), CellValue::from("first"));
        assert_eq!(sheet.value_a1("A2").unwrap(), CellValue::Empty);
    }

    #[test]
    fn garbage_is_a_deserialization_failure() {
        assert!(matches!(
            deserialize_from_bytes(b"\xff\x00not cbor"),
            Err(TransportError::DeserializationFailure(_))
        ));
    }

    #[test]
    fn materialize_anchors_at_a1_and_truncates_sheet_name() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "B2:C3", None, &CaptureOptions::default(), &NoProgress).unwrap();
        snapshot.meta.sheet_name = "S".repeat(40);
        // Overlaps the first merge; skipped rather than failing the restore.
        snapshot.merged_ranges.push(Range::from_a1("B1:B2").unwrap());

        let restored = materialize(&snapshot);
        assert_eq!(restored.sheets.len(), 1);
        let sheet = &restored.sheets[0];
        assert_eq!(sheet.name, "S".repeat(RESTORED_SHEET_NAME_LEN));
        assert_eq!(sheet.value_a1("A1").unwrap(), CellValue::Number(1.0));
        assert_eq!(sheet.value_a1("B1").unwrap(), CellValue::from("x"));
        assert_eq!(sheet.value_a1("A2").unwrap(), CellValue::Number(2.0));
        assert_eq!(sheet.value_a1("B2").unwrap(), CellValue::from("y"));

        let bold = restored.style(sheet.style_id(CellRef::new(0, 0))).unwrap();
        assert!(bold.font.as_ref().unwrap().bold);

        let merges: Vec<Range> = sheet.merged_regions().iter().map(|m| m.range).collect();
        assert_eq!(merges, vec![Range::from_a1("A1:B1").unwrap()]);
    }

    #[test]
    fn empty_sheet_name_gets_a_default() {
        let wb = sample_workbook();
        let mut snapshot =
            capture(&wb, "B2", None, &CaptureOptions::default(), &NoProgress).unwrap();
        snapshot.meta.sheet_name.clear();
        assert_eq!(
            materialize(&snapshot).sheet_names(),
            vec![DEFAULT_RESTORED_SHEET_NAME]
        );
    }
}
