//! `formula-model` defines the in-memory spreadsheet document used by the QR
//! transport: workbooks, worksheets, sparse cells, styles and merged regions.
//!
//! It is the spreadsheet side of the region transport:
//! - region capture reads values/styles/merges from a [`Workbook`]
//! - restore materializes a new [`Workbook`] from a captured region
//! - the CLI persists workbooks as JSON via `serde`

mod address;
mod cell;
mod merge;
mod sheet_name;
mod style;
mod value;
mod workbook;
mod worksheet;

pub use address::{A1ParseError, CellRef, Range, RangeIter, RangeParseError};
pub use cell::{Cell, CellKey, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
pub use merge::{MergeError, MergedRegion, MergedRegions};
pub use sheet_name::{
    sheet_name_eq_case_insensitive, truncate_sheet_name, EXCEL_MAX_SHEET_NAME_LEN,
};
pub use style::{
    Alignment, Border, BorderEdge, BorderStyle, Color, Fill, FillPattern, Font,
    HorizontalAlignment, Style, StyleTable, VerticalAlignment,
};
pub use value::CellValue;
pub use workbook::Workbook;
pub use worksheet::{Worksheet, WorksheetId};

/// Current serialization schema version of [`Workbook`].
pub const SCHEMA_VERSION: u32 = 1;
