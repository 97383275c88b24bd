use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{CellRef, CellValue};

/// Excel-compatible maximum rows per worksheet (1,048,576).
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;

/// Excel-compatible maximum columns per worksheet (16,384).
pub const EXCEL_MAX_COLS: u32 = 16_384;

const COL_BITS: u32 = 14; // 2^14 = 16,384 columns.
const COL_MASK: u64 = (1u64 << COL_BITS) - 1;

/// Compact key used for sparse cell storage.
///
/// The key packs `(row, col)` as `(row << 14) | col`, so ordering keys orders
/// cells row-major.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct CellKey(u64);

impl CellKey {
    /// Encode a `(row, col)` coordinate into a compact [`CellKey`].
    ///
    /// Coordinates must be inside Excel bounds; every [`CellRef`] produced by
    /// A1 parsing is.
    #[inline]
    pub fn new(row: u32, col: u32) -> Self {
        debug_assert!(row < EXCEL_MAX_ROWS, "row out of Excel bounds: {row}");
        debug_assert!(col < EXCEL_MAX_COLS, "col out of Excel bounds: {col}");
        Self((u64::from(row) << COL_BITS) | u64::from(col))
    }

    #[inline]
    pub const fn row(self) -> u32 {
        (self.0 >> COL_BITS) as u32
    }

    #[inline]
    pub const fn col(self) -> u32 {
        (self.0 & COL_MASK) as u32
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn to_ref(self) -> CellRef {
        CellRef::new(self.row(), self.col())
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = u64::deserialize(deserializer)?;
        let row = raw >> COL_BITS;
        if row >= u64::from(EXCEL_MAX_ROWS) {
            return Err(D::Error::custom(format!(
                "CellKey row out of Excel bounds: {row}"
            )));
        }
        Ok(CellKey(raw))
    }
}

impl From<CellRef> for CellKey {
    fn from(value: CellRef) -> Self {
        Self::new(value.row, value.col)
    }
}

/// A single stored cell.
///
/// Cells are stored sparsely: a cell with no value and the default style is
/// removed from the worksheet map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,

    /// Index into the workbook style table (`0` = default style).
    #[serde(default)]
    pub style_id: u32,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self {
            value,
            style_id: 0,
        }
    }

    /// Returns true if this cell has no observable content or formatting.
    pub fn is_truly_empty(&self) -> bool {
        self.value.is_empty() && self.style_id == 0
    }
}
