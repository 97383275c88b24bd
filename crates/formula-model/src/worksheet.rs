use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{A1ParseError, Cell, CellKey, CellRef, CellValue, MergeError, MergedRegions, Range};

/// Identifier for a worksheet within its workbook.
pub type WorksheetId = u32;

/// A single worksheet: a sparse cell store plus merged regions.
///
/// Merges are layout metadata only. Cells covered by a merge keep whatever was
/// stored in them, so a merge can be applied before or after the values are
/// written without losing data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    pub id: WorksheetId,
    pub name: String,
    #[serde(default)]
    cells: BTreeMap<CellKey, Cell>,
    #[serde(default, skip_serializing_if = "MergedRegions::is_empty")]
    merged_regions: MergedRegions,
}

impl Worksheet {
    pub fn new(id: WorksheetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            cells: BTreeMap::new(),
            merged_regions: MergedRegions::new(),
        }
    }

    /// The stored cell record, if any.
    pub fn cell(&self, cell: CellRef) -> Option<&Cell> {
        self.cells.get(&CellKey::from(cell))
    }

    /// The cell value (`Empty` for cells that are not stored).
    pub fn value(&self, cell: CellRef) -> CellValue {
        self.cell(cell)
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    /// The style id of a cell (`0` for cells that are not stored).
    pub fn style_id(&self, cell: CellRef) -> u32 {
        self.cell(cell).map_or(0, |c| c.style_id)
    }

    pub fn set_value(&mut self, cell: CellRef, value: CellValue) {
        self.update_cell(cell, |c| c.value = value);
    }

    pub fn set_style_id(&mut self, cell: CellRef, style_id: u32) {
        self.update_cell(cell, |c| c.style_id = style_id);
    }

    pub fn clear_cell(&mut self, cell: CellRef) {
        self.cells.remove(&CellKey::from(cell));
    }

    pub fn set_value_a1(&mut self, a1: &str, value: CellValue) -> Result<(), A1ParseError> {
        self.set_value(CellRef::from_a1(a1)?, value);
        Ok(())
    }

    pub fn value_a1(&self, a1: &str) -> Result<CellValue, A1ParseError> {
        Ok(self.value(CellRef::from_a1(a1)?))
    }

    /// Iterate stored cells in row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (CellRef, &Cell)> {
        self.cells.iter().map(|(k, c)| (k.to_ref(), c))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Merge `range`. Fails for single cells and for overlaps with existing merges.
    pub fn merge_range(&mut self, range: Range) -> Result<(), MergeError> {
        self.merged_regions.add(range)
    }

    /// Remove every merge intersecting `range`.
    pub fn unmerge_range(&mut self, range: Range) -> usize {
        self.merged_regions.remove_intersecting(range)
    }

    pub fn merged_regions(&self) -> &MergedRegions {
        &self.merged_regions
    }

    fn update_cell(&mut self, cell: CellRef, f: impl FnOnce(&mut Cell)) {
        let key = CellKey::from(cell);
        let mut record = self.cells.remove(&key).unwrap_or_default();
        f(&mut record);
        if !record.is_truly_empty() {
            self.cells.insert(key, record);
        }
    }
}
