use serde::{Deserialize, Deserializer, Serialize};

use crate::sheet_name::sheet_name_eq_case_insensitive;
use crate::{Style, StyleTable, Worksheet, WorksheetId};

fn default_schema_version() -> u32 {
    crate::SCHEMA_VERSION
}

/// A workbook containing worksheets and a shared style table.
///
/// The first sheet doubles as the active sheet.
#[derive(Clone, Debug, Serialize)]
pub struct Workbook {
    /// Serialization schema version.
    pub schema_version: u32,

    /// Worksheets contained in the workbook, in tab order.
    pub sheets: Vec<Worksheet>,

    /// Workbook style table (deduplicated).
    pub styles: StyleTable,

    /// Next worksheet id to allocate (runtime-only).
    #[serde(skip)]
    next_sheet_id: WorksheetId,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// Create a new empty workbook.
    pub fn new() -> Self {
        Self {
            schema_version: crate::SCHEMA_VERSION,
            sheets: Vec::new(),
            styles: StyleTable::new(),
            next_sheet_id: 1,
        }
    }

    /// Add a worksheet, returning its id.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> WorksheetId {
        let id = self.next_sheet_id;
        self.next_sheet_id = self.next_sheet_id.wrapping_add(1);
        self.sheets.push(Worksheet::new(id, name));
        id
    }

    /// Get a sheet by id.
    pub fn sheet(&self, id: WorksheetId) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.id == id)
    }

    /// Get a mutable sheet by id.
    pub fn sheet_mut(&mut self, id: WorksheetId) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.id == id)
    }

    /// Find a sheet by name (case-insensitive, like Excel).
    pub fn sheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.sheets
            .iter()
            .find(|s| sheet_name_eq_case_insensitive(&s.name, name))
    }

    /// The active sheet.
    pub fn active_sheet(&self) -> Option<&Worksheet> {
        self.sheets.first()
    }

    /// Sheet names in tab order.
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Intern (deduplicate) a style into the workbook's style table.
    pub fn intern_style(&mut self, style: Style) -> u32 {
        self.styles.intern(style)
    }

    /// Resolve a cell's `style_id`. Unknown ids resolve to `None`.
    pub fn style(&self, style_id: u32) -> Option<&Style> {
        self.styles.get(style_id)
    }
}

impl<'de> Deserialize<'de> for Workbook {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            #[serde(default = "default_schema_version")]
            schema_version: u32,
            #[serde(default)]
            sheets: Vec<Worksheet>,
            #[serde(default)]
            styles: StyleTable,
        }

        let helper = Helper::deserialize(deserializer)?;
        let next_sheet_id = helper
            .sheets
            .iter()
            .map(|s| s.id)
            .max()
            .map_or(1, |max| max.wrapping_add(1));

        Ok(Workbook {
            schema_version: helper.schema_version,
            sheets: helper.sheets,
            styles: helper.styles,
            next_sheet_id,
        })
    }
}
