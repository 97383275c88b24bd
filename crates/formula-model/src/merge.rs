use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CellRef, Range};

/// A merged block of cells. The top-left cell is the anchor that holds the value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergedRegion {
    pub range: Range,
}

impl MergedRegion {
    pub fn anchor(&self) -> CellRef {
        self.range.start
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("cannot merge a single cell ({0})")]
    SingleCell(Range),
    #[error("merge {requested} overlaps existing merge {existing}")]
    Overlap { requested: Range, existing: Range },
}

/// The merged regions of one worksheet. Regions never overlap.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedRegions {
    regions: Vec<MergedRegion>,
}

impl MergedRegions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a merge, rejecting single cells and overlaps with existing merges.
    pub fn add(&mut self, range: Range) -> Result<(), MergeError> {
        if range.is_single_cell() {
            return Err(MergeError::SingleCell(range));
        }
        if let Some(existing) = self.regions.iter().find(|r| r.range.intersects(&range)) {
            return Err(MergeError::Overlap {
                requested: range,
                existing: existing.range,
            });
        }
        self.regions.push(MergedRegion { range });
        Ok(())
    }

    /// Remove every merge that intersects `range`, returning how many were removed.
    pub fn remove_intersecting(&mut self, range: Range) -> usize {
        let before = self.regions.len();
        self.regions.retain(|r| !r.range.intersects(&range));
        before - self.regions.len()
    }

    /// The merge covering `cell`, if any.
    pub fn containing(&self, cell: CellRef) -> Option<&MergedRegion> {
        self.regions.iter().find(|r| r.range.contains(cell))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MergedRegion> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
