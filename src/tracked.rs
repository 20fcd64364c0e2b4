//! Reference validation hook for the garbage collector
//!
//! A tracing pass collects every cell it proved live into a
//! [`TrackedReferences`] set, then asks compiled units to validate the
//! pointers they retain against it. Finding an untracked cell means the
//! compiled unit holds a pointer to collected memory, which is never a
//! recoverable condition.

use std::collections::HashSet;

use crate::value::{CellRef, Value};

/// Set of cells a tracing pass found reachable
#[derive(Debug, Default, Clone)]
pub struct TrackedReferences {
    cells: HashSet<CellRef>,
}

impl TrackedReferences {
    pub fn new() -> Self {
        TrackedReferences::default()
    }

    pub fn add(&mut self, cell: CellRef) {
        self.cells.insert(cell);
    }

    pub fn add_value(&mut self, value: &Value) {
        if let Some(cell) = value.as_cell() {
            self.add(cell);
        }
    }

    #[inline]
    pub fn contains(&self, cell: CellRef) -> bool {
        self.cells.contains(&cell)
    }

    /// Assert that a retained cell is still tracked
    ///
    /// # Panics
    /// Panics on a dangling reference.
    pub fn check(&self, cell: CellRef) {
        if !self.contains(cell) {
            panic!("dangling reference to untracked {:?}", cell);
        }
    }

    /// Assert that a retained value does not point at an untracked cell
    pub fn check_value(&self, value: &Value) {
        if let Some(cell) = value.as_cell() {
            self.check(cell);
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<CellRef> for TrackedReferences {
    fn from_iter<I: IntoIterator<Item = CellRef>>(iter: I) -> Self {
        TrackedReferences {
            cells: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_accepts_tracked_cells() {
        let cell = CellRef::new(0x2000);
        let tracked: TrackedReferences = [cell].into_iter().collect();
        tracked.check(cell);
        tracked.check_value(&Value::Int32(3));
    }

    #[test]
    #[should_panic(expected = "dangling reference")]
    fn test_check_rejects_untracked_cells() {
        TrackedReferences::new().check(CellRef::new(0x2000));
    }
}
