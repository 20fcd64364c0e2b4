//! Global object as seen by the linker
//!
//! Compiled units link against exactly one global object. The linker only
//! needs its cell identity (for `GlobalObject` records) and its invariant
//! registry (for watchpoint records).

use std::sync::Arc;

use crate::value::CellRef;
use crate::watchpoint::{InvariantRegistry, WatchpointSet, WatchpointSetKind};

#[derive(Debug)]
pub struct GlobalObject {
    cell: CellRef,
    invariants: Arc<InvariantRegistry>,
}

impl GlobalObject {
    /// Global object with its own, isolated invariant registry
    pub fn new(cell: CellRef) -> Arc<Self> {
        Self::with_registry(cell, Arc::new(InvariantRegistry::new()))
    }

    /// Global object sharing an existing registry
    pub fn with_registry(cell: CellRef, invariants: Arc<InvariantRegistry>) -> Arc<Self> {
        Arc::new(GlobalObject { cell, invariants })
    }

    #[inline]
    pub fn cell(&self) -> CellRef {
        self.cell
    }

    #[inline]
    pub fn invariants(&self) -> &Arc<InvariantRegistry> {
        &self.invariants
    }

    #[inline]
    pub fn watchpoint_set(&self, kind: WatchpointSetKind) -> &Arc<WatchpointSet> {
        self.invariants.set(kind)
    }

    /// Convenience for the "having a bad time" transition
    pub fn have_a_bad_time(&self) -> usize {
        self.invariants
            .fire(WatchpointSetKind::HavingABadTime, "global object is having a bad time")
    }
}
