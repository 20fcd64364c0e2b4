//! Linker IR
//!
//! The optimizing compiler emits code that does not embed runtime pointers.
//! Instead it indexes a per-unit constant pool (the trailing span) whose
//! entries are described at compile time by [`LinkerRecord`]s and resolved
//! against a concrete global object when the unit is installed.
//!
//! Resolution is table driven: [`LinkerRecordKind`] indexes [`RESOLVERS`],
//! and every watchpoint kind shares one resolver that looks the set up by
//! kind in the global object's invariant registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::code_block::CodeBlock;
use crate::error::FailedWatchpoint;
use crate::global_object::GlobalObject;
use crate::inline_cache::{CallLinkInfo, UnlinkedCallLinkInfo};
use crate::value::CellRef;
use crate::watchpoint::{attempt_to_watch, WatchpointBinding, WatchpointSetKind};

// =============================================================================
// Records
// =============================================================================

/// One compile-time constant pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkerRecord {
    /// Placeholder that must never reach the linker
    Invalid,
    /// Index into the unit's call link info table
    CallLinkInfo(usize),
    /// Heap cell, copied through
    CellPointer(CellRef),
    /// Raw non-cell pointer, copied through
    NonCellPointer(u64),
    /// The global object the unit links against
    GlobalObject,
    /// Subscription to a named invariant
    Watchpoint(WatchpointSetKind),
}

/// Discriminant of a [`LinkerRecord`], used as the resolver table index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkerRecordKind {
    Invalid = 0,
    CallLinkInfo = 1,
    CellPointer = 2,
    NonCellPointer = 3,
    GlobalObject = 4,
    Watchpoint = 5,
}

impl LinkerRecordKind {
    pub const COUNT: usize = 6;
}

impl LinkerRecord {
    #[inline]
    pub fn kind(&self) -> LinkerRecordKind {
        match self {
            LinkerRecord::Invalid => LinkerRecordKind::Invalid,
            LinkerRecord::CallLinkInfo(_) => LinkerRecordKind::CallLinkInfo,
            LinkerRecord::CellPointer(_) => LinkerRecordKind::CellPointer,
            LinkerRecord::NonCellPointer(_) => LinkerRecordKind::NonCellPointer,
            LinkerRecord::GlobalObject => LinkerRecordKind::GlobalObject,
            LinkerRecord::Watchpoint(_) => LinkerRecordKind::Watchpoint,
        }
    }

    /// Compact `(tag, payload)` form stored alongside generated code
    pub fn encode(&self) -> (u8, u64) {
        let payload = match *self {
            LinkerRecord::Invalid | LinkerRecord::GlobalObject => 0,
            LinkerRecord::CallLinkInfo(index) => index as u64,
            LinkerRecord::CellPointer(cell) => cell.as_u64(),
            LinkerRecord::NonCellPointer(bits) => bits,
            LinkerRecord::Watchpoint(kind) => kind as u64,
        };
        (self.kind() as u8, payload)
    }

    /// Inverse of [`LinkerRecord::encode`]
    ///
    /// # Panics
    /// Panics on an unknown tag or watchpoint kind. The compiler and the
    /// runtime disagree about the table layout, which is not recoverable.
    pub fn decode(tag: u8, payload: u64) -> Self {
        match tag {
            0 => LinkerRecord::Invalid,
            1 => LinkerRecord::CallLinkInfo(payload as usize),
            2 => LinkerRecord::CellPointer(CellRef::new(payload)),
            3 => LinkerRecord::NonCellPointer(payload),
            4 => LinkerRecord::GlobalObject,
            5 => match u8::try_from(payload).ok().and_then(WatchpointSetKind::from_u8) {
                Some(kind) => LinkerRecord::Watchpoint(kind),
                None => panic!("unknown watchpoint set kind {} in linker record", payload),
            },
            _ => panic!("unknown linker record tag {}", tag),
        }
    }
}

/// Immutable linker table of a compiled unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkerIr {
    records: Vec<LinkerRecord>,
}

impl LinkerIr {
    pub fn new(records: Vec<LinkerRecord>) -> Self {
        LinkerIr { records }
    }

    /// Decode a table from its compact form
    pub fn from_encoded(encoded: &[(u8, u64)]) -> Self {
        LinkerIr {
            records: encoded
                .iter()
                .map(|&(tag, payload)| LinkerRecord::decode(tag, payload))
                .collect(),
        }
    }

    pub fn encode(&self) -> Vec<(u8, u64)> {
        self.records.iter().map(LinkerRecord::encode).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&LinkerRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[LinkerRecord] {
        &self.records
    }

    /// Number of watchpoint records, used to pre-size the binding table
    pub fn watchpoint_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, LinkerRecord::Watchpoint(_)))
            .count()
    }
}

/// Compile-time builder that hands out one index per distinct record
#[derive(Debug, Default)]
pub struct LinkerIrBuilder {
    records: Vec<LinkerRecord>,
    indices: HashMap<LinkerRecord, usize>,
}

impl LinkerIrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `record` in the trailing span, adding it if new
    pub fn add(&mut self, record: LinkerRecord) -> usize {
        if let Some(&index) = self.indices.get(&record) {
            return index;
        }
        let index = self.records.len();
        self.records.push(record);
        self.indices.insert(record, index);
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn build(self) -> LinkerIr {
        LinkerIr {
            records: self.records,
        }
    }
}

// =============================================================================
// Linked slots
// =============================================================================

/// One resolved entry of the trailing span
#[derive(Debug, Clone, Default)]
pub enum LinkedSlot {
    /// Not linked yet
    #[default]
    Empty,
    /// Index of an initialized call link info
    CallLinkInfo(usize),
    Cell(CellRef),
    NonCell(u64),
    GlobalObject(Arc<GlobalObject>),
    /// Armed subscription
    Watchpoint(Arc<WatchpointBinding>),
    /// Subscription that failed because the set had already fired
    UnarmedWatchpoint(WatchpointSetKind),
}

impl LinkedSlot {
    /// Whether linking produced a usable value for this slot
    pub fn is_resolved(&self) -> bool {
        !matches!(self, LinkedSlot::Empty | LinkedSlot::UnarmedWatchpoint(_))
    }
}

impl PartialEq for LinkedSlot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LinkedSlot::Empty, LinkedSlot::Empty) => true,
            (LinkedSlot::CallLinkInfo(a), LinkedSlot::CallLinkInfo(b)) => a == b,
            (LinkedSlot::Cell(a), LinkedSlot::Cell(b)) => a == b,
            (LinkedSlot::NonCell(a), LinkedSlot::NonCell(b)) => a == b,
            (LinkedSlot::GlobalObject(a), LinkedSlot::GlobalObject(b)) => Arc::ptr_eq(a, b),
            (LinkedSlot::Watchpoint(a), LinkedSlot::Watchpoint(b)) => Arc::ptr_eq(a, b),
            (LinkedSlot::UnarmedWatchpoint(a), LinkedSlot::UnarmedWatchpoint(b)) => a == b,
            _ => false,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Everything a resolver may touch while linking one unit
pub(crate) struct LinkContext<'a> {
    pub code_block: &'a Arc<CodeBlock>,
    pub global_object: &'a Arc<GlobalObject>,
    pub call_link_infos: &'a mut [CallLinkInfo],
    pub unlinked_call_link_infos: &'a [UnlinkedCallLinkInfo],
    pub watchpoints: &'a mut Vec<Arc<WatchpointBinding>>,
    pub failed: Vec<FailedWatchpoint>,
}

type ResolveFn = fn(&mut LinkContext<'_>, usize, &LinkerRecord) -> LinkedSlot;

/// Resolvers indexed by [`LinkerRecordKind`]
const RESOLVERS: [ResolveFn; LinkerRecordKind::COUNT] = [
    resolve_invalid,
    resolve_call_link_info,
    resolve_cell_pointer,
    resolve_non_cell_pointer,
    resolve_global_object,
    resolve_watchpoint,
];

fn resolve_invalid(_: &mut LinkContext<'_>, index: usize, _: &LinkerRecord) -> LinkedSlot {
    panic!("invalid linker record at index {}", index)
}

fn resolve_call_link_info(
    ctx: &mut LinkContext<'_>,
    _: usize,
    record: &LinkerRecord,
) -> LinkedSlot {
    let LinkerRecord::CallLinkInfo(slot) = *record else {
        unreachable!("resolver table out of sync with record kinds")
    };
    let unlinked = ctx.unlinked_call_link_infos.get(slot).unwrap_or_else(|| {
        panic!("call link info {} has no unlinked template", slot)
    });
    ctx.call_link_infos[slot].initialize_from_unlinked(unlinked, ctx.code_block);
    LinkedSlot::CallLinkInfo(slot)
}

fn resolve_cell_pointer(_: &mut LinkContext<'_>, _: usize, record: &LinkerRecord) -> LinkedSlot {
    let LinkerRecord::CellPointer(cell) = *record else {
        unreachable!("resolver table out of sync with record kinds")
    };
    LinkedSlot::Cell(cell)
}

fn resolve_non_cell_pointer(
    _: &mut LinkContext<'_>,
    _: usize,
    record: &LinkerRecord,
) -> LinkedSlot {
    let LinkerRecord::NonCellPointer(bits) = *record else {
        unreachable!("resolver table out of sync with record kinds")
    };
    LinkedSlot::NonCell(bits)
}

fn resolve_global_object(ctx: &mut LinkContext<'_>, _: usize, _: &LinkerRecord) -> LinkedSlot {
    LinkedSlot::GlobalObject(Arc::clone(ctx.global_object))
}

fn resolve_watchpoint(ctx: &mut LinkContext<'_>, index: usize, record: &LinkerRecord) -> LinkedSlot {
    let LinkerRecord::Watchpoint(kind) = *record else {
        unreachable!("resolver table out of sync with record kinds")
    };
    let binding = Arc::new(WatchpointBinding::new());
    let set = ctx.global_object.watchpoint_set(kind);
    let armed = attempt_to_watch(ctx.code_block, set, &binding);
    ctx.watchpoints.push(Arc::clone(&binding));

    if armed {
        trace!(target: "osrtier::link::watchpoint", ?kind, index, "Armed watchpoint");
        LinkedSlot::Watchpoint(binding)
    } else {
        debug!(
            target: "osrtier::link::watchpoint",
            ?kind,
            index,
            code_block = ctx.code_block.id(),
            "Watchpoint set already invalidated"
        );
        ctx.failed.push(FailedWatchpoint {
            record_index: index,
            kind,
        });
        LinkedSlot::UnarmedWatchpoint(kind)
    }
}

/// Resolve every record into a fresh trailing span
///
/// Keeps going after a failed watchpoint so that `ctx.failed` lists every
/// invalidated set, not just the first one.
pub(crate) fn link(ir: &LinkerIr, ctx: &mut LinkContext<'_>) -> Vec<LinkedSlot> {
    ir.records
        .iter()
        .enumerate()
        .map(|(index, record)| RESOLVERS[record.kind() as usize](ctx, index, record))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
