//! Data shared by every optimizing tier's compiled units
//!
//! Inlining metadata, the call-site → code-origin table used when walking
//! optimized frames, and the weak references the unit depends on. Jettisoning
//! a unit flips `is_still_valid`.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::origin::{CallSiteIndex, CodeOrigin, InlineCallFrame, InlineCallFrameId};
use crate::tracked::TrackedReferences;
use crate::value::{CellRef, StructureId};

/// Structure transition the compiled code performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureTransition {
    /// Cell whose code performs the transition
    pub owner: CellRef,
    pub from: StructureId,
    pub to: StructureId,
}

#[derive(Debug, Default)]
pub struct CommonData {
    pub inline_call_frames: Vec<InlineCallFrame>,
    /// Indexed by [`CallSiteIndex`]
    pub code_origins: Vec<CodeOrigin>,
    pub weak_references: Vec<CellRef>,
    pub weak_structure_references: Vec<StructureId>,
    pub transitions: Vec<StructureTransition>,
    is_still_valid: AtomicBool,
    is_unlinked: bool,
}

impl CommonData {
    /// Common data for a unit whose constants go through the linker table
    pub fn unlinked() -> Self {
        CommonData {
            is_still_valid: AtomicBool::new(true),
            is_unlinked: true,
            ..Default::default()
        }
    }

    /// Common data for a unit compiled against one global object
    pub fn linked() -> Self {
        CommonData {
            is_still_valid: AtomicBool::new(true),
            is_unlinked: false,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_unlinked(&self) -> bool {
        self.is_unlinked
    }

    #[inline]
    pub fn is_still_valid(&self) -> bool {
        self.is_still_valid.load(Ordering::Acquire)
    }

    /// Returns whether this call did the invalidation
    pub fn invalidate(&self) -> bool {
        self.is_still_valid.swap(false, Ordering::AcqRel)
    }

    pub fn add_inline_call_frame(&mut self, frame: InlineCallFrame) -> InlineCallFrameId {
        self.inline_call_frames.push(frame);
        InlineCallFrameId((self.inline_call_frames.len() - 1) as u32)
    }

    pub fn inline_call_frame(&self, id: InlineCallFrameId) -> Option<&InlineCallFrame> {
        self.inline_call_frames.get(id.0 as usize)
    }

    /// Register a call site, returning the index generated code stores in the frame
    pub fn add_code_origin(&mut self, origin: CodeOrigin) -> CallSiteIndex {
        self.code_origins.push(origin);
        CallSiteIndex((self.code_origins.len() - 1) as u32)
    }

    pub fn code_origin_for(&self, call_site: CallSiteIndex) -> Option<CodeOrigin> {
        self.code_origins.get(call_site.bits() as usize).copied()
    }

    pub fn validate_references(&self, tracked: &TrackedReferences) {
        for cell in &self.weak_references {
            tracked.check(*cell);
        }
        for transition in &self.transitions {
            tracked.check(transition.owner);
        }
    }

    pub fn shrink_to_fit(&mut self) {
        self.inline_call_frames.shrink_to_fit();
        self.code_origins.shrink_to_fit();
        self.weak_references.shrink_to_fit();
        self.weak_structure_references.shrink_to_fit();
        self.transitions.shrink_to_fit();
    }
}
