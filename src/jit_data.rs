//! Linked per-block state
//!
//! [`JitData`] is what a [`JitCode`] becomes once linked into one
//! [`CodeBlock`]: the resolved trailing span generated code indexes into, the
//! live inline caches, the watchpoint bindings the block owns, and the exit
//! bookkeeping that changes while the block runs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::code_block::CodeBlock;
use crate::config::TierConfig;
use crate::error::LinkError;
use crate::inline_cache::{CallLinkInfo, StructureStubInfo};
use crate::jit_code::JitCode;
use crate::linker::{self, LinkContext, LinkedSlot};
use crate::osr::ExecutableMemoryHandle;
use crate::value::{CellRef, StructureId};
use crate::watchpoint::WatchpointBinding;

#[derive(Debug)]
pub struct JitData {
    trailing_span: Vec<LinkedSlot>,
    call_link_infos: Vec<CallLinkInfo>,
    stub_infos: Vec<StructureStubInfo>,
    watchpoints: Vec<Arc<WatchpointBinding>>,

    exit_code: RwLock<Vec<Arc<ExecutableMemoryHandle>>>,
    exit_counts: Vec<AtomicU32>,
    total_exit_count: AtomicU32,
    exit_thunk: Arc<ExecutableMemoryHandle>,

    /// Frame size in bytes
    stack_offset: i64,
}

impl JitData {
    /// Allocate unlinked state sized for `jit_code`
    pub fn new(
        jit_code: &JitCode,
        config: &TierConfig,
        exit_thunk: Arc<ExecutableMemoryHandle>,
    ) -> Self {
        let num_exits = jit_code.osr_exits().len();
        JitData {
            trailing_span: vec![LinkedSlot::Empty; jit_code.linker_ir().len()],
            call_link_infos: (0..jit_code.unlinked_call_link_infos().len())
                .map(|_| CallLinkInfo::new(config.max_polymorphic_call_variants))
                .collect(),
            stub_infos: (0..jit_code.unlinked_stub_infos().len())
                .map(|_| StructureStubInfo::new(config.max_access_variants))
                .collect(),
            watchpoints: Vec::with_capacity(jit_code.linker_ir().watchpoint_count()),
            exit_code: RwLock::new(vec![Arc::clone(&exit_thunk); num_exits]),
            exit_counts: (0..num_exits).map(|_| AtomicU32::new(0)).collect(),
            total_exit_count: AtomicU32::new(0),
            exit_thunk,
            stack_offset: 0,
        }
    }

    /// Link every record of `jit_code` against `code_block`'s global object
    ///
    /// Every record is resolved even after a watchpoint fails, so the error
    /// lists every set that was already invalidated. On error the slots that
    /// did resolve stay in the trailing span for inspection, but the block
    /// must not run this code.
    pub fn try_initialize(
        &mut self,
        code_block: &Arc<CodeBlock>,
        jit_code: &JitCode,
    ) -> Result<(), LinkError> {
        for (info, unlinked) in self
            .stub_infos
            .iter_mut()
            .zip(jit_code.unlinked_stub_infos())
        {
            info.initialize_from_unlinked(unlinked, code_block);
        }
        self.stack_offset = code_block.stack_pointer_offset() as i64 * 8;

        let mut ctx = LinkContext {
            code_block,
            global_object: code_block.global_object(),
            call_link_infos: &mut self.call_link_infos,
            unlinked_call_link_infos: jit_code.unlinked_call_link_infos(),
            watchpoints: &mut self.watchpoints,
            failed: Vec::new(),
        };
        self.trailing_span = linker::link(jit_code.linker_ir(), &mut ctx);

        if ctx.failed.is_empty() {
            Ok(())
        } else {
            debug!(
                target: "osrtier::link::watchpoint",
                code_block = code_block.id(),
                failed = ctx.failed.len(),
                "Linking failed"
            );
            Err(LinkError::WatchpointsInvalidated { failed: ctx.failed })
        }
    }

    pub fn trailing_span(&self) -> &[LinkedSlot] {
        &self.trailing_span
    }

    pub fn slot(&self, index: usize) -> Option<&LinkedSlot> {
        self.trailing_span.get(index)
    }

    pub fn call_link_infos(&self) -> &[CallLinkInfo] {
        &self.call_link_infos
    }

    pub fn call_link_info(&self, index: usize) -> Option<&CallLinkInfo> {
        self.call_link_infos.get(index)
    }

    pub fn stub_infos(&self) -> &[StructureStubInfo] {
        &self.stub_infos
    }

    pub fn stub_info(&self, index: usize) -> Option<&StructureStubInfo> {
        self.stub_infos.get(index)
    }

    pub fn watchpoints(&self) -> &[Arc<WatchpointBinding>] {
        &self.watchpoints
    }

    pub fn stack_offset(&self) -> i64 {
        self.stack_offset
    }

    pub fn exit_thunk(&self) -> &Arc<ExecutableMemoryHandle> {
        &self.exit_thunk
    }

    /// Code the given exit currently jumps through
    pub fn exit_code(&self, exit_index: usize) -> Option<Arc<ExecutableMemoryHandle>> {
        self.exit_code.read().get(exit_index).cloned()
    }

    /// Replace an exit's thunk with code specialized for it
    ///
    /// # Panics
    /// Panics if `exit_index` is out of range.
    pub fn set_exit_code(&self, exit_index: usize, code: Arc<ExecutableMemoryHandle>) {
        let mut table = self.exit_code.write();
        let len = table.len();
        let slot = table
            .get_mut(exit_index)
            .unwrap_or_else(|| panic!("exit {} out of range ({})", exit_index, len));
        *slot = code;
    }

    /// Exits still jumping through the shared thunk
    pub fn exits_using_thunk(&self) -> usize {
        self.exit_code
            .read()
            .iter()
            .filter(|code| Arc::ptr_eq(code, &self.exit_thunk))
            .count()
    }

    /// `(exit index, code)` for every exit with its own code
    pub fn specialized_exit_code(&self) -> Vec<(usize, Arc<ExecutableMemoryHandle>)> {
        self.exit_code
            .read()
            .iter()
            .enumerate()
            .filter(|(_, code)| !Arc::ptr_eq(code, &self.exit_thunk))
            .map(|(i, code)| (i, Arc::clone(code)))
            .collect()
    }

    /// Count one exit through `exit_index`, returning the new total
    pub(crate) fn record_exit(&self, exit_index: usize) -> u32 {
        if let Some(counter) = self.exit_counts.get(exit_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.total_exit_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn exit_count(&self, exit_index: usize) -> u32 {
        self.exit_counts
            .get(exit_index)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn total_exit_count(&self) -> u32 {
        self.total_exit_count.load(Ordering::Relaxed)
    }

    /// GC hook: reset inline caches that refer to dead cells or structures
    ///
    /// Returns how many caches were reset.
    pub fn visit_weak(
        &self,
        is_live_cell: impl Fn(CellRef) -> bool,
        is_live_structure: impl Fn(StructureId) -> bool,
    ) -> usize {
        let calls = self
            .call_link_infos
            .iter()
            .filter(|info| info.visit_weak(&is_live_cell))
            .count();
        let stubs = self
            .stub_infos
            .iter()
            .filter(|info| info.visit_weak(&is_live_structure))
            .count();
        calls + stubs
    }
}

impl Drop for JitData {
    fn drop(&mut self) {
        for binding in &self.watchpoints {
            binding.clear();
        }
    }
}
