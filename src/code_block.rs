//! Code Blocks
//!
//! A [`CodeBlock`] is one compiled version of a function at one tier. The
//! baseline block is the anchor: optimized blocks point at it, and it keeps
//! the flags that must survive any number of optimized versions coming and
//! going (whether top-tier compilation ever failed, how often the function was
//! reoptimized).
//!
//! # Ownership
//!
//! ```text
//! Vm ◀── reclaim channel ── CodeBlock ──▶ Arc<JitCode>   (shared compiler output)
//!                              │
//!                              ├──▶ JitData               (linked state, owns bindings)
//!                              └──▶ Arc<CodeBlock>        (baseline version)
//! ```
//!
//! Jettisoning marks a block invalid and hands it to the VM's reclamation
//! channel; the block is dropped later by [`Vm::reclaim_jettisoned`], never
//! from inside the code that triggered the jettison.
//!
//! [`Vm::reclaim_jettisoned`]: crate::vm::Vm::reclaim_jettisoned

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::TierConfig;
use crate::error::LinkError;
use crate::global_object::GlobalObject;
use crate::jit_code::JitCode;
use crate::jit_data::JitData;
use crate::origin::BytecodeIndex;
use crate::osr::ExecutableMemoryHandle;
use crate::tracked::TrackedReferences;
use crate::vm::Vm;
use crate::watchpoint::WatchpointSetKind;

/// Execution tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JitType {
    Baseline,
    Dfg,
    Ftl,
}

impl JitType {
    pub fn is_optimizing(self) -> bool {
        !matches!(self, JitType::Baseline)
    }

    /// Tier a unit of this tier tiers up into
    pub fn next_tier(self) -> Option<JitType> {
        match self {
            JitType::Baseline => Some(JitType::Dfg),
            JitType::Dfg => Some(JitType::Ftl),
            JitType::Ftl => None,
        }
    }
}

/// Why a code block stopped being executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JettisonReason {
    /// An invariant the unit speculated on broke
    WatchpointFired(WatchpointSetKind),
    /// The unit exited to baseline too often
    OsrExitCount,
}

#[derive(Debug)]
pub struct CodeBlock {
    id: u64,
    jit_type: JitType,
    global_object: Arc<GlobalObject>,
    num_parameters: usize,
    num_locals: usize,
    /// Frame size below the frame pointer, in machine words
    stack_pointer_offset: i32,
    baseline: Option<Arc<CodeBlock>>,
    /// Loop this block was compiled to be entered at
    osr_entry_bytecode: Option<BytecodeIndex>,

    concurrent_lock: Mutex<()>,
    jit_code: OnceLock<Arc<JitCode>>,
    jit_data: OnceLock<JitData>,

    invalidated: AtomicBool,
    jettison_reason: OnceLock<JettisonReason>,

    // Baseline-only bookkeeping
    has_been_compiled_with_top_tier: AtomicBool,
    did_fail_top_tier_compilation: AtomicBool,
    reoptimization_retry_counter: AtomicU32,

    config: Arc<TierConfig>,
    exit_thunk: Arc<ExecutableMemoryHandle>,
    reclaim: Sender<Arc<CodeBlock>>,
}

impl CodeBlock {
    pub fn new_baseline(
        vm: &Vm,
        global_object: Arc<GlobalObject>,
        num_parameters: usize,
        num_locals: usize,
    ) -> Arc<Self> {
        Arc::new(Self::with_shape(
            vm,
            JitType::Baseline,
            global_object,
            num_parameters,
            num_locals,
        ))
    }

    /// Optimized version of `baseline`, optionally specialized for one loop entry
    pub fn new_optimized(
        vm: &Vm,
        jit_type: JitType,
        baseline: &Arc<CodeBlock>,
        osr_entry_bytecode: Option<BytecodeIndex>,
        stack_pointer_offset: i32,
    ) -> Arc<Self> {
        let baseline = Arc::clone(baseline.baseline_arc().unwrap_or(baseline));
        let mut block = Self::with_shape(
            vm,
            jit_type,
            Arc::clone(&baseline.global_object),
            baseline.num_parameters,
            baseline.num_locals,
        );
        block.baseline = Some(baseline);
        block.osr_entry_bytecode = osr_entry_bytecode;
        block.stack_pointer_offset = stack_pointer_offset;
        Arc::new(block)
    }

    fn with_shape(
        vm: &Vm,
        jit_type: JitType,
        global_object: Arc<GlobalObject>,
        num_parameters: usize,
        num_locals: usize,
    ) -> Self {
        CodeBlock {
            id: vm.next_code_block_id(),
            jit_type,
            global_object,
            num_parameters,
            num_locals,
            stack_pointer_offset: 0,
            baseline: None,
            osr_entry_bytecode: None,
            concurrent_lock: Mutex::new(()),
            jit_code: OnceLock::new(),
            jit_data: OnceLock::new(),
            invalidated: AtomicBool::new(false),
            jettison_reason: OnceLock::new(),
            has_been_compiled_with_top_tier: AtomicBool::new(false),
            did_fail_top_tier_compilation: AtomicBool::new(false),
            reoptimization_retry_counter: AtomicU32::new(0),
            config: Arc::clone(vm.config()),
            exit_thunk: Arc::clone(vm.osr_exit_thunk()),
            reclaim: vm.reclaim_sender(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn jit_type(&self) -> JitType {
        self.jit_type
    }

    #[inline]
    pub fn global_object(&self) -> &Arc<GlobalObject> {
        &self.global_object
    }

    #[inline]
    pub fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    #[inline]
    pub fn num_locals(&self) -> usize {
        self.num_locals
    }

    #[inline]
    pub fn stack_pointer_offset(&self) -> i32 {
        self.stack_pointer_offset
    }

    pub fn osr_entry_bytecode(&self) -> Option<BytecodeIndex> {
        self.osr_entry_bytecode
    }

    pub fn config(&self) -> &Arc<TierConfig> {
        &self.config
    }

    pub fn exit_thunk(&self) -> &Arc<ExecutableMemoryHandle> {
        &self.exit_thunk
    }

    fn baseline_arc(&self) -> Option<&Arc<CodeBlock>> {
        self.baseline.as_ref()
    }

    /// The baseline block this block was compiled from, or itself
    pub fn baseline_version(&self) -> &CodeBlock {
        self.baseline.as_deref().unwrap_or(self)
    }

    /// Lock guarding fields the background compiler reads concurrently
    ///
    /// Held only for single field updates, never across a linking pass.
    pub fn concurrent_lock(&self) -> MutexGuard<'_, ()> {
        self.concurrent_lock.lock()
    }

    pub fn jit_code(&self) -> Option<&Arc<JitCode>> {
        self.jit_code.get()
    }

    pub fn jit_data(&self) -> Option<&JitData> {
        self.jit_data.get()
    }

    /// Link `jit_code` into this block and make it executable
    ///
    /// On failure nothing is installed and the caller keeps running the
    /// baseline tier.
    ///
    /// # Panics
    /// Panics if code was already installed.
    pub fn install(self: &Arc<Self>, jit_code: Arc<JitCode>) -> Result<(), LinkError> {
        assert!(
            self.jit_code.get().is_none(),
            "code block {} already has code installed",
            self.id
        );

        let mut data = JitData::new(&jit_code, &self.config, Arc::clone(&self.exit_thunk));
        if let Err(err) = data.try_initialize(self, &jit_code) {
            debug!(target: "osrtier::link::install", code_block = self.id, %err, "Link failed");
            return Err(err);
        }

        {
            let _locker = self.concurrent_lock();
            let _ = self.jit_data.set(data);
            let _ = self.jit_code.set(jit_code);
            if self.is_invalidated() {
                // A watchpoint fired between arming and publishing the code.
                if let Some(jit_code) = self.jit_code.get() {
                    jit_code.common().invalidate();
                }
            }
        }
        debug!(
            target: "osrtier::link::install",
            code_block = self.id,
            jit_type = ?self.jit_type,
            "Installed code"
        );
        Ok(())
    }

    #[inline]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub fn jettison_reason(&self) -> Option<JettisonReason> {
        self.jettison_reason.get().copied()
    }

    /// Make this block non-executable and queue it for reclamation
    ///
    /// Returns `false` if the block was already jettisoned.
    pub fn jettison(self: &Arc<Self>, reason: JettisonReason) -> bool {
        {
            let _locker = self.concurrent_lock();
            if self.invalidated.swap(true, Ordering::AcqRel) {
                return false;
            }
            let _ = self.jettison_reason.set(reason);
            if let Some(jit_code) = self.jit_code.get() {
                jit_code.common().invalidate();
            }
        }

        debug!(
            target: "osrtier::jettison",
            code_block = self.id,
            jit_type = ?self.jit_type,
            ?reason,
            "Jettisoned"
        );

        if self.reclaim.send(Arc::clone(self)).is_err() {
            warn!(
                target: "osrtier::jettison",
                code_block = self.id,
                "VM gone; dropping jettison notification"
            );
        }
        true
    }

    pub fn has_been_compiled_with_top_tier(&self) -> bool {
        self.has_been_compiled_with_top_tier.load(Ordering::Acquire)
    }

    pub(crate) fn set_has_been_compiled_with_top_tier(&self) {
        self.has_been_compiled_with_top_tier
            .store(true, Ordering::Release);
    }

    /// Once set, never cleared
    pub fn did_fail_top_tier_compilation(&self) -> bool {
        self.did_fail_top_tier_compilation.load(Ordering::Acquire)
    }

    pub(crate) fn set_did_fail_top_tier_compilation(&self) {
        self.did_fail_top_tier_compilation
            .store(true, Ordering::Release);
    }

    pub fn reoptimization_retry_counter(&self) -> u32 {
        self.reoptimization_retry_counter.load(Ordering::Relaxed)
    }

    pub fn count_reoptimization(&self) {
        let _ = self.reoptimization_retry_counter.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |c| c.checked_add(1),
        );
        debug!(
            target: "osrtier::tier_up::reoptimize",
            code_block = self.id,
            retries = self.reoptimization_retry_counter(),
            "Counted reoptimization"
        );
    }

    /// Scale a threshold by how often this function was reoptimized
    ///
    /// `desired * 2^min(retries, max_reoptimization_retry_shift)`, clipped to
    /// `i32::MAX`.
    pub fn adjusted_counter_value(&self, desired: i32) -> i32 {
        let shift = self
            .reoptimization_retry_counter()
            .min(self.config.max_reoptimization_retry_shift);
        let scaled = (desired.max(0) as i64) << shift;
        scaled.min(i32::MAX as i64) as i32
    }

    /// Walk every retained pointer and assert it is still tracked
    pub fn validate_references(&self, tracked: &TrackedReferences) {
        if let Some(jit_code) = self.jit_code.get() {
            jit_code.validate_references(tracked);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CellRef;

    fn vm() -> Vm {
        Vm::new(TierConfig::default())
    }

    #[test]
    fn test_baseline_version_of_optimized_block() {
        let vm = vm();
        let global = GlobalObject::new(CellRef::new(0x1000));
        let baseline = CodeBlock::new_baseline(&vm, global, 2, 3);
        let dfg = CodeBlock::new_optimized(&vm, JitType::Dfg, &baseline, None, 8);
        assert_eq!(dfg.baseline_version().id(), baseline.id());
        assert_eq!(baseline.baseline_version().id(), baseline.id());
        assert_eq!(dfg.num_locals(), 3);
        assert_ne!(dfg.id(), baseline.id());

        let ftl = CodeBlock::new_optimized(&vm, JitType::Ftl, &dfg, Some(BytecodeIndex(4)), 8);
        assert_eq!(ftl.baseline_version().id(), baseline.id());
    }

    #[test]
    fn test_adjusted_counter_value_scales_and_clips() {
        let vm = vm();
        let baseline =
            CodeBlock::new_baseline(&vm, GlobalObject::new(CellRef::new(0x1000)), 1, 1);
        assert_eq!(baseline.adjusted_counter_value(1_000), 1_000);
        baseline.count_reoptimization();
        baseline.count_reoptimization();
        assert_eq!(baseline.adjusted_counter_value(1_000), 4_000);
        for _ in 0..40 {
            baseline.count_reoptimization();
        }
        assert_eq!(baseline.adjusted_counter_value(100_000), i32::MAX);
    }

    #[test]
    fn test_jettison_is_once_and_deferred() {
        let vm = vm();
        let baseline =
            CodeBlock::new_baseline(&vm, GlobalObject::new(CellRef::new(0x1000)), 1, 1);
        let dfg = CodeBlock::new_optimized(&vm, JitType::Dfg, &baseline, None, 0);
        let weak = Arc::downgrade(&dfg);

        assert!(dfg.jettison(JettisonReason::OsrExitCount));
        assert!(!dfg.jettison(JettisonReason::OsrExitCount));
        assert!(dfg.is_invalidated());
        assert_eq!(dfg.jettison_reason(), Some(JettisonReason::OsrExitCount));

        drop(dfg);
        assert!(weak.upgrade().is_some(), "queued block must outlive its last owner");
        assert_eq!(vm.reclaim_jettisoned(), 1);
        assert!(weak.upgrade().is_none());
    }
}
