//! Optimized compiled unit
//!
//! [`JitCode`] is the compiler's output for one optimized code block: the
//! linker table, inline cache templates, OSR exits and entrypoints, and the
//! variable event stream used to rebuild interpreter state. It is immutable
//! once published, apart from the tier-up state at the bottom of the struct,
//! which the running code and the compiler threads update concurrently.
//!
//! # Tier-up
//!
//! ```text
//! tier_up_check ──counter crossed──▶ Worklist::submit ──▶ (compiler thread)
//!       │                                                     │
//!       │          set_optimization_threshold_based_on_       ▼
//!       │          compilation_result  ◀──────────── Worklist::complete_ready
//!       │
//!       └──loop hint with entry block──▶ EnterOsr ──prepare_osr_entry fails──▶
//!                                        record_osr_entry_failure (back-off)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::code_block::{CodeBlock, JettisonReason, JitType};
use crate::common_data::CommonData;
use crate::error::OsrEntryError;
use crate::inline_cache::{UnlinkedCallLinkInfo, UnlinkedStubInfo};
use crate::linker::LinkerIr;
use crate::operands::Operands;
use crate::origin::{BytecodeIndex, CallSiteIndex, CodeOrigin};
use crate::osr::{ExitState, OsrEntryData, OsrEntryPlan, OsrExit};
use crate::recovery::{MachineFrame, MinifiedGraph, RegisterSet, ValueRecovery, VariableEventStream};
use crate::tier_up::{
    CompilationResult, TierUpCounter, TierUpDecision, TierUpSite, TriggerReason,
};
use crate::tracked::TrackedReferences;
use crate::value::Value;
use crate::vm::Vm;
use crate::worklist::{CompileFn, Plan};

#[derive(Debug)]
pub struct JitCode {
    jit_type: JitType,
    common: CommonData,
    linker_ir: LinkerIr,
    unlinked_call_link_infos: Vec<UnlinkedCallLinkInfo>,
    unlinked_stub_infos: Vec<UnlinkedStubInfo>,
    osr_entries: Vec<OsrEntryData>,
    osr_exits: Vec<OsrExit>,
    variable_event_stream: VariableEventStream,
    minified_graph: MinifiedGraph,

    // Tier-up state, mutated while running
    tier_up_counter: TierUpCounter,
    tier_up_entry_triggers: DashMap<BytecodeIndex, TriggerReason>,
    osr_entry_block: RwLock<Option<Arc<CodeBlock>>>,
    osr_entry_retry: AtomicU8,
    abandon_osr_entry: AtomicBool,
}

impl JitCode {
    pub fn new(jit_type: JitType, common: CommonData, linker_ir: LinkerIr) -> Self {
        JitCode {
            jit_type,
            common,
            linker_ir,
            unlinked_call_link_infos: Vec::new(),
            unlinked_stub_infos: Vec::new(),
            osr_entries: Vec::new(),
            osr_exits: Vec::new(),
            variable_event_stream: VariableEventStream::new(),
            minified_graph: MinifiedGraph::new(),
            tier_up_counter: TierUpCounter::new(),
            tier_up_entry_triggers: DashMap::new(),
            osr_entry_block: RwLock::new(None),
            osr_entry_retry: AtomicU8::new(0),
            abandon_osr_entry: AtomicBool::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Compile-time construction
    // -------------------------------------------------------------------------

    pub fn add_call_link_info(&mut self, unlinked: UnlinkedCallLinkInfo) -> usize {
        self.unlinked_call_link_infos.push(unlinked);
        self.unlinked_call_link_infos.len() - 1
    }

    pub fn add_stub_info(&mut self, unlinked: UnlinkedStubInfo) -> usize {
        self.unlinked_stub_infos.push(unlinked);
        self.unlinked_stub_infos.len() - 1
    }

    pub fn append_osr_exit(&mut self, exit: OsrExit) -> usize {
        self.osr_exits.push(exit);
        self.osr_exits.len() - 1
    }

    pub fn variable_event_stream_mut(&mut self) -> &mut VariableEventStream {
        &mut self.variable_event_stream
    }

    pub fn minified_graph_mut(&mut self) -> &mut MinifiedGraph {
        &mut self.minified_graph
    }

    pub fn common_mut(&mut self) -> &mut CommonData {
        &mut self.common
    }

    /// Store the loop entrypoints sorted by bytecode index
    ///
    /// Called once, after the last entrypoint is known. The sort is stable so
    /// entries at the same index keep their emission order.
    pub fn finalize_osr_entrypoints(&mut self, mut entries: Vec<OsrEntryData>) {
        entries.sort_by_key(|e| e.bytecode_index);
        assert!(
            entries
                .windows(2)
                .all(|w| w[0].bytecode_index <= w[1].bytecode_index),
            "OSR entrypoints not sorted after finalization"
        );
        self.osr_entries = entries;
    }

    /// Drop spare capacity once compilation is done
    pub fn shrink_to_fit(&mut self) {
        self.common.shrink_to_fit();
        self.osr_entries.shrink_to_fit();
        self.osr_exits.shrink_to_fit();
        self.unlinked_call_link_infos.shrink_to_fit();
        self.unlinked_stub_infos.shrink_to_fit();
        self.variable_event_stream.shrink_to_fit();
        self.minified_graph.prepare_and_shrink();
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn jit_type(&self) -> JitType {
        self.jit_type
    }

    #[inline]
    pub fn common(&self) -> &CommonData {
        &self.common
    }

    pub fn linker_ir(&self) -> &LinkerIr {
        &self.linker_ir
    }

    pub fn unlinked_call_link_infos(&self) -> &[UnlinkedCallLinkInfo] {
        &self.unlinked_call_link_infos
    }

    pub fn unlinked_stub_infos(&self) -> &[UnlinkedStubInfo] {
        &self.unlinked_stub_infos
    }

    pub fn osr_exits(&self) -> &[OsrExit] {
        &self.osr_exits
    }

    pub fn osr_entries(&self) -> &[OsrEntryData] {
        &self.osr_entries
    }

    pub fn variable_event_stream(&self) -> &VariableEventStream {
        &self.variable_event_stream
    }

    pub fn minified_graph(&self) -> &MinifiedGraph {
        &self.minified_graph
    }

    pub fn tier_up_counter(&self) -> &TierUpCounter {
        &self.tier_up_counter
    }

    // -------------------------------------------------------------------------
    // State reconstruction
    // -------------------------------------------------------------------------

    /// Where every interpreter variable lives at `stream_index`
    ///
    /// Pure: the same block and index always give the same recoveries.
    pub fn reconstruct(
        &self,
        code_block: &CodeBlock,
        code_origin: CodeOrigin,
        stream_index: usize,
    ) -> Operands<ValueRecovery> {
        let baseline = code_block.baseline_version();
        trace!(
            target: "osrtier::osr::reconstruct",
            code_block = code_block.id(),
            origin = %code_origin,
            stream_index,
            "Reconstructing"
        );
        self.variable_event_stream.reconstruct(
            baseline.num_parameters(),
            baseline.num_locals(),
            &self.minified_graph,
            stream_index,
        )
    }

    /// [`JitCode::reconstruct`], materialized against a suspended frame
    ///
    /// Must run on the thread that owns `frame`.
    pub fn reconstruct_values(
        &self,
        code_block: &CodeBlock,
        code_origin: CodeOrigin,
        stream_index: usize,
        frame: &MachineFrame,
    ) -> Operands<Option<Value>> {
        self.reconstruct(code_block, code_origin, stream_index)
            .map(|_, recovery| recovery.recover(frame))
    }

    /// Registers holding live values where `call_site`'s handler resumes
    pub fn live_registers_at_exception_handling_call_site(
        &self,
        code_block: &CodeBlock,
        call_site: CallSiteIndex,
    ) -> RegisterSet {
        let mut live = RegisterSet::new();
        let Some(exit) = self
            .osr_exits
            .iter()
            .find(|exit| exit.exception_handler == Some(call_site))
        else {
            return live;
        };
        let recoveries = self.reconstruct(code_block, exit.code_origin, exit.stream_index);
        for recovery in recoveries.values() {
            recovery.add_registers_to(&mut live);
        }
        live
    }

    /// Take exit `exit_index`: rebuild baseline state and count the exit
    ///
    /// Reaching `osr_exit_count_for_reoptimization` exits jettisons the block
    /// and counts a reoptimization on its baseline.
    ///
    /// # Panics
    /// Panics if `exit_index` is out of range or the block has no linked data.
    pub fn exit_to_baseline(
        &self,
        code_block: &Arc<CodeBlock>,
        exit_index: usize,
        frame: &MachineFrame,
    ) -> ExitState {
        let exit = &self.osr_exits[exit_index];
        let values =
            self.reconstruct_values(code_block, exit.code_origin, exit.stream_index, frame);

        let jit_data = code_block
            .jit_data()
            .unwrap_or_else(|| panic!("exit from code block {} with no linked data", code_block.id()));
        let total = jit_data.record_exit(exit_index);
        let limit = code_block.config().osr_exit_count_for_reoptimization;

        debug!(
            target: "osrtier::osr::exit",
            code_block = code_block.id(),
            exit = exit_index,
            kind = ?exit.kind,
            origin = %exit.code_origin,
            total,
            "OSR exit"
        );

        let triggered_jettison = total == limit;
        if triggered_jettison && code_block.jettison(JettisonReason::OsrExitCount) {
            code_block.baseline_version().count_reoptimization();
        }

        ExitState {
            bytecode_index: exit.code_origin.bytecode_index,
            code_origin: exit.code_origin,
            values,
            total_exit_count: total,
            triggered_jettison,
        }
    }

    /// Code origin of the exit whose specialized code contains `pc`
    ///
    /// Exits still using the shared thunk are skipped; the thunk belongs to
    /// every exit at once.
    pub fn find_pc(&self, code_block: &CodeBlock, pc: u64) -> Option<CodeOrigin> {
        let jit_data = code_block.jit_data()?;
        jit_data
            .specialized_exit_code()
            .into_iter()
            .find(|(_, code)| code.contains(pc))
            .and_then(|(index, _)| self.osr_exits.get(index))
            .map(|exit| exit.code_origin_for_exit_profile)
    }

    // -------------------------------------------------------------------------
    // OSR entry
    // -------------------------------------------------------------------------

    /// Entrypoint at `bytecode_index`, by binary search
    pub fn osr_entry_data_for(&self, bytecode_index: BytecodeIndex) -> Option<&OsrEntryData> {
        self.osr_entries
            .binary_search_by_key(&bytecode_index, |e| e.bytecode_index)
            .ok()
            .map(|i| &self.osr_entries[i])
    }

    /// Validate a baseline frame against the entrypoint at `bytecode_index`
    pub fn prepare_osr_entry(
        &self,
        bytecode_index: BytecodeIndex,
        baseline_values: &Operands<Value>,
    ) -> Result<OsrEntryPlan, OsrEntryError> {
        if self.is_osr_entry_abandoned() {
            return Err(OsrEntryError::Abandoned);
        }
        let entry = self
            .osr_entry_data_for(bytecode_index)
            .ok_or(OsrEntryError::NoEntryPoint(bytecode_index))?;
        let plan = entry.prepare(baseline_values);
        match &plan {
            Ok(_) => debug!(target: "osrtier::osr::entry", %bytecode_index, "Prepared OSR entry"),
            Err(err) => debug!(target: "osrtier::osr::entry", %bytecode_index, %err, "OSR entry rejected"),
        }
        plan
    }

    pub fn osr_entry_block(&self) -> Option<Arc<CodeBlock>> {
        self.osr_entry_block.read().clone()
    }

    /// Install the unit compiled for entry at one of this unit's loops
    pub fn set_osr_entry_block(&self, code_block: &CodeBlock, entry_block: Arc<CodeBlock>) {
        debug!(
            target: "osrtier::osr::entry",
            code_block = code_block.id(),
            entry_block = entry_block.id(),
            bytecode = ?entry_block.osr_entry_bytecode(),
            "Set OSR entry block"
        );
        *self.osr_entry_block.write() = Some(entry_block);
    }

    /// Retire the entry block and restart tier-up from warm-up
    ///
    /// # Panics
    /// Panics if there is no entry block.
    pub fn clear_osr_entry_block_and_reset_thresholds(&self, code_block: &CodeBlock) {
        let entry_block = self.osr_entry_block.write().take();
        let entry_block = match entry_block {
            Some(block) => block,
            None => panic!("code block {} has no OSR entry block to clear", code_block.id()),
        };
        self.osr_entry_retry.store(0, Ordering::Relaxed);
        if let Some(bytecode_index) = entry_block.osr_entry_bytecode() {
            self.tier_up_entry_triggers
                .insert(bytecode_index, TriggerReason::NoTrigger);
        }
        self.set_optimization_threshold_based_on_compilation_result(
            code_block,
            CompilationResult::Deferred,
        );
    }

    pub fn osr_entry_retry(&self) -> u8 {
        self.osr_entry_retry.load(Ordering::Relaxed)
    }

    pub fn is_osr_entry_abandoned(&self) -> bool {
        self.abandon_osr_entry.load(Ordering::Acquire)
    }

    /// Back off after the entry block refused the baseline frame
    ///
    /// After `osr_entry_retry_threshold` failures, OSR entry is abandoned for
    /// this unit: triggers are cleared and the entry block is retired.
    pub fn record_osr_entry_failure(&self, code_block: &CodeBlock) {
        let retries = self
            .osr_entry_retry
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        if retries < code_block.config().osr_entry_retry_threshold {
            return;
        }

        self.abandon_osr_entry.store(true, Ordering::Release);
        self.tier_up_entry_triggers.clear();
        debug!(
            target: "osrtier::osr::entry",
            code_block = code_block.id(),
            retries,
            "Abandoning OSR entry"
        );
        if self.osr_entry_block.read().is_some() {
            self.clear_osr_entry_block_and_reset_thresholds(code_block);
        }
    }

    // -------------------------------------------------------------------------
    // Tier-up triggers and thresholds
    // -------------------------------------------------------------------------

    pub fn trigger(&self, bytecode_index: BytecodeIndex) -> TriggerReason {
        self.tier_up_entry_triggers
            .get(&bytecode_index)
            .map(|t| *t)
            .unwrap_or_default()
    }

    pub fn set_trigger(&self, bytecode_index: BytecodeIndex, reason: TriggerReason) {
        self.tier_up_entry_triggers.insert(bytecode_index, reason);
    }

    pub fn optimize_next_invocation(&self, code_block: &CodeBlock) {
        trace!(target: "osrtier::tier_up::threshold", code_block = code_block.id(), "Optimize next invocation");
        self.tier_up_counter.set_new_threshold(0);
    }

    pub fn dont_optimize_anytime_soon(&self, code_block: &CodeBlock) {
        trace!(target: "osrtier::tier_up::threshold", code_block = code_block.id(), "Don't optimize anytime soon");
        self.tier_up_counter.defer_indefinitely();
    }

    pub fn optimize_after_warm_up(&self, code_block: &CodeBlock) {
        let baseline = code_block.baseline_version();
        let threshold = baseline
            .adjusted_counter_value(code_block.config().threshold_for_optimize_after_warm_up);
        trace!(target: "osrtier::tier_up::threshold", code_block = code_block.id(), threshold, "Optimize after warm-up");
        self.tier_up_counter.set_new_threshold(threshold);
    }

    pub fn optimize_soon(&self, code_block: &CodeBlock) {
        let baseline = code_block.baseline_version();
        let threshold =
            baseline.adjusted_counter_value(code_block.config().threshold_for_optimize_soon);
        trace!(target: "osrtier::tier_up::threshold", code_block = code_block.id(), threshold, "Optimize soon");
        self.tier_up_counter.set_new_threshold(threshold);
    }

    pub fn force_optimization_slow_path_concurrently(&self, code_block: &CodeBlock) {
        trace!(target: "osrtier::tier_up::threshold", code_block = code_block.id(), "Forcing slow path concurrently");
        self.tier_up_counter.force_slow_path_concurrently();
    }

    /// True exactly once per crossing
    pub fn check_if_optimization_threshold_reached(&self, code_block: &CodeBlock) -> bool {
        let crossed = self.tier_up_counter.check_if_threshold_crossed_and_set();
        if crossed {
            debug!(
                target: "osrtier::tier_up::threshold",
                code_block = code_block.id(),
                count = self.tier_up_counter.count(),
                threshold = self.tier_up_counter.threshold(),
                "Threshold crossed"
            );
        }
        crossed
    }

    /// Apply the outcome of a background compilation requested by `code_block`
    pub fn set_optimization_threshold_based_on_compilation_result(
        &self,
        code_block: &CodeBlock,
        result: CompilationResult,
    ) {
        let baseline = code_block.baseline_version();
        match result {
            CompilationResult::Successful => {
                self.optimize_next_invocation(code_block);
                baseline.set_has_been_compiled_with_top_tier();
            }
            CompilationResult::Failed => {
                self.dont_optimize_anytime_soon(code_block);
                baseline.set_did_fail_top_tier_compilation();
                debug!(target: "osrtier::tier_up::result", code_block = code_block.id(), "Compilation failed; tier-up disabled");
            }
            CompilationResult::Deferred => {
                self.optimize_after_warm_up(code_block);
            }
            CompilationResult::Invalidated => {
                baseline.count_reoptimization();
                self.optimize_after_warm_up(code_block);
                debug!(target: "osrtier::tier_up::result", code_block = code_block.id(), "Compilation invalidated; retrying after warm-up");
            }
        }
    }

    /// Tier-up check at a function entry or loop hint
    ///
    /// `compile` runs on a compiler thread if a compilation is requested.
    pub fn tier_up_check(
        &self,
        code_block: &Arc<CodeBlock>,
        vm: &Vm,
        site: TierUpSite,
        compile: CompileFn,
    ) -> TierUpDecision {
        let baseline = code_block.baseline_version();
        if baseline.did_fail_top_tier_compilation() || code_block.is_invalidated() {
            self.dont_optimize_anytime_soon(code_block);
            return TierUpDecision::Suppressed;
        }

        let loop_index = site.bytecode_index();
        if let Some(bytecode_index) = loop_index {
            if let Some(entry_block) = self.osr_entry_block() {
                if self.is_osr_entry_abandoned() {
                    return TierUpDecision::Suppressed;
                }
                if entry_block.osr_entry_bytecode() == Some(bytecode_index)
                    && !entry_block.is_invalidated()
                {
                    return TierUpDecision::EnterOsr(entry_block);
                }
            }

            if self.trigger(bytecode_index) == TriggerReason::CompileOptimizedCodeForced {
                return self.request_compile(code_block, vm, loop_index, compile);
            }
        } else if baseline.has_been_compiled_with_top_tier() {
            return TierUpDecision::Suppressed;
        }

        self.tier_up_counter.count_execution();
        if !self.check_if_optimization_threshold_reached(code_block) {
            return TierUpDecision::KeepCounting;
        }
        let osr_entry = loop_index.filter(|_| !self.is_osr_entry_abandoned());
        self.request_compile(code_block, vm, osr_entry, compile)
    }

    fn request_compile(
        &self,
        code_block: &Arc<CodeBlock>,
        vm: &Vm,
        osr_entry: Option<BytecodeIndex>,
        compile: CompileFn,
    ) -> TierUpDecision {
        if vm.worklist().is_queued(code_block) {
            return TierUpDecision::AlreadyQueued;
        }
        let plan = Plan::new(code_block, osr_entry, compile);
        if !vm.worklist().submit(plan) {
            return TierUpDecision::AlreadyQueued;
        }
        if let Some(bytecode_index) = osr_entry {
            self.set_trigger(bytecode_index, TriggerReason::CompileOptimizedCode);
        }
        TierUpDecision::RequestedCompile
    }

    // -------------------------------------------------------------------------
    // GC
    // -------------------------------------------------------------------------

    /// Assert every retained cell is still tracked
    ///
    /// # Panics
    /// Panics on the first dangling reference.
    pub fn validate_references(&self, tracked: &TrackedReferences) {
        self.common.validate_references(tracked);
        for entry in &self.osr_entries {
            entry.validate_references(tracked);
        }
        self.minified_graph.validate_references(tracked);
    }
}
