//! osrtier - Tiered Compilation Bookkeeping and On-Stack Replacement
//!
//! Runtime data structures that make speculative, tiered execution in a
//! dynamic-language VM safe and reversible: linking compiled units against
//! live runtime state, invalidating them when global invariants break,
//! rebuilding interpreter state on OSR exit, and deciding when to tier up.
//!
//! # Architecture
//!
//! 1. **Linking** (`linker`, `jit_data`)
//!    - Compile-time [`LinkerRecord`] tables resolved into a trailing span
//!    - Watchpoint records subscribe a fresh [`WatchpointBinding`]
//!    - A failed subscription fails the whole link, after resolving every record
//!
//! 2. **Invalidation** (`watchpoint`, `code_block`)
//!    - Firing a [`WatchpointSet`] jettisons every subscribed [`CodeBlock`]
//!    - Jettisoned blocks are reclaimed later by [`Vm::reclaim_jettisoned`]
//!
//! 3. **Inline caches** (`inline_cache`)
//!    - [`CallLinkInfo`] and [`StructureStubInfo`] with a CAS'd monomorphic transition
//!
//! 4. **OSR** (`recovery`, `osr`, `jit_code`)
//!    - Variable event stream replay into [`ValueRecovery`]s
//!    - Exit to baseline, PC lookup, and loop entry preparation
//!
//! 5. **Tier-up** (`tier_up`, `worklist`)
//!    - Per-unit counter, per-loop triggers, background compilation plans
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use osrtier::*;
//!
//! let vm = Vm::new(TierConfig::default());
//! let global = GlobalObject::new(CellRef::new(0x1000));
//! let baseline = CodeBlock::new_baseline(&vm, Arc::clone(&global), 1, 2);
//! let dfg = CodeBlock::new_optimized(&vm, JitType::Dfg, &baseline, None, 4);
//!
//! let mut ir = LinkerIrBuilder::new();
//! ir.add(LinkerRecord::GlobalObject);
//! ir.add(LinkerRecord::Watchpoint(WatchpointSetKind::HavingABadTime));
//! let code = JitCode::new(JitType::Dfg, CommonData::unlinked(), ir.build());
//!
//! dfg.install(Arc::new(code)).unwrap();
//! global.have_a_bad_time();
//! assert!(dfg.is_invalidated());
//! assert_eq!(vm.reclaim_jettisoned(), 1);
//! ```

pub mod code_block;
pub mod common_data;
pub mod config;
pub mod error;
pub mod global_object;
pub mod inline_cache;
pub mod jit_code;
pub mod jit_data;
pub mod linker;
pub mod logging;
pub mod operands;
pub mod origin;
pub mod osr;
pub mod recovery;
pub mod tier_up;
pub mod tracked;
pub mod value;
pub mod vm;
pub mod watchpoint;
pub mod worklist;

pub use code_block::{CodeBlock, JettisonReason, JitType};
pub use common_data::{CommonData, StructureTransition};
pub use config::TierConfig;
pub use error::{ConfigError, ConfigResult, FailedWatchpoint, LinkError, OsrEntryError};
pub use global_object::GlobalObject;
pub use inline_cache::{
    AccessCase, AccessOutcome, AccessType, CacheMode, CallLinkInfo, CallLinkOutcome, CallType,
    StructureStubInfo, UnlinkedCallLinkInfo, UnlinkedStubInfo,
};
pub use jit_code::JitCode;
pub use jit_data::JitData;
pub use linker::{LinkedSlot, LinkerIr, LinkerIrBuilder, LinkerRecord, LinkerRecordKind};
pub use operands::{Operand, Operands};
pub use origin::{BytecodeIndex, CallSiteIndex, CodeOrigin, InlineCallFrame, InlineCallFrameId};
pub use osr::{
    AbstractValue, ExecutableMemoryHandle, ExitKind, ExitState, OsrEntryData, OsrEntryPlan,
    OsrEntryReshuffling, OsrExit, SpeculatedType,
};
pub use recovery::{
    DataFormat, Fpr, Gpr, MachineFrame, MinifiedGraph, MinifiedNode, NodeId, RegisterLocation,
    RegisterSet, StackSlot, ValueRecovery, VariableEvent, VariableEventStream,
};
pub use tier_up::{
    CompilationResult, CounterState, TierUpCounter, TierUpDecision, TierUpSite, TriggerReason,
};
pub use tracked::TrackedReferences;
pub use value::{CellRef, StructureId, Value};
pub use vm::Vm;
pub use watchpoint::{
    BindingState, InvariantRegistry, SetState, WatchpointBinding, WatchpointSet, WatchpointSetKind,
};
pub use worklist::{CompileFn, Plan, PlanOutcome, Worklist};
