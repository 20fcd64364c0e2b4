//! Shared fixtures for osrtier integration tests
//!
//! Builders for VMs, global objects, code blocks and the compiled units used
//! by the scenario tests.

#![allow(dead_code)]

use std::sync::Arc;

use osrtier::*;

/// Bytecode index of the exit used by the reconstruction scenario
pub const EXIT_BYTECODE: BytecodeIndex = BytecodeIndex(42);

/// Stream index of that exit
pub const EXIT_STREAM_INDEX: usize = 7;

/// Node holding the constant 5
pub const CONSTANT_NODE: NodeId = NodeId(2);

pub fn test_config() -> TierConfig {
    TierConfig {
        compiler_threads: 2,
        ..TierConfig::default()
    }
}

pub fn vm() -> Vm {
    vm_with(test_config())
}

pub fn vm_with(config: TierConfig) -> Vm {
    osrtier::logging::init(&config);
    Vm::new(config)
}

/// Distinct, valid cell address
pub fn cell(n: u64) -> CellRef {
    CellRef::new(0x10_0000 + n * 0x40)
}

/// Global object with its own invariant registry
pub fn global() -> Arc<GlobalObject> {
    GlobalObject::new(cell(0))
}

/// Baseline block with `a` and `b` as its two locals
pub fn baseline(vm: &Vm, global: &Arc<GlobalObject>) -> Arc<CodeBlock> {
    CodeBlock::new_baseline(vm, Arc::clone(global), 1, 2)
}

pub fn dfg(vm: &Vm, baseline: &Arc<CodeBlock>) -> Arc<CodeBlock> {
    CodeBlock::new_optimized(vm, JitType::Dfg, baseline, None, 6)
}

/// `[GlobalObject, Watchpoint(HavingABadTime), CellPointer(x)]`
pub fn scenario_a_code(x: CellRef) -> JitCode {
    let mut ir = LinkerIrBuilder::new();
    ir.add(LinkerRecord::GlobalObject);
    ir.add(LinkerRecord::Watchpoint(WatchpointSetKind::HavingABadTime));
    ir.add(LinkerRecord::CellPointer(x));
    JitCode::new(JitType::Dfg, CommonData::unlinked(), ir.build())
}

/// Empty compiled unit with no linker records
pub fn empty_code() -> JitCode {
    JitCode::new(JitType::Dfg, CommonData::unlinked(), LinkerIr::default())
}

/// Unit with one exit at bc#42, stream index 7, where local `a` is in r0
/// and local `b` is the constant 5
pub fn reconstruction_code() -> JitCode {
    let mut code = empty_code();

    let graph = code.minified_graph_mut();
    graph.append(MinifiedNode { id: NodeId(1), constant: None });
    graph.append(MinifiedNode { id: CONSTANT_NODE, constant: Some(Value::Int32(5)) });

    let a = Operand::Local(0);
    let b = Operand::Local(1);
    let stream = code.variable_event_stream_mut();
    stream.append(VariableEvent::Reset);
    stream.append(VariableEvent::Birth(NodeId(1)));
    stream.append(VariableEvent::Spill {
        node: NodeId(1),
        slot: StackSlot(5),
        format: DataFormat::JsValue,
    });
    stream.append(VariableEvent::Fill {
        node: NodeId(1),
        location: RegisterLocation::Gpr(Gpr::new(0)),
        format: DataFormat::JsValue,
    });
    stream.append(VariableEvent::MovHint { node: NodeId(1), operand: a });
    stream.append(VariableEvent::Birth(CONSTANT_NODE));
    stream.append(VariableEvent::MovHint { node: CONSTANT_NODE, operand: b });
    assert_eq!(stream.len(), EXIT_STREAM_INDEX);

    code.append_osr_exit(OsrExit::new(
        CodeOrigin::new(EXIT_BYTECODE),
        EXIT_STREAM_INDEX,
        ExitKind::BadType,
    ));
    code.shrink_to_fit();
    code
}

/// Install `code` into a fresh DFG block, panicking on link failure
pub fn installed_dfg(vm: &Vm, baseline: &Arc<CodeBlock>, code: JitCode) -> Arc<CodeBlock> {
    let block = dfg(vm, baseline);
    block.install(Arc::new(code)).expect("link should succeed");
    block
}

/// Compile closure that hands back an already-built block
pub fn compiles_to(block: Arc<CodeBlock>) -> CompileFn {
    Box::new(move |_| PlanOutcome::Compiled(block))
}

pub fn compile_fails() -> CompileFn {
    Box::new(|_| PlanOutcome::Failed)
}

pub fn compile_defers() -> CompileFn {
    Box::new(|_| PlanOutcome::Deferred)
}
