//! OSR entry lookup, exit bookkeeping, PC mapping, inline caches and
//! reference validation on linked units.

mod common;

use std::sync::Arc;

use osrtier::inline_cache::StubRoutine;
use osrtier::*;

fn entry_at(index: u32, offset: u32) -> OsrEntryData {
    let mut expected = Operands::new(1, 2, AbstractValue::top());
    expected[Operand::Local(0)] = AbstractValue::of_type(SpeculatedType::INT32);
    OsrEntryData::new(BytecodeIndex(index), offset, expected)
}

fn frame_values(local0: Value) -> Operands<Value> {
    let mut values = Operands::new(1, 2, Value::Undefined);
    values[Operand::Local(0)] = local0;
    values
}

// ============================================================
// OSR entry
// ============================================================

#[test]
fn test_entrypoints_are_sorted_and_searchable() {
    let mut code = common::empty_code();
    code.finalize_osr_entrypoints(vec![entry_at(30, 0x300), entry_at(10, 0x100), entry_at(20, 0x200)]);

    let order: Vec<_> = code.osr_entries().iter().map(|e| e.bytecode_index).collect();
    assert_eq!(order, vec![BytecodeIndex(10), BytecodeIndex(20), BytecodeIndex(30)]);
    assert_eq!(
        code.osr_entry_data_for(BytecodeIndex(20)).map(|e| e.machine_code_offset),
        Some(0x200)
    );
    assert!(code.osr_entry_data_for(BytecodeIndex(15)).is_none());
}

#[test]
fn test_prepare_osr_entry() {
    let mut code = common::empty_code();
    code.finalize_osr_entrypoints(vec![entry_at(10, 0x100)]);

    let plan = code
        .prepare_osr_entry(BytecodeIndex(10), &frame_values(Value::Int32(3)))
        .unwrap();
    assert_eq!(plan.machine_code_offset, 0x100);
    assert_eq!(plan.values[Operand::Local(0)], Value::Int32(3));

    assert_eq!(
        code.prepare_osr_entry(BytecodeIndex(11), &frame_values(Value::Int32(3))),
        Err(OsrEntryError::NoEntryPoint(BytecodeIndex(11)))
    );
    assert_eq!(
        code.prepare_osr_entry(BytecodeIndex(10), &frame_values(Value::Null)),
        Err(OsrEntryError::UnexpectedValue {
            operand: Operand::Local(0),
            value: Value::Null,
        })
    );
}

// ============================================================
// OSR exit
// ============================================================

#[test]
fn test_find_pc_skips_thunk_exits() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);

    let mut code = common::empty_code();
    let first = CodeOrigin::new(BytecodeIndex(4));
    let second = CodeOrigin::new(BytecodeIndex(9));
    code.append_osr_exit(OsrExit::new(first, 0, ExitKind::Overflow));
    code.append_osr_exit(OsrExit::new(second, 0, ExitKind::OutOfBounds));
    let dfg = common::installed_dfg(&vm, &baseline, code);
    let data = dfg.jit_data().unwrap();
    let jit_code = dfg.jit_code().unwrap();

    assert_eq!(data.exits_using_thunk(), 2);
    let thunk_pc = vm.osr_exit_thunk().start() + 8;
    assert_eq!(jit_code.find_pc(&dfg, thunk_pc), None);

    data.set_exit_code(1, Arc::new(ExecutableMemoryHandle::new(0x5000, 0x5040)));
    assert_eq!(data.exits_using_thunk(), 1);
    assert_eq!(jit_code.find_pc(&dfg, 0x5000), Some(second));
    assert_eq!(jit_code.find_pc(&dfg, 0x503f), Some(second));
    assert_eq!(jit_code.find_pc(&dfg, 0x5040), None);
    assert_eq!(jit_code.find_pc(&dfg, thunk_pc), None);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_set_exit_code_out_of_range_panics() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::installed_dfg(&vm, &baseline, common::empty_code());
    dfg.jit_data()
        .unwrap()
        .set_exit_code(0, Arc::new(ExecutableMemoryHandle::new(0x5000, 0x5040)));
}

#[test]
fn test_exit_limit_jettisons_and_counts_reoptimization() {
    let vm = common::vm_with(TierConfig {
        osr_exit_count_for_reoptimization: 3,
        ..common::test_config()
    });
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::installed_dfg(&vm, &baseline, common::reconstruction_code());
    let code = Arc::clone(dfg.jit_code().unwrap());
    let frame = MachineFrame::new(8);

    for expected in 1..=2 {
        let state = code.exit_to_baseline(&dfg, 0, &frame);
        assert_eq!(state.total_exit_count, expected);
        assert!(!state.triggered_jettison);
    }
    assert!(!dfg.is_invalidated());

    let state = code.exit_to_baseline(&dfg, 0, &frame);
    assert!(state.triggered_jettison);
    assert!(dfg.is_invalidated());
    assert_eq!(dfg.jettison_reason(), Some(JettisonReason::OsrExitCount));
    assert_eq!(baseline.reoptimization_retry_counter(), 1);
    assert_eq!(dfg.jit_data().unwrap().exit_count(0), 3);

    // Already jettisoned; further exits are only counted.
    let state = code.exit_to_baseline(&dfg, 0, &frame);
    assert!(!state.triggered_jettison);
    assert_eq!(baseline.reoptimization_retry_counter(), 1);
    assert_eq!(vm.reclaim_jettisoned(), 1);
}

#[test]
fn test_dead_and_displaced_operands() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);

    let mut code = common::empty_code();
    code.minified_graph_mut().append(MinifiedNode { id: NodeId(1), constant: None });
    let stream = code.variable_event_stream_mut();
    stream.append(VariableEvent::Birth(NodeId(1)));
    stream.append(VariableEvent::Spill {
        node: NodeId(1),
        slot: StackSlot(9),
        format: DataFormat::Int32,
    });
    stream.append(VariableEvent::MovHint { node: NodeId(1), operand: Operand::Local(0) });
    stream.append(VariableEvent::SetLocal {
        operand: Operand::Local(1),
        slot: StackSlot(11),
        format: DataFormat::Double,
    });
    let after_flush = stream.len();
    stream.append(VariableEvent::Death(NodeId(1)));
    let after_death = stream.len();
    code.shrink_to_fit();

    let dfg = common::installed_dfg(&vm, &baseline, code);
    let jit_code = dfg.jit_code().unwrap();
    let origin = CodeOrigin::new(BytecodeIndex(1));

    let live = jit_code.reconstruct(&dfg, origin, after_flush);
    assert_eq!(live[Operand::Argument(0)], ValueRecovery::Displaced(StackSlot(0), DataFormat::JsValue));
    assert_eq!(live[Operand::Local(0)], ValueRecovery::Displaced(StackSlot(9), DataFormat::Int32));
    assert_eq!(live[Operand::Local(1)], ValueRecovery::Displaced(StackSlot(11), DataFormat::Double));

    let dead = jit_code.reconstruct(&dfg, origin, after_death);
    assert_eq!(dead[Operand::Local(0)], ValueRecovery::Dead);

    let mut frame = MachineFrame::new(12);
    frame.set_slot(9, 41);
    frame.set_slot(11, 2.5f64.to_bits());
    let values = jit_code.reconstruct_values(&dfg, origin, after_flush, &frame);
    assert_eq!(values[Operand::Local(0)], Some(Value::Int32(41)));
    assert_eq!(values[Operand::Local(1)], Some(Value::Double(2.5)));
}

#[test]
fn test_exit_after_register_reuse_reads_spill_slot() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);

    let mut code = common::empty_code();
    code.minified_graph_mut().append(MinifiedNode { id: NodeId(1), constant: None });
    code.minified_graph_mut().append(MinifiedNode { id: NodeId(3), constant: None });
    let r0 = RegisterLocation::Gpr(Gpr::new(0));
    let stream = code.variable_event_stream_mut();
    stream.append(VariableEvent::Birth(NodeId(1)));
    stream.append(VariableEvent::Fill { node: NodeId(1), location: r0, format: DataFormat::JsValue });
    stream.append(VariableEvent::MovHint { node: NodeId(1), operand: Operand::Local(0) });
    stream.append(VariableEvent::Spill {
        node: NodeId(1),
        slot: StackSlot(3),
        format: DataFormat::JsValue,
    });
    stream.append(VariableEvent::Birth(NodeId(3)));
    stream.append(VariableEvent::Fill { node: NodeId(3), location: r0, format: DataFormat::JsValue });
    stream.append(VariableEvent::MovHint { node: NodeId(3), operand: Operand::Local(1) });
    let exit_index = stream.len();
    code.append_osr_exit(OsrExit::new(
        CodeOrigin::new(BytecodeIndex(9)),
        exit_index,
        ExitKind::BadType,
    ));
    code.shrink_to_fit();

    let dfg = common::installed_dfg(&vm, &baseline, code);
    let jit_code = dfg.jit_code().unwrap();

    let mut frame = MachineFrame::new(4);
    frame.set_slot(3, Value::Int32(10).encode());
    frame.set_gpr(Gpr::new(0), Value::Int32(20).encode());
    let state = jit_code.exit_to_baseline(&dfg, 0, &frame);
    assert_eq!(state.values[Operand::Local(0)], Some(Value::Int32(10)));
    assert_eq!(state.values[Operand::Local(1)], Some(Value::Int32(20)));
}

#[test]
fn test_live_registers_at_exception_call_site() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);

    let mut code = common::reconstruction_code();
    let origin = CodeOrigin::new(BytecodeIndex(50));
    let call_site = code.common_mut().add_code_origin(origin);
    code.append_osr_exit(
        OsrExit::new(origin, common::EXIT_STREAM_INDEX, ExitKind::ExceptionCheck)
            .for_exception_handler(call_site),
    );
    let dfg = common::installed_dfg(&vm, &baseline, code);
    let jit_code = dfg.jit_code().unwrap();

    assert_eq!(jit_code.common().code_origin_for(call_site), Some(origin));
    let live = jit_code.live_registers_at_exception_handling_call_site(&dfg, call_site);
    assert_eq!(live.len(), 1);
    assert!(live.contains_gpr(Gpr::new(0)));

    let unknown = jit_code.live_registers_at_exception_handling_call_site(&dfg, CallSiteIndex(99));
    assert!(unknown.is_empty());
}

// ============================================================
// Inline caches
// ============================================================

#[test]
fn test_linking_initializes_inline_caches() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);

    let mut ir = LinkerIrBuilder::new();
    ir.add(LinkerRecord::CallLinkInfo(0));
    let mut code = JitCode::new(JitType::Dfg, CommonData::unlinked(), ir.build());

    let origin = CodeOrigin::new(BytecodeIndex(3));
    let call_site = code.common_mut().add_code_origin(origin);
    let call = code.add_call_link_info(UnlinkedCallLinkInfo {
        code_origin: origin,
        call_type: CallType::Call,
        call_site_index: call_site,
    });
    let access = code.add_stub_info(UnlinkedStubInfo {
        access_type: AccessType::GetById,
        code_origin: origin,
        call_site_index: call_site,
        identifier: Some(17),
        prototype_is_known_object: false,
    });
    assert_eq!(call, 0);

    let dfg = common::installed_dfg(&vm, &baseline, code);
    let data = dfg.jit_data().unwrap();

    let info = data.call_link_info(call).unwrap();
    assert!(info.is_initialized());
    assert_eq!(info.code_origin(), Some(origin));
    assert_eq!(info.owner().map(|b| b.id()), Some(dfg.id()));
    assert_eq!(info.observe(common::cell(5)), CallLinkOutcome::LinkedMonomorphic);
    assert_eq!(info.observe(common::cell(5)), CallLinkOutcome::Hit);

    let stub = data.stub_info(access).unwrap();
    assert!(stub.is_initialized());
    assert_eq!(stub.identifier(), Some(17));
    assert_eq!(stub.add_case(AccessCase::own(StructureId(1), 8)), AccessOutcome::CachedMonomorphic);
    stub.set_stub(StubRoutine {
        code: Arc::new(ExecutableMemoryHandle::new(0x9000, 0x9080)),
    });
    assert_eq!(stub.add_case(AccessCase::own(StructureId(2), 16)), AccessOutcome::AddedCase);
    assert!(!stub.has_stub());
    assert_eq!(stub.lookup(StructureId(2)), Some(16));

    // Structure 2 and callee 5 died.
    let reset = data.visit_weak(|c| c != common::cell(5), |s| s != StructureId(2));
    assert_eq!(reset, 2);
    assert_eq!(info.mode(), CacheMode::Uninitialized);
    assert_eq!(stub.mode(), CacheMode::Uninitialized);
    assert_eq!(stub.lookup(StructureId(1)), None);
}

// ============================================================
// Reference validation
// ============================================================

fn unit_with_references(cells: &[CellRef]) -> JitCode {
    let mut code = common::empty_code();
    code.common_mut().weak_references.extend_from_slice(cells);
    let mut expected = Operands::new(1, 2, AbstractValue::top());
    expected[Operand::Local(0)] = AbstractValue::constant(Value::Cell(cells[0]));
    code.finalize_osr_entrypoints(vec![OsrEntryData::new(BytecodeIndex(2), 0, expected)]);
    code.minified_graph_mut().append(MinifiedNode {
        id: NodeId(1),
        constant: Some(Value::Cell(cells[1])),
    });
    code.shrink_to_fit();
    code
}

#[test]
fn test_validate_references_accepts_tracked_cells() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let cells = [common::cell(1), common::cell(2)];
    let dfg = common::installed_dfg(&vm, &baseline, unit_with_references(&cells));

    let tracked: TrackedReferences = cells.iter().copied().collect();
    dfg.validate_references(&tracked);
}

#[test]
#[should_panic(expected = "dangling reference")]
fn test_validate_references_rejects_untracked_cell() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let cells = [common::cell(1), common::cell(2)];
    let dfg = common::installed_dfg(&vm, &baseline, unit_with_references(&cells));

    let tracked: TrackedReferences = std::iter::once(cells[0]).collect();
    dfg.validate_references(&tracked);
}
