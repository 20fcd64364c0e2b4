//! End-to-end scenarios: linking, failed linking, tier-up threshold
//! crossing and OSR exit reconstruction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use osrtier::*;

// ============================================================
// Linking
// ============================================================

#[test]
fn test_link_resolves_every_record() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let x = common::cell(7);
    let dfg = common::installed_dfg(&vm, &baseline, common::scenario_a_code(x));

    let data = dfg.jit_data().expect("installed block has linked data");
    let span = data.trailing_span();
    assert_eq!(span.len(), 3);
    assert_eq!(span[0], LinkedSlot::GlobalObject(Arc::clone(&global)));
    assert_eq!(span[2], LinkedSlot::Cell(x));

    let binding = match &span[1] {
        LinkedSlot::Watchpoint(binding) => binding,
        other => panic!("expected armed watchpoint, got {:?}", other),
    };
    assert_eq!(binding.state(), BindingState::Armed);
    assert_eq!(binding.target().map(|b| b.id()), Some(dfg.id()));
    assert!(span.iter().all(LinkedSlot::is_resolved));

    let set = global.watchpoint_set(WatchpointSetKind::HavingABadTime);
    assert_eq!(set.state(), SetState::Watched);
    assert_eq!(set.watcher_count(), 1);
}

#[test]
fn test_link_against_invalidated_set_fails_but_resolves_the_rest() {
    let vm = common::vm();
    let global = common::global();
    global.have_a_bad_time();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::dfg(&vm, &baseline);
    let x = common::cell(7);
    let code = common::scenario_a_code(x);

    let mut data = JitData::new(&code, vm.config(), Arc::clone(vm.osr_exit_thunk()));
    let err = data.try_initialize(&dfg, &code).unwrap_err();
    assert_eq!(
        err,
        LinkError::WatchpointsInvalidated {
            failed: vec![FailedWatchpoint {
                record_index: 1,
                kind: WatchpointSetKind::HavingABadTime,
            }],
        }
    );

    let span = data.trailing_span();
    assert_eq!(span[0], LinkedSlot::GlobalObject(Arc::clone(&global)));
    assert_eq!(
        span[1],
        LinkedSlot::UnarmedWatchpoint(WatchpointSetKind::HavingABadTime)
    );
    assert_eq!(span[2], LinkedSlot::Cell(x));
}

#[test]
fn test_failed_link_installs_nothing() {
    let vm = common::vm();
    let global = common::global();
    global.have_a_bad_time();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::dfg(&vm, &baseline);

    assert!(dfg
        .install(Arc::new(common::scenario_a_code(common::cell(7))))
        .is_err());
    assert!(dfg.jit_code().is_none());
    assert!(dfg.jit_data().is_none());
    assert!(!dfg.is_invalidated());
}

#[test]
fn test_link_reports_every_failed_watchpoint() {
    let vm = common::vm();
    let global = common::global();
    global
        .invariants()
        .fire(WatchpointSetKind::ArraySpecies, "species replaced");
    global
        .invariants()
        .fire(WatchpointSetKind::NumberToString, "toString replaced");

    let mut ir = LinkerIrBuilder::new();
    ir.add(LinkerRecord::Watchpoint(WatchpointSetKind::ArraySpecies));
    ir.add(LinkerRecord::Watchpoint(WatchpointSetKind::MasqueradesAsUndefined));
    ir.add(LinkerRecord::Watchpoint(WatchpointSetKind::NumberToString));
    let code = JitCode::new(JitType::Dfg, CommonData::unlinked(), ir.build());

    let baseline = common::baseline(&vm, &global);
    let dfg = common::dfg(&vm, &baseline);
    match dfg.install(Arc::new(code)) {
        Err(LinkError::WatchpointsInvalidated { failed }) => {
            let indices: Vec<_> = failed.iter().map(|f| f.record_index).collect();
            assert_eq!(indices, vec![0, 2]);
        }
        other => panic!("expected link failure, got {:?}", other),
    }
}

#[test]
fn test_firing_a_linked_watchpoint_jettisons_the_block() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::installed_dfg(&vm, &baseline, common::scenario_a_code(common::cell(7)));

    assert_eq!(global.have_a_bad_time(), 1);
    assert!(dfg.is_invalidated());
    assert_eq!(
        dfg.jettison_reason(),
        Some(JettisonReason::WatchpointFired(WatchpointSetKind::HavingABadTime))
    );
    assert!(!dfg.jit_code().unwrap().common().is_still_valid());
    assert_eq!(vm.pending_reclamations(), 1);
    assert_eq!(vm.reclaim_jettisoned(), 1);
}

// ============================================================
// Tier-up threshold
// ============================================================

#[test]
fn test_threshold_crossed_exactly_once() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::installed_dfg(&vm, &baseline, common::empty_code());
    let code = dfg.jit_code().unwrap();

    code.optimize_soon(&dfg);
    assert_eq!(code.tier_up_counter().threshold(), 1_000);

    for _ in 0..999 {
        let decision =
            code.tier_up_check(&dfg, &vm, TierUpSite::FunctionEntry, common::compile_defers());
        assert_eq!(decision, TierUpDecision::KeepCounting);
    }
    assert_eq!(
        code.tier_up_check(&dfg, &vm, TierUpSite::FunctionEntry, common::compile_defers()),
        TierUpDecision::RequestedCompile
    );
    assert_eq!(code.tier_up_counter().state(), CounterState::ThresholdCrossed);

    // The 1001st execution arrives before the request is acknowledged.
    assert_eq!(
        code.tier_up_check(&dfg, &vm, TierUpSite::FunctionEntry, common::compile_defers()),
        TierUpDecision::KeepCounting
    );

    assert_eq!(vm.worklist().complete_all(Duration::from_secs(10)), 1);
    assert_eq!(code.tier_up_counter().state(), CounterState::Counting);
    assert_eq!(
        code.tier_up_counter().threshold(),
        vm.config().threshold_for_optimize_after_warm_up
    );
}

// ============================================================
// OSR exit reconstruction
// ============================================================

#[test]
fn test_exit_reconstruction_is_repeatable() {
    let vm = common::vm();
    let global = common::global();
    let baseline = common::baseline(&vm, &global);
    let dfg = common::installed_dfg(&vm, &baseline, common::reconstruction_code());
    let code = dfg.jit_code().unwrap();

    let origin = CodeOrigin::new(common::EXIT_BYTECODE);
    let a = Operand::Local(0);
    let b = Operand::Local(1);

    let first = code.reconstruct(&dfg, origin, common::EXIT_STREAM_INDEX);
    assert_eq!(first[a], ValueRecovery::InGpr(Gpr::new(0), DataFormat::JsValue));
    assert_eq!(first[b], ValueRecovery::Constant(Value::Int32(5)));

    let second = code.reconstruct(&dfg, origin, common::EXIT_STREAM_INDEX);
    assert_eq!(first, second);

    let mut frame = MachineFrame::new(8);
    frame.set_gpr(Gpr::new(0), Value::Int32(17).encode());
    let state = code.exit_to_baseline(&dfg, 0, &frame);
    assert_eq!(state.bytecode_index, common::EXIT_BYTECODE);
    assert_eq!(state.values[a], Some(Value::Int32(17)));
    assert_eq!(state.values[b], Some(Value::Int32(5)));
    assert_eq!(state.total_exit_count, 1);

    let again = code.reconstruct_values(&dfg, origin, common::EXIT_STREAM_INDEX, &frame);
    assert_eq!(again, state.values);
}
