// Exit-path benchmarks
//
// Measures the two operations that run when optimized code is entered or
// left for the first time:
//
// 1. Variable event stream replay at an exit (grows with stream length)
// 2. Linking a unit's record table (grows with record count)

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use osrtier::*;

// ================================================================================================
// Helper Functions
// ================================================================================================

const LOCALS: u32 = 32;

/// Unit whose stream births, fills, moves and kills `events / 4` nodes
fn unit_with_stream(events: usize) -> JitCode {
    let mut code = JitCode::new(JitType::Dfg, CommonData::unlinked(), LinkerIr::default());
    let nodes = (events / 4) as u32;

    for id in 0..nodes {
        let constant = (id % 5 == 0).then_some(Value::Int32(id as i32));
        code.minified_graph_mut().append(MinifiedNode { id: NodeId(id), constant });
    }

    let stream = code.variable_event_stream_mut();
    stream.append(VariableEvent::Reset);
    for id in 0..nodes {
        let node = NodeId(id);
        stream.append(VariableEvent::Birth(node));
        stream.append(VariableEvent::Fill {
            node,
            location: RegisterLocation::Gpr(Gpr::new((id % 16) as u8)),
            format: DataFormat::JsValue,
        });
        stream.append(VariableEvent::MovHint { node, operand: Operand::Local(id % LOCALS) });
        if id % 3 == 0 {
            stream.append(VariableEvent::Death(node));
        }
    }
    code.shrink_to_fit();
    code
}

/// Unit with `records` linker records, one in eight a watchpoint
fn unit_with_records(records: usize) -> JitCode {
    let mut ir = LinkerIrBuilder::new();
    for i in 0..records {
        let record = match i % 8 {
            0 => LinkerRecord::Watchpoint(WatchpointSetKind::ALL[(i / 8) % WatchpointSetKind::COUNT]),
            1 => LinkerRecord::GlobalObject,
            2 | 3 => LinkerRecord::NonCellPointer(i as u64),
            _ => LinkerRecord::CellPointer(CellRef::new(0x10_0000 + i as u64 * 0x40)),
        };
        ir.add(record);
    }
    JitCode::new(JitType::Dfg, CommonData::unlinked(), ir.build())
}

// ================================================================================================
// Benchmarks
// ================================================================================================

fn bench_reconstruct(c: &mut Criterion) {
    let vm = Vm::new(TierConfig::default());
    let global = GlobalObject::new(CellRef::new(0x1000));
    let baseline = CodeBlock::new_baseline(&vm, global, 2, LOCALS as usize);

    let mut group = c.benchmark_group("reconstruct");
    for events in [64usize, 512, 4096] {
        let dfg = CodeBlock::new_optimized(&vm, JitType::Dfg, &baseline, None, 8);
        dfg.install(Arc::new(unit_with_stream(events)))
            .expect("stream-only unit links");
        let code = Arc::clone(dfg.jit_code().expect("installed"));
        let end = code.variable_event_stream().len();
        let origin = CodeOrigin::new(BytecodeIndex(0));

        group.bench_with_input(BenchmarkId::new("stream_replay", events), &end, |b, &end| {
            b.iter(|| black_box(code.reconstruct(&dfg, origin, black_box(end))))
        });
    }
    group.finish();
}

fn bench_link(c: &mut Criterion) {
    let vm = Vm::new(TierConfig::default());
    let global = GlobalObject::new(CellRef::new(0x1000));
    let baseline = CodeBlock::new_baseline(&vm, Arc::clone(&global), 2, 4);

    let mut group = c.benchmark_group("link");
    for records in [8usize, 64, 512] {
        let code = unit_with_records(records);
        let dfg = CodeBlock::new_optimized(&vm, JitType::Dfg, &baseline, None, 8);

        group.bench_with_input(BenchmarkId::new("try_initialize", records), &records, |b, _| {
            b.iter(|| {
                let mut data = JitData::new(&code, vm.config(), Arc::clone(vm.osr_exit_thunk()));
                black_box(data.try_initialize(&dfg, &code)).expect("sets are valid");
                data
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reconstruct, bench_link);
criterion_main!(benches);
