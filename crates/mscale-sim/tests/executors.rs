use mscale_hw::{GpuResource, HwCmd};
use mscale_sim::{
    CounterMemory, EventKind, Explorer, PipeProgram, RoundRobin, SimError, ThreadedRunner,
};
use pretty_assertions::assert_eq;

const BEFORE: u32 = 1;
const AFTER: u32 = 2;

fn counters(n: u32) -> Vec<GpuResource> {
    (1..=n).map(|id| GpuResource::new(id, 4)).collect()
}

/// Workload, full rendezvous on `counters`, workload.
fn rendezvous_program(pipe: usize, counters: &[GpuResource]) -> PipeProgram {
    let own = counters[pipe];
    let mut cmds = vec![HwCmd::Workload {
        tag: BEFORE,
        size_bytes: 16,
    }];
    cmds.extend(
        counters
            .iter()
            .map(|&resource| HwCmd::AtomicIncrement { resource }),
    );
    cmds.push(HwCmd::SemaphoreWaitEqual {
        resource: own,
        value: counters.len() as u32,
    });
    cmds.push(HwCmd::StoreDataImmediate {
        resource: own,
        value: 0,
    });
    cmds.push(HwCmd::Workload {
        tag: AFTER,
        size_bytes: 16,
    });
    cmds.push(HwCmd::BatchBufferEnd);
    PipeProgram::new(pipe, cmds).unwrap()
}

#[test]
fn program_requires_batch_buffer_end() {
    assert_eq!(
        PipeProgram::new(3, vec![HwCmd::Noop]).unwrap_err(),
        SimError::MissingBatchBufferEnd { pipe: 3 }
    );
}

#[test]
fn round_robin_orders_work_across_the_barrier() {
    let res = counters(3);
    let programs = (0..3)
        .map(|pipe| rendezvous_program(pipe, &res))
        .collect::<Vec<_>>();
    let mut memory = CounterMemory::zeroed(&programs);

    let trace = RoundRobin::default().run(&programs, &mut memory).unwrap();

    let last_before = *trace.workload_positions(BEFORE).iter().max().unwrap();
    let first_after = *trace.workload_positions(AFTER).iter().min().unwrap();
    assert!(last_before < first_after);
    assert!(memory.all_zero());
    assert_eq!(
        trace
            .events
            .iter()
            .filter(|ev| ev.kind == EventKind::Finished)
            .count(),
        3
    );
}

#[test]
fn round_robin_reports_deadlock() {
    let res = counters(2);
    // Pipe 1 never increments, so pipe 0 can never see 2.
    let programs = vec![
        rendezvous_program(0, &res),
        PipeProgram::new(1, vec![HwCmd::BatchBufferEnd]).unwrap(),
    ];
    let mut memory = CounterMemory::zeroed(&programs);

    let err = RoundRobin::new(4).run(&programs, &mut memory).unwrap_err();
    let SimError::Deadlock { blocked } = err.clone() else {
        panic!("expected deadlock, got {err:?}");
    };
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].pipe, 0);
    assert_eq!(blocked[0].expected, 2);
    assert_eq!(blocked[0].actual, 1);
}

#[test]
fn explorer_checks_every_interleaving() {
    let res = counters(2);
    let programs = vec![rendezvous_program(0, &res), rendezvous_program(1, &res)];
    let after_pc = programs[0]
        .position(|cmd| matches!(cmd, HwCmd::Workload { tag: AFTER, .. }))
        .unwrap();

    let report = Explorer::default()
        .explore_with(&programs, CounterMemory::zeroed(&programs), |state| {
            // No pipe may start post-barrier work before every pipe finished pre-barrier work.
            for idx in 0..state.programs.len() {
                if state.has_passed(idx, after_pc) && state.pcs.iter().any(|&pc| pc == 0) {
                    return Err(format!("pipe {idx} ran ahead of the barrier"));
                }
            }
            Ok(())
        })
        .unwrap();

    assert!(report.states_visited > programs.iter().map(PipeProgram::len).sum::<usize>());
    assert_eq!(report.final_memories.len(), 1);
    assert!(report
        .final_memories
        .iter()
        .all(|mem| mem.iter().all(|&(_, v)| v == 0)));
}

#[test]
fn explorer_finds_a_deadlocking_interleaving() {
    let res = counters(1);
    // Pipe 1 may clear the counter before pipe 0 observes it.
    let programs = vec![
        PipeProgram::new(
            0,
            vec![
                HwCmd::SemaphoreWaitEqual {
                    resource: res[0],
                    value: 1,
                },
                HwCmd::BatchBufferEnd,
            ],
        )
        .unwrap(),
        PipeProgram::new(
            1,
            vec![
                HwCmd::StoreDataImmediate {
                    resource: res[0],
                    value: 1,
                },
                HwCmd::StoreDataImmediate {
                    resource: res[0],
                    value: 0,
                },
                HwCmd::BatchBufferEnd,
            ],
        )
        .unwrap(),
    ];

    let err = Explorer::default()
        .explore(&programs, CounterMemory::zeroed(&programs))
        .unwrap_err();
    assert!(matches!(err, SimError::Deadlock { .. }));
}

#[test]
fn explorer_respects_state_limit() {
    let res = counters(3);
    let programs = (0..3)
        .map(|pipe| rendezvous_program(pipe, &res))
        .collect::<Vec<_>>();
    let err = Explorer::with_state_limit(8)
        .explore(&programs, CounterMemory::zeroed(&programs))
        .unwrap_err();
    assert_eq!(err, SimError::StateLimit { limit: 8 });
}

#[test]
fn threaded_rendezvous_orders_work() {
    let res = counters(4);
    let programs = (0..4)
        .map(|pipe| rendezvous_program(pipe, &res))
        .collect::<Vec<_>>();
    let memory = CounterMemory::zeroed(&programs);

    let report = ThreadedRunner::default().run(&programs, &memory).unwrap();
    let before = report.seqs(BEFORE);
    let after = report.seqs(AFTER);
    assert_eq!((before.len(), after.len()), (4, 4));
    assert!(before.iter().max() < after.iter().min());
    assert!(report.memory.all_zero());
}
