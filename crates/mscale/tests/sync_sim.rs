//! Barriers emitted by the orchestrator, executed on the multi-pipe simulator.

use mscale::{ScalabilityMultiPipe, ScalabilityParams, StateParams, SubmitOutcome, SyncKind};
use mscale_hw::{CmdBuffer, CmdListEmitter, HwCmd, RecordingOs};
use mscale_sim::{CounterMemory, Explorer, PipeProgram, RoundRobin, ThreadedRunner};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const BEFORE: u32 = 10;
const AFTER: u32 = 20;

type MultiPipe<'a> = ScalabilityMultiPipe<'a, RecordingOs, CmdListEmitter>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn workload(tag: u32) -> HwCmd {
    HwCmd::Workload { tag, size_bytes: 32 }
}

/// Record one frame in which every pipe runs `BEFORE`, the barrier, then `AFTER`.
fn record_barrier_frame(mp: &mut MultiPipe<'_>, pipes: u8, kind: SyncKind, leader: u32) {
    for pipe in 0..pipes {
        mp.update_state(StateParams::pipe(pipe)).unwrap();
        let mut buf: CmdBuffer = mp.get_cmd_buffer(false).unwrap();
        buf.push(workload(BEFORE)).unwrap();
        mp.sync_pipe(kind, leader, &mut buf).unwrap();
        buf.push(workload(AFTER)).unwrap();
        mp.return_cmd_buffer(buf).unwrap();
    }
    assert!(matches!(
        mp.submit_cmd_buffer().unwrap(),
        SubmitOutcome::Submitted { .. }
    ));
}

fn last_programs(mp: &MultiPipe<'_>) -> Vec<PipeProgram> {
    let submission = mp.os().last_submission().unwrap();
    PipeProgram::from_submission(submission).unwrap()
}

fn pc_of(program: &PipeProgram, pred: impl Fn(&HwCmd) -> bool) -> usize {
    program.position(pred).unwrap()
}

#[test]
fn all_pipes_barrier_holds_in_every_interleaving_across_ring_wrap() {
    init_tracing();
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams {
        ring_size: 2,
        ..ScalabilityParams::with_pipes(2)
    })
    .unwrap();

    // Three frames on a ring of two: slot 0 is reused by the third frame.
    for frame in 0..3 {
        assert_eq!(mp.semaphore_index(), frame % 2);
        record_barrier_frame(&mut mp, 2, SyncKind::AllPipes, 0);

        let programs = last_programs(&mp);
        assert_eq!(programs.len(), 2);
        let memory = CounterMemory::from_os(mp.os(), &programs).unwrap();
        let after_pcs = programs
            .iter()
            .map(|p| pc_of(p, |cmd| *cmd == workload(AFTER)))
            .collect::<Vec<_>>();
        let before_pcs = programs
            .iter()
            .map(|p| pc_of(p, |cmd| *cmd == workload(BEFORE)))
            .collect::<Vec<_>>();

        let report = Explorer::default()
            .explore_with(&programs, memory, |state| {
                for (idx, &after_pc) in after_pcs.iter().enumerate() {
                    if !state.has_passed(idx, after_pc) {
                        continue;
                    }
                    for (other, &before_pc) in before_pcs.iter().enumerate() {
                        if !state.has_passed(other, before_pc) {
                            return Err(format!(
                                "pipe {idx} finished the barrier before pipe {other} reached it"
                            ));
                        }
                    }
                }
                Ok(())
            })
            .unwrap();

        // Every counter is back at zero, so the slot is reusable.
        assert_eq!(report.final_memories.len(), 1);
        assert!(report
            .final_memories
            .iter()
            .all(|mem| mem.iter().all(|&(_, value)| value == 0)));
    }

    mp.destroy().unwrap();
}

#[test]
fn one_pipe_wait_others_holds_the_leader_only() {
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(3)).unwrap();

    let leader = 1;
    record_barrier_frame(&mut mp, 3, SyncKind::OnePipeWaitOthers, leader as u32);
    let programs = last_programs(&mp);
    let memory = CounterMemory::from_os(mp.os(), &programs).unwrap();

    let flush_pcs = programs
        .iter()
        .map(|p| pc_of(p, |cmd| matches!(cmd, HwCmd::FlushWithPostSync { value: 1, .. })))
        .collect::<Vec<_>>();
    let leader_after = pc_of(&programs[leader], |cmd| *cmd == workload(AFTER));

    // Followers never wait.
    for (idx, program) in programs.iter().enumerate() {
        let waits = program
            .cmds()
            .iter()
            .filter(|cmd| matches!(cmd, HwCmd::SemaphoreWaitEqual { .. }))
            .count();
        assert_eq!(waits, if idx == leader { 3 } else { 0 }, "pipe {idx}");
    }

    let report = Explorer::default()
        .explore_with(&programs, memory, |state| {
            if state.has_passed(leader, leader_after) {
                for (idx, &flush_pc) in flush_pcs.iter().enumerate() {
                    if !state.has_passed(idx, flush_pc) {
                        return Err(format!("leader ran ahead of pipe {idx}"));
                    }
                }
            }
            Ok(())
        })
        .unwrap();
    assert!(report
        .final_memories
        .iter()
        .all(|mem| mem.iter().all(|&(_, value)| value == 0)));

    mp.destroy().unwrap();
}

#[test]
fn second_pass_waits_for_the_next_pass_value() {
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(2)).unwrap();

    for pass in 0..2u8 {
        for pipe in 0..2u8 {
            mp.update_state(StateParams::pipe_pass(pipe, pass, 2)).unwrap();
            let mut buf = mp.get_cmd_buffer(false).unwrap();
            if pass == 1 {
                mp.sync_pipe(SyncKind::OnePipeWaitOthers, 0, &mut buf).unwrap();
            }
            mp.return_cmd_buffer(buf).unwrap();
        }
        let outcome = mp.submit_cmd_buffer().unwrap();
        if pass == 0 {
            assert_eq!(outcome, SubmitOutcome::Deferred);
        }
    }

    let programs = last_programs(&mp);
    assert!(programs[0]
        .cmds()
        .iter()
        .any(|cmd| matches!(cmd, HwCmd::SemaphoreWaitEqual { value: 2, .. })));
    let mut memory = CounterMemory::from_os(mp.os(), &programs).unwrap();
    RoundRobin::default().run(&programs, &mut memory).unwrap();
    assert!(memory.all_zero());

    mp.destroy().unwrap();
}

#[test]
fn threaded_execution_of_an_all_pipes_frame() {
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(4)).unwrap();

    record_barrier_frame(&mut mp, 4, SyncKind::AllPipes, 0);
    let programs = last_programs(&mp);
    let memory = CounterMemory::from_os(mp.os(), &programs).unwrap();

    let report = ThreadedRunner::default().run(&programs, &memory).unwrap();
    assert!(report.seqs(BEFORE).iter().max() < report.seqs(AFTER).iter().min());
    assert!(report.memory.all_zero());

    mp.destroy().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x6d_73_63),
        .. ProptestConfig::default()
    })]

    #[test]
    fn all_pipes_barrier_completes_under_any_quantum(pipes in 1u8..=8, quantum in 1usize..=6) {
        let mut os = RecordingOs::default();
        let emitter = CmdListEmitter;
        let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
        mp.initialize(&ScalabilityParams::with_pipes(pipes)).unwrap();

        record_barrier_frame(&mut mp, pipes, SyncKind::AllPipes, 0);
        let programs = last_programs(&mp);
        prop_assert_eq!(programs.len(), pipes as usize);

        let mut memory = CounterMemory::from_os(mp.os(), &programs).unwrap();
        let trace = RoundRobin::new(quantum).run(&programs, &mut memory).unwrap();
        let last_before = trace.workload_positions(BEFORE).into_iter().max();
        let first_after = trace.workload_positions(AFTER).into_iter().min();
        prop_assert!(last_before < first_after);
        prop_assert!(memory.all_zero());

        mp.destroy().unwrap();
    }
}
