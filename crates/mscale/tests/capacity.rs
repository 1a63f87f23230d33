use mscale::sync::sync_all_pipes_size;
use mscale::{
    ScalabilityError, ScalabilityMultiPipe, ScalabilityParams, StateParams, Status, SubmitOutcome,
    SyncKind, MAX_RESIZE_ATTEMPTS,
};
use mscale_hw::cmd::sizes;
use mscale_hw::{CmdBuffer, CmdListEmitter, HwCmd, OsError, RecordingOs, RecordingOsConfig};
use pretty_assertions::assert_eq;

fn small_os(initial: u32, max: u32) -> RecordingOs {
    RecordingOs::new(RecordingOsConfig {
        initial_cmd_buffer_bytes: initial,
        max_cmd_buffer_bytes: max,
        ..Default::default()
    })
}

#[test]
fn verify_cmd_buffer_grows_the_held_buffer() {
    let mut os = small_os(64, 1024 * 1024);
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(2)).unwrap();
    mp.update_state(StateParams::pipe(1)).unwrap();

    let mut buf = mp.get_cmd_buffer(false).unwrap();
    mp.verify_cmd_buffer(&mut buf, 512, 16).unwrap();
    assert_eq!(mp.os().resize_calls(), 1);
    assert!(buf.capacity_bytes() >= 512);
    assert_eq!(
        mp.os().engine_buffer(2).unwrap().capacity_bytes(),
        buf.capacity_bytes()
    );
    assert_eq!(mp.os().engine_buffer(1).unwrap().capacity_bytes(), 64);

    // Already large enough: no further resize.
    mp.verify_cmd_buffer(&mut buf, 512, 16).unwrap();
    assert_eq!(mp.os().resize_calls(), 1);
    assert_eq!(mp.stats().snapshot().resize_attempts, 1);

    mp.return_cmd_buffer(buf).unwrap();
    mp.destroy().unwrap();
}

#[test]
fn verify_cmd_buffer_measures_what_the_pipe_already_recorded() {
    let mut os = small_os(256, 4096);
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(1)).unwrap();
    mp.update_state(StateParams::pipe(0)).unwrap();

    let mut buf = mp.get_cmd_buffer(false).unwrap();
    buf.push(HwCmd::Workload { tag: 1, size_bytes: 240 }).unwrap();
    // The OS still has the empty buffer handed out above.
    assert_eq!(mp.os().engine_buffer(1).unwrap().used_bytes(), 0);

    mp.verify_cmd_buffer(&mut buf, 64, 0).unwrap();
    assert_eq!(mp.os().resize_calls(), 1);
    assert!(buf.remaining_bytes() >= 64);
    buf.push(HwCmd::Workload { tag: 2, size_bytes: 64 }).unwrap();

    mp.return_cmd_buffer(buf).unwrap();
    assert_eq!(
        mp.submit_cmd_buffer().unwrap(),
        SubmitOutcome::Submitted { semaphore_index: 0 }
    );
    let sub = mp.os().last_submission().unwrap();
    assert_eq!(
        sub.secondaries[0].cmds(),
        &[
            HwCmd::Workload { tag: 1, size_bytes: 240 },
            HwCmd::Workload { tag: 2, size_bytes: 64 },
            HwCmd::BatchBufferEnd
        ]
    );
    mp.destroy().unwrap();
}

#[test]
fn barrier_fits_after_verify_on_the_held_buffer() {
    let mut os = small_os(64, 1024 * 1024);
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(4)).unwrap();
    mp.update_state(StateParams::pipe(0)).unwrap();

    let mut buf = mp.get_cmd_buffer(false).unwrap();
    let err = mp.sync_pipe(SyncKind::AllPipes, 0, &mut buf).unwrap_err();
    assert_eq!(err.status(), Status::NoSpace);
    assert!(buf.is_empty());

    let needed = sync_all_pipes_size(4);
    mp.verify_cmd_buffer(&mut buf, needed, 16).unwrap();
    assert!(buf.remaining_bytes() >= needed);

    mp.sync_pipe(SyncKind::AllPipes, 0, &mut buf).unwrap();
    assert_eq!(buf.cmds().len(), 4 + 2);
    assert_eq!(mp.stats().snapshot().sync_all_pipes, 1);

    mp.return_cmd_buffer(buf).unwrap();
    mp.destroy().unwrap();
}

#[test]
fn verify_cmd_buffer_rejects_another_pipes_buffer() {
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(2)).unwrap();
    mp.update_state(StateParams::pipe(0)).unwrap();

    let mut other = CmdBuffer::new(2, 64);
    let err = mp.verify_cmd_buffer(&mut other, 1024, 0).unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter);
    assert_eq!(mp.os().resize_calls(), 0);
    assert_eq!(other.capacity_bytes(), 64);
    mp.destroy().unwrap();
}

#[test]
fn verify_cmd_buffer_gives_up_after_bounded_resizes() {
    let mut os = small_os(64, 128);
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(1)).unwrap();
    mp.update_state(StateParams::pipe(0)).unwrap();

    let mut buf = mp.get_cmd_buffer(false).unwrap();
    let err = mp.verify_cmd_buffer(&mut buf, 4096, 0).unwrap_err();
    assert_eq!(err.status(), Status::NoSpace);
    assert!(matches!(
        err,
        ScalabilityError::Capacity {
            attempts: MAX_RESIZE_ATTEMPTS,
            requested_bytes: 4096,
            ..
        }
    ));
    assert_eq!(mp.os().resize_calls(), MAX_RESIZE_ATTEMPTS as usize);
    assert_eq!(buf.capacity_bytes(), 128);

    let stats = mp.stats().snapshot();
    assert_eq!(stats.resize_attempts, u64::from(MAX_RESIZE_ATTEMPTS));
    assert_eq!(stats.capacity_failures, 1);
    mp.return_cmd_buffer(buf).unwrap();
    mp.destroy().unwrap();
}

#[test]
fn oversized_patch_list_request_reports_no_space() {
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(1)).unwrap();
    mp.update_state(StateParams::pipe(0)).unwrap();

    let mut buf = mp.get_cmd_buffer(false).unwrap();
    let max_patch = mp.os().config().max_patch_list_size;
    let err = mp.verify_cmd_buffer(&mut buf, 16, max_patch + 1).unwrap_err();
    assert_eq!(err.status(), Status::NoSpace);
    assert_eq!(mp.os().patch_list_size(), max_patch);
    mp.return_cmd_buffer(buf).unwrap();
    mp.destroy().unwrap();
}

#[test]
fn verify_space_available_covers_every_secondary() {
    let mut os = small_os(64, 128);
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(3)).unwrap();

    mp.verify_space_available(32, 8).unwrap();
    assert_eq!(mp.os().resize_calls(), 0);

    let err = mp.verify_space_available(4096, 8).unwrap_err();
    assert_eq!(err.status(), Status::NoSpace);
    // Each attempt resizes all three secondaries.
    assert_eq!(mp.os().resize_calls(), 3 * MAX_RESIZE_ATTEMPTS as usize);
    for engine in 1..=3 {
        assert_eq!(mp.os().engine_buffer(engine).unwrap().capacity_bytes(), 128);
    }
    mp.destroy().unwrap();
}

#[test]
fn barrier_that_does_not_fit_is_not_written() {
    let mut os = RecordingOs::default();
    let emitter = CmdListEmitter;
    let mut mp = ScalabilityMultiPipe::new(&mut os, &emitter);
    mp.initialize(&ScalabilityParams::with_pipes(4)).unwrap();
    mp.update_state(StateParams::pipe(0)).unwrap();

    let buf = mp.get_cmd_buffer(false).unwrap();
    // Room for every increment but not the wait and reset.
    let mut tight = CmdBuffer::new(buf.engine_index(), 4 * sizes::ATOMIC_INCREMENT);

    let err = mp.sync_pipe(SyncKind::AllPipes, 0, &mut tight).unwrap_err();
    assert!(matches!(err, ScalabilityError::Os(OsError::NoSpace { .. })));
    assert_eq!(err.status(), Status::NoSpace);
    assert!(tight.is_empty());
    assert_eq!(mp.stats().snapshot().sync_all_pipes, 0);

    mp.return_cmd_buffer(buf).unwrap();
    mp.destroy().unwrap();
}
