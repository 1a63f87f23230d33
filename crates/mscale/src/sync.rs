//! Cross-pipe barrier emission.
//!
//! Both barriers are built from GPU-side counters in the [`SemaphorePool`](crate::SemaphorePool)
//! slot of the frame being recorded. All commands go into the calling pipe's secondary buffer.
//!
//! A barrier sequence is never emitted partially: the whole sequence is sized up front and the
//! call fails with `NoSpace` before anything is written if it does not fit.

use mscale_hw::cmd::sizes;
use mscale_hw::{CmdBuffer, CmdEmitter, GpuResource, OsError};
use tracing::trace;

use crate::error::{Result, ScalabilityError};
use crate::semaphore::BufferSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncKind {
    /// Every pipe waits until every other pipe has reached the same point.
    AllPipes,
    /// A leader pipe waits until every pipe has finished the current pass; the others continue.
    OnePipeWaitOthers,
}

/// Bytes needed for a full-pipe rendezvous on a set with `pipe_count` counters.
pub const fn sync_all_pipes_size(pipe_count: u32) -> u32 {
    pipe_count * sizes::ATOMIC_INCREMENT + sizes::SEMAPHORE_WAIT + sizes::STORE_DATA_IMMEDIATE
}

/// Bytes needed by the leader of a one-pipe-waits-others barrier. Non-leaders only need
/// [`sizes::FLUSH_WITH_POST_SYNC`].
pub const fn sync_one_pipe_leader_size(pipe_count: u32) -> u32 {
    sizes::FLUSH_WITH_POST_SYNC
        + pipe_count * (sizes::SEMAPHORE_WAIT + sizes::STORE_DATA_IMMEDIATE)
}

fn reserve(buf: &CmdBuffer, required: u32) -> Result<()> {
    if buf.remaining_bytes() < required {
        return Err(OsError::NoSpace {
            engine_index: buf.engine_index(),
            requested: required,
            available: buf.remaining_bytes(),
        }
        .into());
    }
    Ok(())
}

fn own_counter(set: &BufferSet, pipe: usize, what: &'static str) -> Result<GpuResource> {
    set.get(pipe).ok_or(ScalabilityError::NullArgument(what))
}

/// Emit a rendezvous of all pipes into `buf`, which belongs to `current_pipe`.
///
/// Increments every pipe's counter by one, waits until the own counter has been incremented by
/// all `pipe_count` pipes, then clears it for the next use of this slot. Returns the number of
/// commands written.
pub fn sync_all_pipes<E: CmdEmitter + ?Sized>(
    emitter: &E,
    set: &BufferSet,
    current_pipe: usize,
    pipe_count: u8,
    buf: &mut CmdBuffer,
) -> Result<usize> {
    let own = own_counter(set, current_pipe, "all-pipes semaphore")?;
    let counters = set.allocated().map(|(_, res)| res).collect::<Vec<_>>();
    if counters.len() != pipe_count as usize {
        return Err(ScalabilityError::InvalidParameter(format!(
            "semaphore set holds {} counters for {pipe_count} pipes",
            counters.len()
        )));
    }

    reserve(buf, sync_all_pipes_size(counters.len() as u32))?;

    for res in &counters {
        emitter.atomic_increment(res, buf)?;
    }
    emitter.semaphore_wait_equal(&own, u32::from(pipe_count), buf)?;
    emitter.store_data_immediate(&own, 0, buf)?;

    trace!(current_pipe, pipe_count, "emitted all-pipes sync");
    Ok(counters.len() + 2)
}

/// Emit a barrier where `leader` waits for every pipe to finish pass `current_pass`.
///
/// Every pipe publishes `current_pass + 1` to its own counter once its prior work has completed.
/// The leader additionally waits for all counters to hold that value and clears them. Returns the
/// number of commands written.
pub fn sync_one_pipe_wait_others<E: CmdEmitter + ?Sized>(
    emitter: &E,
    set: &BufferSet,
    current_pipe: usize,
    current_pass: u8,
    leader: usize,
    buf: &mut CmdBuffer,
) -> Result<usize> {
    let own = own_counter(set, current_pipe, "one-pipe-wait semaphore")?;
    let pass_value = u32::from(current_pass) + 1;

    if current_pipe != leader {
        reserve(buf, sizes::FLUSH_WITH_POST_SYNC)?;
        emitter.flush_with_post_sync(&own, pass_value, buf)?;
        trace!(current_pipe, leader, current_pass, "emitted pass completion");
        return Ok(1);
    }

    let counters = set.allocated().map(|(_, res)| res).collect::<Vec<_>>();
    reserve(buf, sync_one_pipe_leader_size(counters.len() as u32))?;

    emitter.flush_with_post_sync(&own, pass_value, buf)?;
    for res in &counters {
        emitter.semaphore_wait_equal(res, pass_value, buf)?;
    }
    for res in &counters {
        emitter.store_data_immediate(res, 0, buf)?;
    }

    trace!(current_pipe, current_pass, "emitted leader wait");
    Ok(1 + counters.len() * 2)
}
