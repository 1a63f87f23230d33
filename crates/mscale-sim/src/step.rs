use mscale_hw::HwCmd;

use crate::error::{BlockedPipe, SimError};
use crate::program::{CounterMemory, PipeProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A counter was written (increment, store or post-sync flush) or a non-memory command ran.
    Executed(HwCmd),
    /// A semaphore wait found its condition met and the pipe moved past it.
    WaitSatisfied { resource_id: u32, value: u32 },
    /// The pipe reached its batch-buffer end.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimEvent {
    pub pipe: usize,
    pub pc: usize,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Ran(EventKind),
    Blocked(BlockedPipe),
    Done,
}

/// Execute the command at `pc`, if it can run against `memory`.
pub(crate) fn step(
    program: &PipeProgram,
    pc: usize,
    memory: &mut CounterMemory,
) -> Result<Step, SimError> {
    let Some(cmd) = program.cmds().get(pc) else {
        return Ok(Step::Done);
    };

    let kind = match *cmd {
        HwCmd::AtomicIncrement { resource } => {
            let value = memory.get(resource.id())?;
            memory.set(resource.id(), value.wrapping_add(1))?;
            EventKind::Executed(*cmd)
        }
        HwCmd::SemaphoreWaitEqual { resource, value } => {
            let actual = memory.get(resource.id())?;
            if actual != value {
                return Ok(Step::Blocked(BlockedPipe {
                    pipe: program.pipe(),
                    pc,
                    resource_id: resource.id(),
                    expected: value,
                    actual,
                }));
            }
            EventKind::WaitSatisfied {
                resource_id: resource.id(),
                value,
            }
        }
        HwCmd::StoreDataImmediate { resource, value }
        | HwCmd::FlushWithPostSync { resource, value } => {
            memory.set(resource.id(), value)?;
            EventKind::Executed(*cmd)
        }
        HwCmd::BatchBufferEnd => EventKind::Finished,
        HwCmd::Noop | HwCmd::Workload { .. } => EventKind::Executed(*cmd),
    };
    Ok(Step::Ran(kind))
}
