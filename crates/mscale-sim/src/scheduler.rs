//! Deterministic round-robin execution of a set of pipe programs.

use tracing::trace;

use crate::error::SimError;
use crate::program::{CounterMemory, PipeProgram};
use crate::step::{step, EventKind, SimEvent, Step};

/// Ordered record of everything the pipes did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimTrace {
    pub events: Vec<SimEvent>,
}

impl SimTrace {
    /// Global position of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&SimEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }

    /// Global positions of the `Workload` commands carrying `tag`.
    pub fn workload_positions(&self, tag: u32) -> Vec<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, ev)| {
                matches!(ev.kind, EventKind::Executed(mscale_hw::HwCmd::Workload { tag: t, .. }) if t == tag)
            })
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Runs each pipe for up to `quantum` commands per turn, in pipe order, until all programs finish.
///
/// A full round in which no pipe advances is a deadlock.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    quantum: usize,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self { quantum: 1 }
    }
}

impl RoundRobin {
    pub fn new(quantum: usize) -> Self {
        Self {
            quantum: quantum.max(1),
        }
    }

    pub fn run(
        &self,
        programs: &[PipeProgram],
        memory: &mut CounterMemory,
    ) -> Result<SimTrace, SimError> {
        let mut pcs = vec![0usize; programs.len()];
        let mut finished = vec![false; programs.len()];
        let mut trace = SimTrace::default();

        while finished.iter().any(|done| !done) {
            let mut progressed = false;
            let mut blocked = Vec::new();

            for (idx, program) in programs.iter().enumerate() {
                for _ in 0..self.quantum {
                    if finished[idx] {
                        break;
                    }
                    match step(program, pcs[idx], memory)? {
                        Step::Ran(kind) => {
                            trace.events.push(SimEvent {
                                pipe: program.pipe(),
                                pc: pcs[idx],
                                kind,
                            });
                            pcs[idx] += 1;
                            progressed = true;
                            if kind == EventKind::Finished {
                                finished[idx] = true;
                            }
                        }
                        Step::Blocked(b) => {
                            blocked.push(b);
                            break;
                        }
                        Step::Done => finished[idx] = true,
                    }
                }
            }

            if !progressed && finished.iter().any(|done| !done) {
                return Err(SimError::Deadlock { blocked });
            }
        }

        trace!(events = trace.events.len(), "round-robin run complete");
        Ok(trace)
    }
}
