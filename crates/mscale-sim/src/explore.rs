//! Exhaustive interleaving exploration.
//!
//! Every reachable combination of per-pipe program counters and counter memory is visited once.
//! Commands are treated as atomic, which matches how the engines execute MI commands.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::error::SimError;
use crate::program::{CounterMemory, PipeProgram};
use crate::step::{step, EventKind, Step};

/// Default bound on distinct states before exploration gives up.
pub const DEFAULT_STATE_LIMIT: usize = 1 << 20;

/// One reachable state, as seen by an invariant.
#[derive(Debug)]
pub struct ExploreState<'a> {
    pub programs: &'a [PipeProgram],
    /// Next command index per program; `program.len()` once finished.
    pub pcs: &'a [usize],
    pub memory: &'a CounterMemory,
}

impl ExploreState<'_> {
    /// Whether program `idx` has executed everything before `pc`.
    pub fn has_passed(&self, idx: usize, pc: usize) -> bool {
        self.pcs.get(idx).is_some_and(|&cur| cur > pc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExploreReport {
    pub states_visited: usize,
    /// Distinct counter memories observed once every program finished.
    pub final_memories: BTreeSet<Vec<(u32, u32)>>,
}

#[derive(Debug, Clone)]
pub struct Explorer {
    state_limit: usize,
}

impl Default for Explorer {
    fn default() -> Self {
        Self {
            state_limit: DEFAULT_STATE_LIMIT,
        }
    }
}

type StateKey = (Vec<usize>, CounterMemory);

impl Explorer {
    pub fn with_state_limit(state_limit: usize) -> Self {
        Self { state_limit }
    }

    pub fn explore(
        &self,
        programs: &[PipeProgram],
        memory: CounterMemory,
    ) -> Result<ExploreReport, SimError> {
        self.explore_with(programs, memory, |_| Ok(()))
    }

    /// Explore every interleaving, checking `invariant` in each reachable state.
    ///
    /// Fails on the first deadlock or invariant violation found.
    pub fn explore_with(
        &self,
        programs: &[PipeProgram],
        memory: CounterMemory,
        mut invariant: impl FnMut(&ExploreState<'_>) -> Result<(), String>,
    ) -> Result<ExploreReport, SimError> {
        let mut report = ExploreReport::default();
        let mut visited: HashSet<StateKey> = HashSet::new();
        let mut stack: Vec<StateKey> = vec![(vec![0; programs.len()], memory)];

        while let Some((pcs, memory)) = stack.pop() {
            if !visited.insert((pcs.clone(), memory.clone())) {
                continue;
            }
            if visited.len() > self.state_limit {
                return Err(SimError::StateLimit {
                    limit: self.state_limit,
                });
            }

            invariant(&ExploreState {
                programs,
                pcs: &pcs,
                memory: &memory,
            })
            .map_err(|message| SimError::InvariantViolated {
                pcs: pcs.clone(),
                message,
            })?;

            let mut any_runnable = false;
            let mut blocked = Vec::new();
            for (idx, program) in programs.iter().enumerate() {
                let mut next_memory = memory.clone();
                match step(program, pcs[idx], &mut next_memory)? {
                    Step::Ran(kind) => {
                        any_runnable = true;
                        let mut next_pcs = pcs.clone();
                        next_pcs[idx] = match kind {
                            EventKind::Finished => program.len(),
                            _ => pcs[idx] + 1,
                        };
                        stack.push((next_pcs, next_memory));
                    }
                    Step::Blocked(b) => blocked.push(b),
                    Step::Done => {}
                }
            }

            if !any_runnable {
                if !blocked.is_empty() {
                    return Err(SimError::Deadlock { blocked });
                }
                report.final_memories.insert(memory.iter().collect());
            }
        }

        report.states_visited = visited.len();
        debug!(
            states = report.states_visited,
            outcomes = report.final_memories.len(),
            "interleaving exploration complete"
        );
        Ok(report)
    }
}
