//! Runs each pipe program on its own thread over shared atomic counters.

#[cfg(all(feature = "loom", test))]
use loom::sync::atomic::AtomicU32;
#[cfg(all(feature = "loom", test))]
use loom::sync::Arc;
#[cfg(all(feature = "loom", test))]
use loom::thread;
#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::AtomicU32;
#[cfg(not(all(feature = "loom", test)))]
use std::sync::Arc;
#[cfg(not(all(feature = "loom", test)))]
use std::thread;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use mscale_hw::HwCmd;

use crate::error::SimError;
use crate::program::{CounterMemory, PipeProgram};

/// Spins a waiting pipe gives up after.
pub const DEFAULT_MAX_SPINS: u64 = 50_000_000;

/// A `Workload` as observed by one pipe, stamped with a global sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadStamp {
    pub pipe: usize,
    pub tag: u32,
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedReport {
    pub memory: CounterMemory,
    /// Every executed workload, ordered by `seq`.
    pub workloads: Vec<WorkloadStamp>,
}

impl ThreadedReport {
    pub fn seqs(&self, tag: u32) -> Vec<u32> {
        self.workloads
            .iter()
            .filter(|w| w.tag == tag)
            .map(|w| w.seq)
            .collect()
    }
}

struct Shared {
    slots: BTreeMap<u32, usize>,
    counters: Vec<AtomicU32>,
    seq: AtomicU32,
}

impl Shared {
    fn counter(&self, resource_id: u32) -> Result<&AtomicU32, SimError> {
        self.slots
            .get(&resource_id)
            .and_then(|&idx| self.counters.get(idx))
            .ok_or(SimError::UnknownCounter(resource_id))
    }
}

#[derive(Debug, Clone)]
pub struct ThreadedRunner {
    max_spins: u64,
}

impl Default for ThreadedRunner {
    fn default() -> Self {
        Self {
            max_spins: DEFAULT_MAX_SPINS,
        }
    }
}

impl ThreadedRunner {
    pub fn with_max_spins(max_spins: u64) -> Self {
        Self { max_spins }
    }

    pub fn run(
        &self,
        programs: &[PipeProgram],
        memory: &CounterMemory,
    ) -> Result<ThreadedReport, SimError> {
        let mut slots = BTreeMap::new();
        let mut counters = Vec::new();
        for (idx, (id, value)) in memory.iter().enumerate() {
            slots.insert(id, idx);
            counters.push(AtomicU32::new(value));
        }
        let shared = Arc::new(Shared {
            slots,
            counters,
            seq: AtomicU32::new(0),
        });

        let handles = programs
            .iter()
            .map(|program| {
                let shared = Arc::clone(&shared);
                let program = program.clone();
                let max_spins = self.max_spins;
                let pipe = program.pipe();
                (pipe, thread::spawn(move || run_pipe(&shared, &program, max_spins)))
            })
            .collect::<Vec<_>>();

        let mut workloads = Vec::new();
        let mut first_err = None;
        for (pipe, handle) in handles {
            match handle.join() {
                Ok(Ok(stamps)) => workloads.extend(stamps),
                Ok(Err(err)) => {
                    first_err.get_or_insert(err);
                }
                Err(_) => {
                    first_err.get_or_insert(SimError::WorkerPanicked(pipe));
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }
        workloads.sort_by_key(|w| w.seq);

        let mut final_memory = memory.clone();
        for (id, _) in memory.iter() {
            let value = shared.counter(id)?.load(Ordering::Acquire);
            final_memory.set(id, value)?;
        }
        Ok(ThreadedReport {
            memory: final_memory,
            workloads,
        })
    }
}

fn run_pipe(
    shared: &Shared,
    program: &PipeProgram,
    max_spins: u64,
) -> Result<Vec<WorkloadStamp>, SimError> {
    let mut stamps = Vec::new();
    for cmd in program.cmds() {
        match *cmd {
            HwCmd::AtomicIncrement { resource } => {
                shared
                    .counter(resource.id())?
                    .fetch_add(1, Ordering::AcqRel);
            }
            HwCmd::SemaphoreWaitEqual { resource, value } => {
                let counter = shared.counter(resource.id())?;
                let mut spins = 0u64;
                while counter.load(Ordering::Acquire) != value {
                    spins += 1;
                    if spins >= max_spins {
                        return Err(SimError::WaitTimeout {
                            pipe: program.pipe(),
                            resource_id: resource.id(),
                            spins,
                        });
                    }
                    spin_yield();
                }
            }
            HwCmd::StoreDataImmediate { resource, value }
            | HwCmd::FlushWithPostSync { resource, value } => {
                shared
                    .counter(resource.id())?
                    .store(value, Ordering::Release);
            }
            HwCmd::Workload { tag, .. } => {
                let seq = shared.seq.fetch_add(1, Ordering::AcqRel);
                stamps.push(WorkloadStamp {
                    pipe: program.pipe(),
                    tag,
                    seq,
                });
            }
            HwCmd::Noop => {}
            HwCmd::BatchBufferEnd => break,
        }
    }
    Ok(stamps)
}

#[cfg(all(feature = "loom", test))]
#[inline]
fn spin_yield() {
    loom::thread::yield_now();
}

#[cfg(not(all(feature = "loom", test)))]
#[inline]
fn spin_yield() {
    std::thread::yield_now();
}
