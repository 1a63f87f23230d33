//! GPU-resident semaphore counters used by the cross-pipe sync protocol.
//!
//! Two pools exist, one per barrier flavour. Each pool holds `ring_size` [`BufferSet`]s (one per
//! in-flight frame) and each set holds one 32-bit counter per pipe.

use mscale_hw::{AllocParams, GpuResource, LockFlags, OsInterface, MAX_ENGINE_INSTANCES_PER_CLASS};
use tracing::{debug, warn};

use crate::error::{Result, ScalabilityError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemaphoreKind {
    /// Rendezvous counters for [`crate::SyncKind::AllPipes`].
    AllPipes,
    /// Pass counters for [`crate::SyncKind::OnePipeWaitOthers`].
    OnePipeWait,
}

impl SemaphoreKind {
    fn resource_name(self) -> &'static str {
        match self {
            SemaphoreKind::AllPipes => "AllPipesSemaphore",
            SemaphoreKind::OnePipeWait => "OnePipeWaitSemaphore",
        }
    }
}

/// Per-frame group of counters, indexed by pipe. Entries beyond the configured pipe count stay
/// unallocated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferSet {
    slots: [Option<GpuResource>; MAX_ENGINE_INSTANCES_PER_CLASS],
}

impl BufferSet {
    pub fn get(&self, pipe: usize) -> Option<GpuResource> {
        self.slots.get(pipe).copied().flatten()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocated counters in pipe order.
    pub fn allocated(&self) -> impl Iterator<Item = (usize, GpuResource)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(pipe, slot)| slot.map(|res| (pipe, res)))
    }

    pub fn allocated_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

#[derive(Debug, Default)]
pub struct SemaphorePool {
    all_pipes: Vec<BufferSet>,
    one_pipe_wait: Vec<BufferSet>,
}

impl SemaphorePool {
    pub fn new(ring_size: usize) -> Self {
        Self {
            all_pipes: vec![BufferSet::default(); ring_size],
            one_pipe_wait: vec![BufferSet::default(); ring_size],
        }
    }

    pub fn ring_size(&self) -> usize {
        self.all_pipes.len()
    }

    /// Allocate and zero `pipe_count` counters in every set of both pools.
    ///
    /// On failure the counters allocated so far stay owned by the pool and are released by
    /// [`SemaphorePool::free`].
    pub fn allocate(&mut self, os: &mut dyn OsInterface, pipe_count: usize) -> Result<()> {
        if pipe_count > MAX_ENGINE_INSTANCES_PER_CLASS {
            return Err(ScalabilityError::Configuration(format!(
                "{pipe_count} pipes exceed the semaphore set capacity of {MAX_ENGINE_INSTANCES_PER_CLASS}"
            )));
        }

        for kind in [SemaphoreKind::AllPipes, SemaphoreKind::OnePipeWait] {
            let params = AllocParams::semaphore(kind.resource_name());
            for ring_index in 0..self.ring_size() {
                for pipe in 0..pipe_count {
                    let res = allocate_zeroed(os, &params)?;
                    self.sets_mut(kind)[ring_index].slots[pipe] = Some(res);
                }
            }
        }

        debug!(
            pipe_count,
            ring_size = self.ring_size(),
            "allocated semaphore pools"
        );
        Ok(())
    }

    pub fn set(&self, kind: SemaphoreKind, ring_index: usize) -> Option<&BufferSet> {
        self.sets(kind).get(ring_index)
    }

    /// Number of allocated counters in one pool.
    pub fn allocated_slots(&self, kind: SemaphoreKind) -> usize {
        self.sets(kind).iter().map(BufferSet::allocated_count).sum()
    }

    /// Release every allocated counter. Each counter is freed at most once; later calls are
    /// no-ops. All counters are attempted even if one fails; the first error is returned.
    pub fn free(&mut self, os: &mut dyn OsInterface) -> Result<()> {
        let mut first_err = None;
        for set in self.all_pipes.iter_mut().chain(self.one_pipe_wait.iter_mut()) {
            for slot in &mut set.slots {
                if let Some(res) = slot.take() {
                    if let Err(err) = os.free_resource(res) {
                        first_err.get_or_insert(ScalabilityError::Os(err));
                    }
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn sets(&self, kind: SemaphoreKind) -> &[BufferSet] {
        match kind {
            SemaphoreKind::AllPipes => &self.all_pipes,
            SemaphoreKind::OnePipeWait => &self.one_pipe_wait,
        }
    }

    fn sets_mut(&mut self, kind: SemaphoreKind) -> &mut [BufferSet] {
        match kind {
            SemaphoreKind::AllPipes => &mut self.all_pipes,
            SemaphoreKind::OnePipeWait => &mut self.one_pipe_wait,
        }
    }
}

/// Allocate one counter and clear it through a write-only lock cycle.
fn allocate_zeroed(os: &mut dyn OsInterface, params: &AllocParams) -> Result<GpuResource> {
    let res = os
        .allocate_resource(params)
        .map_err(|source| ScalabilityError::ResourceAllocation {
            what: params.name,
            source,
        })?;

    let zeroed = match os.lock_resource(&res, LockFlags::WRITE_ONLY) {
        Ok(data) => {
            data.fill(0);
            os.unlock_resource(&res)
        }
        Err(err) => Err(err),
    };
    // The pool never sees a handle that failed to clear, so release it here.
    if let Err(err) = zeroed {
        let id = res.id();
        if let Err(free_err) = os.free_resource(res) {
            warn!(id, error = %free_err, "failed to release counter after zeroing failed");
        }
        return Err(ScalabilityError::ResourceAllocation {
            what: params.name,
            source: err,
        });
    }
    Ok(res)
}
