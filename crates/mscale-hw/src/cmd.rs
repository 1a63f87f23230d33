//! Typed command-stream model.
//!
//! A [`CmdBuffer`] is an append-only list of [`HwCmd`]s with a byte capacity. Sizes follow the
//! dword counts of the MI commands they stand for, so capacity checks trip at the same points a
//! real encoder would.

use crate::hint::VirtualEngineHintParams;
use crate::os::OsError;
use crate::resource::GpuResource;

pub mod sizes {
    pub const ATOMIC_INCREMENT: u32 = 11 * 4;
    pub const SEMAPHORE_WAIT: u32 = 5 * 4;
    pub const STORE_DATA_IMMEDIATE: u32 = 4 * 4;
    pub const FLUSH_WITH_POST_SYNC: u32 = 5 * 4;
    pub const BATCH_BUFFER_END: u32 = 4;
    pub const NOOP: u32 = 4;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwCmd {
    /// Atomically add 1 to the 32-bit counter backing `resource`.
    AtomicIncrement { resource: GpuResource },
    /// Stall the executing engine until the counter equals `value`.
    SemaphoreWaitEqual { resource: GpuResource, value: u32 },
    StoreDataImmediate { resource: GpuResource, value: u32 },
    /// Pipeline flush whose post-sync operation writes `value` once prior work has completed.
    FlushWithPostSync { resource: GpuResource, value: u32 },
    BatchBufferEnd,
    Noop,
    /// Opaque caller workload (decode/VP state and object commands).
    Workload { tag: u32, size_bytes: u32 },
}

impl HwCmd {
    pub const fn size_bytes(&self) -> u32 {
        match self {
            HwCmd::AtomicIncrement { .. } => sizes::ATOMIC_INCREMENT,
            HwCmd::SemaphoreWaitEqual { .. } => sizes::SEMAPHORE_WAIT,
            HwCmd::StoreDataImmediate { .. } => sizes::STORE_DATA_IMMEDIATE,
            HwCmd::FlushWithPostSync { .. } => sizes::FLUSH_WITH_POST_SYNC,
            HwCmd::BatchBufferEnd => sizes::BATCH_BUFFER_END,
            HwCmd::Noop => sizes::NOOP,
            HwCmd::Workload { size_bytes, .. } => *size_bytes,
        }
    }

    /// The resource this command references, i.e. whether it consumes a patch-list entry.
    pub const fn resource(&self) -> Option<GpuResource> {
        match self {
            HwCmd::AtomicIncrement { resource }
            | HwCmd::SemaphoreWaitEqual { resource, .. }
            | HwCmd::StoreDataImmediate { resource, .. }
            | HwCmd::FlushWithPostSync { resource, .. } => Some(*resource),
            HwCmd::BatchBufferEnd | HwCmd::Noop | HwCmd::Workload { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTracking {
    pub tag: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CmdBufferAttributes {
    pub frame_tracking: Option<FrameTracking>,
    pub hint_params: Option<VirtualEngineHintParams>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CmdBuffer {
    engine_index: u32,
    capacity_bytes: u32,
    used_bytes: u32,
    patch_entries: u32,
    cmds: Vec<HwCmd>,
    pub attributes: CmdBufferAttributes,
}

impl CmdBuffer {
    pub fn new(engine_index: u32, capacity_bytes: u32) -> Self {
        Self {
            engine_index,
            capacity_bytes,
            used_bytes: 0,
            patch_entries: 0,
            cmds: Vec::new(),
            attributes: CmdBufferAttributes::default(),
        }
    }

    pub fn engine_index(&self) -> u32 {
        self.engine_index
    }

    pub fn capacity_bytes(&self) -> u32 {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> u32 {
        self.used_bytes
    }

    pub fn remaining_bytes(&self) -> u32 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    pub fn patch_entries(&self) -> u32 {
        self.patch_entries
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn cmds(&self) -> &[HwCmd] {
        &self.cmds
    }

    pub fn count(&self, pred: impl Fn(&HwCmd) -> bool) -> usize {
        self.cmds.iter().filter(|cmd| pred(cmd)).count()
    }

    /// Append `cmd`, failing without modification if it does not fit.
    pub fn push(&mut self, cmd: HwCmd) -> Result<(), OsError> {
        let size = cmd.size_bytes();
        if size > self.remaining_bytes() {
            return Err(OsError::NoSpace {
                engine_index: self.engine_index,
                requested: size,
                available: self.remaining_bytes(),
            });
        }
        self.used_bytes += size;
        if cmd.resource().is_some() {
            self.patch_entries += 1;
        }
        self.cmds.push(cmd);
        Ok(())
    }

    /// Grow the capacity to at least `capacity_bytes`. Buffers never shrink.
    pub fn grow_to(&mut self, capacity_bytes: u32) {
        self.capacity_bytes = self.capacity_bytes.max(capacity_bytes);
    }

    /// Drop all commands and attributes, keeping the capacity.
    pub fn reset(&mut self) {
        self.used_bytes = 0;
        self.patch_entries = 0;
        self.cmds.clear();
        self.attributes = CmdBufferAttributes::default();
    }
}
