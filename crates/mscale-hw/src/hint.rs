use bitflags::bitflags;

use crate::resource::GpuResource;

/// Upper bound on physical engine instances of one class (e.g. video decode boxes).
pub const MAX_ENGINE_INSTANCES_PER_CLASS: usize = 8;

bitflags! {
    /// Scheduling hints forwarded to the kernel-mode scheduler with a submission.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HintFlags: u32 {
        const USING_SFC = 1 << 0;
        const USING_FRAME_SPLIT = 1 << 1;
        const NEED_SYNC_WITH_PREVIOUS = 1 << 2;
        const NO_RERUN_ALLOWED = 1 << 3;
        const SAME_ENGINE_AS_LAST = 1 << 4;
        const HW_RESTRICTED_ENGINE = 1 << 5;
        const FRONT_END_BACK_END_PRESENT = 1 << 6;
    }
}

/// Virtual-engine hints attached to a primary command buffer before submission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualEngineHintParams {
    pub flags: HintFlags,
    pub scalable_mode: bool,
    pub pipe_count: u8,
    /// Per-pipe batch buffers, only meaningful with [`HintFlags::USING_FRAME_SPLIT`].
    pub batch_buffers: [Option<GpuResource>; MAX_ENGINE_INSTANCES_PER_CLASS],
    /// Debug-only explicit engine instance per pipe. `None` lets the scheduler choose.
    pub engine_instance_override: Option<[u8; MAX_ENGINE_INSTANCES_PER_CLASS]>,
}

impl VirtualEngineHintParams {
    pub fn batch_buffer(&self, pipe: usize) -> Option<GpuResource> {
        self.batch_buffers.get(pipe).copied().flatten()
    }
}
