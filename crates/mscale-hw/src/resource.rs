use bitflags::bitflags;

/// Handle to a GPU-visible linear allocation owned by an [`crate::OsInterface`].
///
/// Handles are plain values: copying one does not duplicate the allocation, and freeing is
/// explicit via [`crate::OsInterface::free_resource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuResource {
    id: u32,
    size_bytes: u32,
}

impl GpuResource {
    pub const fn new(id: u32, size_bytes: u32) -> Self {
        Self { id, size_bytes }
    }

    pub const fn id(self) -> u32 {
        self.id
    }

    pub const fn size_bytes(self) -> u32 {
        self.size_bytes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Written by the CPU once, then only touched by GPU commands.
    WriteOnly,
    ReadWrite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocParams {
    pub size_bytes: u32,
    pub usage: ResourceUsage,
    pub name: &'static str,
}

impl AllocParams {
    /// Parameters for one 32-bit hardware semaphore counter.
    pub const fn semaphore(name: &'static str) -> Self {
        Self {
            size_bytes: 4,
            usage: ResourceUsage::WriteOnly,
            name,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LockFlags: u32 {
        const READ_ONLY = 1 << 0;
        const WRITE_ONLY = 1 << 1;
    }
}
