use thiserror::Error;

use crate::cmd::CmdBuffer;
use crate::resource::{AllocParams, GpuResource, LockFlags};

pub type OsResult<T> = std::result::Result<T, OsError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OsError {
    #[error("no space in command buffer for engine {engine_index}: requested={requested} available={available}")]
    NoSpace {
        engine_index: u32,
        requested: u32,
        available: u32,
    },

    #[error("patch list too small: requested={requested} capacity={capacity}")]
    PatchListNoSpace { requested: u32, capacity: u32 },

    #[error("allocation of `{name}` ({size_bytes} bytes) failed")]
    AllocationFailed { name: &'static str, size_bytes: u32 },

    #[error("unknown resource id {0}")]
    UnknownResource(u32),

    #[error("resource id {0} is already locked")]
    AlreadyLocked(u32),

    #[error("resource id {0} is not locked")]
    NotLocked(u32),

    #[error("engine index {engine_index} out of range (engine_count={engine_count})")]
    EngineIndexOutOfRange { engine_index: u32, engine_count: u32 },

    #[error("submission rejected: {0}")]
    Rejected(&'static str),
}

impl OsError {
    /// Whether this error reports exhausted command-buffer or patch-list space.
    pub fn is_no_space(&self) -> bool {
        matches!(
            self,
            OsError::NoSpace { .. } | OsError::PatchListNoSpace { .. }
        )
    }
}

/// OS/resource layer seen by the scalability core.
///
/// One implementation corresponds to one OS stream (GPU context). Engine index 0 is the primary
/// command buffer; engine indices `1..` are the per-pipe secondary buffers chained from it at
/// submission time.
///
/// Command buffers are handed out by value: [`OsInterface::get_command_buffer`] returns the
/// current contents of an engine's buffer and [`OsInterface::return_command_buffer`] writes an
/// extended copy back. Work that is never returned is never submitted.
pub trait OsInterface {
    fn allocate_resource(&mut self, params: &AllocParams) -> OsResult<GpuResource>;

    fn lock_resource(&mut self, resource: &GpuResource, flags: LockFlags) -> OsResult<&mut [u8]>;

    fn unlock_resource(&mut self, resource: &GpuResource) -> OsResult<()>;

    fn free_resource(&mut self, resource: GpuResource) -> OsResult<()>;

    fn get_command_buffer(&mut self, engine_index: u32) -> OsResult<CmdBuffer>;

    fn return_command_buffer(&mut self, buffer: &CmdBuffer) -> OsResult<()>;

    /// Submit `primary` together with every secondary buffer returned since the last submission.
    fn submit_command_buffer(&mut self, primary: &CmdBuffer) -> OsResult<()>;

    /// Check that `engine_index`'s buffer has at least `requested_bytes` left.
    fn verify_command_buffer_size(&self, requested_bytes: u32, engine_index: u32) -> OsResult<()>;

    /// Grow `engine_index`'s buffer so `requested_bytes` fit after its current contents, and the
    /// patch list to `requested_patch_list_size`. Returns the buffer's capacity afterwards, which
    /// may fall short of the request.
    fn resize_command_buffer_and_patch_list(
        &mut self,
        requested_bytes: u32,
        requested_patch_list_size: u32,
        engine_index: u32,
    ) -> OsResult<u32>;

    fn verify_patch_list_size(&self, requested_patch_list_size: u32) -> OsResult<()>;
}
