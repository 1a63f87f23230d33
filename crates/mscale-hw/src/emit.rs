use crate::cmd::{CmdBuffer, HwCmd};
use crate::os::OsResult;
use crate::resource::GpuResource;

/// Hardware command-emission layer.
///
/// Every method appends exactly one command to `buf` or fails with
/// [`crate::OsError::NoSpace`] leaving `buf` untouched.
pub trait CmdEmitter {
    fn atomic_increment(&self, resource: &GpuResource, buf: &mut CmdBuffer) -> OsResult<()>;

    fn semaphore_wait_equal(
        &self,
        resource: &GpuResource,
        value: u32,
        buf: &mut CmdBuffer,
    ) -> OsResult<()>;

    fn store_data_immediate(
        &self,
        resource: &GpuResource,
        value: u32,
        buf: &mut CmdBuffer,
    ) -> OsResult<()>;

    fn flush_with_post_sync(
        &self,
        resource: &GpuResource,
        value: u32,
        buf: &mut CmdBuffer,
    ) -> OsResult<()>;

    fn batch_buffer_end(&self, buf: &mut CmdBuffer) -> OsResult<()>;

    fn noop(&self, buf: &mut CmdBuffer) -> OsResult<()>;
}

/// Emitter that appends typed [`HwCmd`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct CmdListEmitter;

impl CmdListEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl CmdEmitter for CmdListEmitter {
    fn atomic_increment(&self, resource: &GpuResource, buf: &mut CmdBuffer) -> OsResult<()> {
        buf.push(HwCmd::AtomicIncrement {
            resource: *resource,
        })
    }

    fn semaphore_wait_equal(
        &self,
        resource: &GpuResource,
        value: u32,
        buf: &mut CmdBuffer,
    ) -> OsResult<()> {
        buf.push(HwCmd::SemaphoreWaitEqual {
            resource: *resource,
            value,
        })
    }

    fn store_data_immediate(
        &self,
        resource: &GpuResource,
        value: u32,
        buf: &mut CmdBuffer,
    ) -> OsResult<()> {
        buf.push(HwCmd::StoreDataImmediate {
            resource: *resource,
            value,
        })
    }

    fn flush_with_post_sync(
        &self,
        resource: &GpuResource,
        value: u32,
        buf: &mut CmdBuffer,
    ) -> OsResult<()> {
        buf.push(HwCmd::FlushWithPostSync {
            resource: *resource,
            value,
        })
    }

    fn batch_buffer_end(&self, buf: &mut CmdBuffer) -> OsResult<()> {
        buf.push(HwCmd::BatchBufferEnd)
    }

    fn noop(&self, buf: &mut CmdBuffer) -> OsResult<()> {
        buf.push(HwCmd::Noop)
    }
}
