//! In-memory [`OsInterface`] that records everything it is asked to do.
//!
//! The recorder keeps one command buffer per engine index, tracks resource lock state and keeps
//! every submission (primary plus the secondary buffers chained from it) for later inspection or
//! execution by the multi-pipe simulator.

use std::collections::BTreeMap;

use tracing::trace;

use crate::cmd::CmdBuffer;
use crate::os::{OsError, OsInterface, OsResult};
use crate::resource::{AllocParams, GpuResource, LockFlags};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingOsConfig {
    /// Engine indices `0..engine_count` are valid (0 = primary).
    pub engine_count: u32,
    pub initial_cmd_buffer_bytes: u32,
    /// Resizes never grow a command buffer beyond this.
    pub max_cmd_buffer_bytes: u32,
    pub initial_patch_list_size: u32,
    pub max_patch_list_size: u32,
    /// Fail every allocation once this many have succeeded.
    pub fail_allocations_after: Option<usize>,
}

impl Default for RecordingOsConfig {
    fn default() -> Self {
        Self {
            engine_count: 16,
            initial_cmd_buffer_bytes: 16 * 1024,
            max_cmd_buffer_bytes: 1024 * 1024,
            initial_patch_list_size: 256,
            max_patch_list_size: 4096,
            fail_allocations_after: None,
        }
    }
}

#[derive(Debug, Clone)]
struct ResourceRecord {
    params: AllocParams,
    data: Vec<u8>,
    locked: Option<LockFlags>,
}

/// One call to [`OsInterface::submit_command_buffer`].
///
/// `secondaries[i]` is the buffer of engine index `i + 1`; engines that were never written are
/// present as empty buffers so indices stay aligned with pipe numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub primary: CmdBuffer,
    pub secondaries: Vec<CmdBuffer>,
}

#[derive(Debug)]
pub struct RecordingOs {
    config: RecordingOsConfig,
    next_resource_id: u32,
    allocations: usize,
    resources: BTreeMap<u32, ResourceRecord>,
    freed: Vec<GpuResource>,
    engines: Vec<CmdBuffer>,
    patch_list_size: u32,
    resize_calls: usize,
    submissions: Vec<Submission>,
}

impl Default for RecordingOs {
    fn default() -> Self {
        Self::new(RecordingOsConfig::default())
    }
}

impl RecordingOs {
    pub fn new(config: RecordingOsConfig) -> Self {
        let engines = (0..config.engine_count)
            .map(|idx| CmdBuffer::new(idx, config.initial_cmd_buffer_bytes))
            .collect();
        Self {
            next_resource_id: 1,
            allocations: 0,
            resources: BTreeMap::new(),
            freed: Vec::new(),
            engines,
            patch_list_size: config.initial_patch_list_size,
            resize_calls: 0,
            submissions: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &RecordingOsConfig {
        &self.config
    }

    /// Number of resources allocated and not yet freed.
    pub fn live_resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn total_allocations(&self) -> usize {
        self.allocations
    }

    pub fn freed_resources(&self) -> &[GpuResource] {
        &self.freed
    }

    pub fn is_live(&self, resource: &GpuResource) -> bool {
        self.resources.contains_key(&resource.id())
    }

    pub fn is_locked(&self, resource: &GpuResource) -> bool {
        self.resources
            .get(&resource.id())
            .is_some_and(|r| r.locked.is_some())
    }

    /// Reads the first dword of a live resource (host-side inspection only).
    pub fn read_u32(&self, resource: &GpuResource) -> Option<u32> {
        let record = self.resources.get(&resource.id())?;
        let bytes: [u8; 4] = record.data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn resource_name(&self, resource: &GpuResource) -> Option<&'static str> {
        self.resources.get(&resource.id()).map(|r| r.params.name)
    }

    /// Overwrites the first dword of a live resource, bypassing lock state.
    pub fn poke_u32(&mut self, resource: &GpuResource, value: u32) -> OsResult<()> {
        let record = self
            .resources
            .get_mut(&resource.id())
            .ok_or(OsError::UnknownResource(resource.id()))?;
        if let Some(dst) = record.data.get_mut(..4) {
            dst.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    pub fn engine_buffer(&self, engine_index: u32) -> Option<&CmdBuffer> {
        self.engines.get(engine_index as usize)
    }

    pub fn patch_list_size(&self) -> u32 {
        self.patch_list_size
    }

    pub fn resize_calls(&self) -> usize {
        self.resize_calls
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn last_submission(&self) -> Option<&Submission> {
        self.submissions.last()
    }

    fn engine_mut(&mut self, engine_index: u32) -> OsResult<&mut CmdBuffer> {
        let engine_count = self.config.engine_count;
        self.engines
            .get_mut(engine_index as usize)
            .ok_or(OsError::EngineIndexOutOfRange {
                engine_index,
                engine_count,
            })
    }

    fn engine(&self, engine_index: u32) -> OsResult<&CmdBuffer> {
        self.engines
            .get(engine_index as usize)
            .ok_or(OsError::EngineIndexOutOfRange {
                engine_index,
                engine_count: self.config.engine_count,
            })
    }
}

impl OsInterface for RecordingOs {
    fn allocate_resource(&mut self, params: &AllocParams) -> OsResult<GpuResource> {
        if self
            .config
            .fail_allocations_after
            .is_some_and(|limit| self.allocations >= limit)
        {
            return Err(OsError::AllocationFailed {
                name: params.name,
                size_bytes: params.size_bytes,
            });
        }

        let id = self.next_resource_id;
        self.next_resource_id += 1;
        self.allocations += 1;

        // Fresh allocations hold garbage until the owner initializes them.
        let data = vec![0xCD; params.size_bytes as usize];
        self.resources.insert(
            id,
            ResourceRecord {
                params: params.clone(),
                data,
                locked: None,
            },
        );
        trace!(id, name = params.name, size = params.size_bytes, "allocated resource");
        Ok(GpuResource::new(id, params.size_bytes))
    }

    fn lock_resource(&mut self, resource: &GpuResource, flags: LockFlags) -> OsResult<&mut [u8]> {
        let record = self
            .resources
            .get_mut(&resource.id())
            .ok_or(OsError::UnknownResource(resource.id()))?;
        if record.locked.is_some() {
            return Err(OsError::AlreadyLocked(resource.id()));
        }
        record.locked = Some(flags);
        Ok(record.data.as_mut_slice())
    }

    fn unlock_resource(&mut self, resource: &GpuResource) -> OsResult<()> {
        let record = self
            .resources
            .get_mut(&resource.id())
            .ok_or(OsError::UnknownResource(resource.id()))?;
        if record.locked.take().is_none() {
            return Err(OsError::NotLocked(resource.id()));
        }
        Ok(())
    }

    fn free_resource(&mut self, resource: GpuResource) -> OsResult<()> {
        if self.resources.remove(&resource.id()).is_none() {
            return Err(OsError::UnknownResource(resource.id()));
        }
        self.freed.push(resource);
        Ok(())
    }

    fn get_command_buffer(&mut self, engine_index: u32) -> OsResult<CmdBuffer> {
        self.engine(engine_index).cloned()
    }

    fn return_command_buffer(&mut self, buffer: &CmdBuffer) -> OsResult<()> {
        let slot = self.engine_mut(buffer.engine_index())?;
        // A resize may have happened while the caller held its copy.
        let capacity = slot.capacity_bytes();
        *slot = buffer.clone();
        slot.grow_to(capacity);
        Ok(())
    }

    fn submit_command_buffer(&mut self, primary: &CmdBuffer) -> OsResult<()> {
        if primary.engine_index() != 0 {
            return Err(OsError::Rejected("primary buffer must use engine index 0"));
        }
        if primary.is_empty() {
            return Err(OsError::Rejected("primary buffer is empty"));
        }

        let last_used = self
            .engines
            .iter()
            .rposition(|buf| buf.engine_index() != 0 && !buf.is_empty())
            .unwrap_or(0);
        let secondaries = self
            .engines
            .get(1..=last_used)
            .unwrap_or_default()
            .iter()
            .cloned()
            .collect::<Vec<_>>();

        trace!(
            secondaries = secondaries.len(),
            primary_cmds = primary.cmds().len(),
            "recorded submission"
        );
        self.submissions.push(Submission {
            primary: primary.clone(),
            secondaries,
        });

        for buf in &mut self.engines {
            buf.reset();
        }
        Ok(())
    }

    fn verify_command_buffer_size(&self, requested_bytes: u32, engine_index: u32) -> OsResult<()> {
        let buf = self.engine(engine_index)?;
        if buf.remaining_bytes() < requested_bytes {
            return Err(OsError::NoSpace {
                engine_index,
                requested: requested_bytes,
                available: buf.remaining_bytes(),
            });
        }
        Ok(())
    }

    fn resize_command_buffer_and_patch_list(
        &mut self,
        requested_bytes: u32,
        requested_patch_list_size: u32,
        engine_index: u32,
    ) -> OsResult<u32> {
        self.resize_calls += 1;
        let max_bytes = self.config.max_cmd_buffer_bytes;
        let max_patch = self.config.max_patch_list_size;

        let buf = self.engine_mut(engine_index)?;
        let wanted = buf.used_bytes().saturating_add(requested_bytes);
        buf.grow_to(wanted.min(max_bytes));
        let capacity = buf.capacity_bytes();

        self.patch_list_size = self
            .patch_list_size
            .max(requested_patch_list_size.min(max_patch));
        Ok(capacity)
    }

    fn verify_patch_list_size(&self, requested_patch_list_size: u32) -> OsResult<()> {
        if requested_patch_list_size > self.patch_list_size {
            return Err(OsError::PatchListNoSpace {
                requested: requested_patch_list_size,
                capacity: self.patch_list_size,
            });
        }
        Ok(())
    }
}
