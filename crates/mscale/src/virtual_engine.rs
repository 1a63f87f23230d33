//! Virtual engine: how one logical workload maps onto physical engine instances.
//!
//! The interface never submits anything. It carries the scheduling hints that get attached to the
//! primary command buffer, and it owns the bookkeeping of the secondary (per-pipe) buffers.
//!
//! The flavour is picked once in [`VirtualEngineInterface::initialize`]:
//! - [`VirtualEngineVariant::SinglePipe`]: no secondary buffers exist; every secondary-buffer
//!   operation is a no-op.
//! - [`VirtualEngineVariant::Scalable`]: secondary buffer `i` lives on engine index
//!   `i + SECONDARY_ENGINE_BASE` and moves through `Idle → Acquired → Returned → Done` each frame.

use mscale_hw::{
    CmdBuffer, GpuResource, HintFlags, OsInterface, VirtualEngineHintParams,
    MAX_ENGINE_INSTANCES_PER_CLASS,
};
use tracing::debug;

use crate::cmd_buffer_set::{CommandBufferSet, SecondaryBufState};
use crate::error::{Result, ScalabilityError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualEngineVariant {
    SinglePipe,
    Scalable,
}

/// Input to [`VirtualEngineInterface::set_hint_params`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualEngineSetParams {
    pub pipe_count: u8,
    pub scalable_mode: bool,
    pub have_front_end_cmds: bool,
    /// Extra scheduling hints. `FRONT_END_BACK_END_PRESENT` is derived from
    /// `have_front_end_cmds` and ignored here.
    pub flags: HintFlags,
    pub batch_buffers: [Option<GpuResource>; MAX_ENGINE_INSTANCES_PER_CLASS],
}

/// Per-frame hints the caller attaches before submitting a frame.
///
/// Merged into the hints written on the primary buffer: the session still decides the pipe
/// count, `USING_SFC` and `FRONT_END_BACK_END_PRESENT`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameHints {
    pub flags: HintFlags,
    /// Batch buffer of each pipe, for [`HintFlags::USING_FRAME_SPLIT`] submissions.
    pub batch_buffers: [Option<GpuResource>; MAX_ENGINE_INSTANCES_PER_CLASS],
}

#[derive(Debug)]
pub struct VirtualEngineInterface {
    variant: VirtualEngineVariant,
    pipe_count: u8,
    single_pipe_hint: VirtualEngineHintParams,
    scalable_hint: VirtualEngineHintParams,
}

impl VirtualEngineInterface {
    /// Fails with [`ScalabilityError::Configuration`] when scalability is requested with zero
    /// pipes or more pipes than one engine class has instances.
    pub fn initialize(pipe_count: u8, scalability_supported: bool) -> Result<Self> {
        if scalability_supported
            && (pipe_count == 0 || pipe_count as usize > MAX_ENGINE_INSTANCES_PER_CLASS)
        {
            return Err(ScalabilityError::Configuration(format!(
                "pipe count {pipe_count} outside 1..={MAX_ENGINE_INSTANCES_PER_CLASS}"
            )));
        }

        let variant = if scalability_supported {
            VirtualEngineVariant::Scalable
        } else {
            VirtualEngineVariant::SinglePipe
        };
        let pipe_count = match variant {
            VirtualEngineVariant::SinglePipe => 1,
            VirtualEngineVariant::Scalable => pipe_count,
        };

        debug!(?variant, pipe_count, "virtual engine initialized");
        Ok(Self {
            variant,
            pipe_count,
            single_pipe_hint: VirtualEngineHintParams {
                pipe_count: 1,
                ..Default::default()
            },
            scalable_hint: VirtualEngineHintParams {
                scalable_mode: true,
                pipe_count,
                ..Default::default()
            },
        })
    }

    pub fn variant(&self) -> VirtualEngineVariant {
        self.variant
    }

    pub fn pipe_count(&self) -> u8 {
        self.pipe_count
    }

    pub fn is_scalability_supported(&self) -> bool {
        self.variant == VirtualEngineVariant::Scalable
    }

    pub fn get_hint_params(&self, scalable_mode: bool) -> &VirtualEngineHintParams {
        if scalable_mode {
            &self.scalable_hint
        } else {
            &self.single_pipe_hint
        }
    }

    pub fn set_hint_params(&mut self, params: &VirtualEngineSetParams) -> Result<()> {
        let mut flags = params.flags - HintFlags::FRONT_END_BACK_END_PRESENT;
        flags.set(
            HintFlags::FRONT_END_BACK_END_PRESENT,
            params.have_front_end_cmds,
        );

        if params.scalable_mode {
            if !self.is_scalability_supported() {
                return Err(ScalabilityError::InvalidParameter(
                    "scalable hints on a single-pipe virtual engine".into(),
                ));
            }
            if params.pipe_count == 0 || params.pipe_count > self.pipe_count {
                return Err(ScalabilityError::InvalidParameter(format!(
                    "hint pipe count {} outside 1..={}",
                    params.pipe_count, self.pipe_count
                )));
            }
            let hint = &mut self.scalable_hint;
            hint.flags = flags;
            hint.pipe_count = params.pipe_count;
            hint.batch_buffers = params.batch_buffers;
        } else {
            let hint = &mut self.single_pipe_hint;
            hint.flags = flags;
            hint.pipe_count = 1;
            hint.batch_buffers = [None; MAX_ENGINE_INSTANCES_PER_CLASS];
        }
        Ok(())
    }

    /// Pin pipes to explicit engine instances (debug builds of the scheduler only).
    pub fn set_engine_instance_override(
        &mut self,
        instances: Option<[u8; MAX_ENGINE_INSTANCES_PER_CLASS]>,
    ) {
        self.single_pipe_hint.engine_instance_override = instances;
        self.scalable_hint.engine_instance_override = instances;
    }

    // -----------------------------------------------------------------------------
    // Secondary command buffers
    // -----------------------------------------------------------------------------

    pub fn reset_secondary_cmd_buf_states(&self, set: &mut CommandBufferSet) {
        if self.variant == VirtualEngineVariant::SinglePipe {
            return;
        }
        for slot in set.slots_mut() {
            slot.state = SecondaryBufState::Idle;
            slot.buffer = None;
        }
    }

    /// Check that every secondary buffer has `requested_bytes` left.
    pub fn verify_secondary_cmd_buf_size(
        &self,
        os: &dyn OsInterface,
        set: &CommandBufferSet,
        requested_bytes: u32,
    ) -> Result<()> {
        if self.variant == VirtualEngineVariant::SinglePipe {
            return Ok(());
        }
        for buf_idx in 0..set.secondary_count() {
            os.verify_command_buffer_size(requested_bytes, CommandBufferSet::engine_index(buf_idx))?;
        }
        Ok(())
    }

    pub fn resize_secondary_cmd_buf(
        &self,
        os: &mut dyn OsInterface,
        set: &CommandBufferSet,
        requested_bytes: u32,
        requested_patch_list_size: u32,
    ) -> Result<()> {
        if self.variant == VirtualEngineVariant::SinglePipe {
            return Ok(());
        }
        for buf_idx in 0..set.secondary_count() {
            os.resize_command_buffer_and_patch_list(
                requested_bytes,
                requested_patch_list_size,
                CommandBufferSet::engine_index(buf_idx),
            )?;
        }
        Ok(())
    }

    /// Acquire secondary buffer `buf_idx`. Single-pipe engines have none and return `None`.
    pub fn get_secondary_cmd_buf(
        &self,
        os: &mut dyn OsInterface,
        set: &mut CommandBufferSet,
        buf_idx: usize,
    ) -> Result<Option<CmdBuffer>> {
        if self.variant == VirtualEngineVariant::SinglePipe {
            return Ok(None);
        }
        let count = set.secondary_count();
        let slot = set
            .slot_mut(buf_idx)
            .ok_or_else(|| secondary_out_of_range(buf_idx, count))?;

        let buffer = os.get_command_buffer(CommandBufferSet::engine_index(buf_idx))?;
        slot.state = SecondaryBufState::Acquired;
        Ok(Some(buffer))
    }

    /// Write an acquired secondary buffer back to the OS and keep its latest contents.
    pub fn return_secondary_cmd_buf(
        &self,
        os: &mut dyn OsInterface,
        set: &mut CommandBufferSet,
        buffer: CmdBuffer,
    ) -> Result<()> {
        if self.variant == VirtualEngineVariant::SinglePipe {
            return Ok(());
        }
        let count = set.secondary_count();
        let buf_idx = CommandBufferSet::buf_index(buffer.engine_index())
            .ok_or_else(|| {
                ScalabilityError::InvalidParameter(
                    "the primary buffer is not a secondary buffer".into(),
                )
            })?;
        let slot = set
            .slot_mut(buf_idx)
            .ok_or_else(|| secondary_out_of_range(buf_idx, count))?;
        if slot.state != SecondaryBufState::Acquired {
            return Err(ScalabilityError::InvalidParameter(format!(
                "secondary buffer {buf_idx} returned while {:?}",
                slot.state
            )));
        }

        os.return_command_buffer(&buffer)?;
        slot.buffer = Some(buffer);
        slot.state = SecondaryBufState::Returned;
        Ok(())
    }

    pub fn done_secondary_cmd_buf(&self, set: &mut CommandBufferSet, buf_idx: usize) -> Result<()> {
        if self.variant == VirtualEngineVariant::SinglePipe {
            return Ok(());
        }
        let count = set.secondary_count();
        let slot = set
            .slot_mut(buf_idx)
            .ok_or_else(|| secondary_out_of_range(buf_idx, count))?;
        slot.state = SecondaryBufState::Done;
        Ok(())
    }
}

fn secondary_out_of_range(buf_idx: usize, count: usize) -> ScalabilityError {
    ScalabilityError::InvalidParameter(format!(
        "secondary buffer index {buf_idx} out of range (count={count})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mscale_hw::{HwCmd, RecordingOs};
    use pretty_assertions::assert_eq;

    #[test]
    fn initialize_rejects_bad_pipe_counts_only_when_scalable() {
        for pipes in [0u8, MAX_ENGINE_INSTANCES_PER_CLASS as u8 + 1] {
            assert!(matches!(
                VirtualEngineInterface::initialize(pipes, true),
                Err(ScalabilityError::Configuration(_))
            ));
            let ve = VirtualEngineInterface::initialize(pipes, false).unwrap();
            assert_eq!(ve.variant(), VirtualEngineVariant::SinglePipe);
            assert!(!ve.is_scalability_supported());
        }
    }

    #[test]
    fn hint_params_round_trip() {
        let mut ve = VirtualEngineInterface::initialize(4, true).unwrap();
        ve.set_hint_params(&VirtualEngineSetParams {
            pipe_count: 3,
            scalable_mode: true,
            have_front_end_cmds: true,
            flags: HintFlags::USING_SFC,
            ..Default::default()
        })
        .unwrap();

        let hint = ve.get_hint_params(true);
        assert_eq!(hint.pipe_count, 3);
        assert!(hint.scalable_mode);
        assert_eq!(
            hint.flags,
            HintFlags::USING_SFC | HintFlags::FRONT_END_BACK_END_PRESENT
        );
        assert_eq!(ve.get_hint_params(false).pipe_count, 1);
        assert!(!ve.get_hint_params(false).scalable_mode);
    }

    #[test]
    fn scalable_hints_are_bounded_by_configured_pipes() {
        let mut ve = VirtualEngineInterface::initialize(2, true).unwrap();
        let err = ve
            .set_hint_params(&VirtualEngineSetParams {
                pipe_count: 3,
                scalable_mode: true,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ScalabilityError::InvalidParameter(_)));

        let mut single = VirtualEngineInterface::initialize(1, false).unwrap();
        assert!(single
            .set_hint_params(&VirtualEngineSetParams {
                pipe_count: 1,
                scalable_mode: true,
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn single_pipe_secondary_ops_are_noops() {
        let ve = VirtualEngineInterface::initialize(1, false).unwrap();
        let mut os = RecordingOs::default();
        let mut set = CommandBufferSet::new();

        assert_eq!(ve.get_secondary_cmd_buf(&mut os, &mut set, 0).unwrap(), None);
        ve.return_secondary_cmd_buf(&mut os, &mut set, CmdBuffer::new(1, 16))
            .unwrap();
        ve.done_secondary_cmd_buf(&mut set, 5).unwrap();
        ve.verify_secondary_cmd_buf_size(&os, &set, u32::MAX).unwrap();
        ve.resize_secondary_cmd_buf(&mut os, &set, 64, 0).unwrap();
        assert_eq!(os.resize_calls(), 0);
    }

    #[test]
    fn scalable_secondary_lifecycle() {
        let ve = VirtualEngineInterface::initialize(2, true).unwrap();
        let mut os = RecordingOs::default();
        let mut set = CommandBufferSet::new();
        set.resize(2);

        let mut buf = ve
            .get_secondary_cmd_buf(&mut os, &mut set, 1)
            .unwrap()
            .unwrap();
        assert_eq!(buf.engine_index(), 2);
        assert_eq!(set.slot(1).unwrap().state, SecondaryBufState::Acquired);

        buf.push(HwCmd::Noop).unwrap();
        ve.return_secondary_cmd_buf(&mut os, &mut set, buf).unwrap();
        assert_eq!(set.slot(1).unwrap().state, SecondaryBufState::Returned);
        assert_eq!(os.engine_buffer(2).unwrap().cmds(), &[HwCmd::Noop]);

        ve.done_secondary_cmd_buf(&mut set, 1).unwrap();
        assert_eq!(set.slot(1).unwrap().state, SecondaryBufState::Done);

        ve.reset_secondary_cmd_buf_states(&mut set);
        assert_eq!(set.slot(1).unwrap().state, SecondaryBufState::Idle);
        assert!(set.slot(1).unwrap().buffer.is_none());

        assert!(ve.get_secondary_cmd_buf(&mut os, &mut set, 2).is_err());
    }

    #[test]
    fn returning_an_unacquired_buffer_is_rejected() {
        let ve = VirtualEngineInterface::initialize(2, true).unwrap();
        let mut os = RecordingOs::default();
        let mut set = CommandBufferSet::new();
        set.resize(2);

        let err = ve
            .return_secondary_cmd_buf(&mut os, &mut set, CmdBuffer::new(1, 64))
            .unwrap_err();
        assert!(matches!(err, ScalabilityError::InvalidParameter(_)));
    }
}
