//! Multi-pipe scalability orchestrator.
//!
//! One [`ScalabilityMultiPipe`] drives one decode/VP session across `num_pipes` engine instances.
//! Per frame the caller:
//!
//! 1. calls [`ScalabilityMultiPipe::update_state`] to select the pipe (and pass) it is recording,
//! 2. takes that pipe's secondary buffer with [`ScalabilityMultiPipe::get_cmd_buffer`], records
//!    work and barriers ([`ScalabilityMultiPipe::sync_pipe`]) and hands it back with
//!    [`ScalabilityMultiPipe::return_cmd_buffer`],
//! 3. calls [`ScalabilityMultiPipe::submit_cmd_buffer`], which defers until every participating
//!    pipe of the last pass has returned its buffer.
//!
//! Each frame uses its own slot of the semaphore ring; the slot advances on every submission.

use std::sync::Arc;

use mscale_hw::{CmdBuffer, CmdEmitter, FrameTracking, HintFlags, OsError, OsInterface};
use tracing::{debug, warn};

use crate::cmd_buffer_set::CommandBufferSet;
use crate::config::{GpuContextCreateOptions, ScalabilityOption, ScalabilityParams};
use crate::error::{Result, ScalabilityError, Status};
use crate::pipe_state::{PipeState, StateParams};
use crate::semaphore::{SemaphoreKind, SemaphorePool};
use crate::stats::ScalabilityStats;
use crate::sync::{self, SyncKind};
use crate::virtual_engine::{FrameHints, VirtualEngineInterface, VirtualEngineSetParams};

/// Resize attempts made by the verify operations before giving up with `NoSpace`.
pub const MAX_RESIZE_ATTEMPTS: u32 = 3;

/// Headroom added to every resize request for the commands the orchestrator itself appends
/// (barriers and the batch-buffer end).
pub const CMD_BUFFER_RESERVED_SPACE: u32 = 0x100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    Uninitialized,
    Initialized,
    FrameInProgress { pipe: u8, pass: u8 },
    /// Only observable if a submission failed midway; the session must be destroyed.
    Submitting,
    Idle,
}

impl OrchestratorState {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorState::Uninitialized => "Uninitialized",
            OrchestratorState::Initialized => "Initialized",
            OrchestratorState::FrameInProgress { .. } => "FrameInProgress",
            OrchestratorState::Submitting => "Submitting",
            OrchestratorState::Idle => "Idle",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Not every participating pipe has returned its buffer yet. Nothing was submitted.
    Deferred,
    /// The frame went to the OS using semaphore ring slot `semaphore_index`.
    Submitted { semaphore_index: usize },
}

pub struct ScalabilityMultiPipe<'a, O: OsInterface, E: CmdEmitter + ?Sized> {
    os: &'a mut O,
    emitter: &'a E,

    state: OrchestratorState,
    option: Option<ScalabilityOption>,
    gpu_ctx_options: Option<GpuContextCreateOptions>,
    virtual_engine: Option<VirtualEngineInterface>,
    semaphores: Option<SemaphorePool>,
    cmd_buffers: CommandBufferSet,

    pipe_state: PipeState,
    semaphore_index: usize,
    /// Primary attributes (frame tracking, leading noop) have been written this frame.
    attr_ready: bool,
    /// Bit `p` is set once pipe `p` returned its buffer in the current pass.
    returned_pipes: u32,
    frame_tracking_tag: u32,
    frame_hints: FrameHints,

    stats: Arc<ScalabilityStats>,
}

impl<'a, O: OsInterface, E: CmdEmitter + ?Sized> ScalabilityMultiPipe<'a, O, E> {
    pub fn new(os: &'a mut O, emitter: &'a E) -> Self {
        Self {
            os,
            emitter,
            state: OrchestratorState::Uninitialized,
            option: None,
            gpu_ctx_options: None,
            virtual_engine: None,
            semaphores: None,
            cmd_buffers: CommandBufferSet::new(),
            pipe_state: PipeState::new(0),
            semaphore_index: 0,
            attr_ready: false,
            returned_pipes: 0,
            frame_tracking_tag: 1,
            frame_hints: FrameHints::default(),
            stats: Arc::new(ScalabilityStats::new()),
        }
    }

    // -----------------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------------

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn pipe_state(&self) -> &PipeState {
        &self.pipe_state
    }

    /// Ring slot the current frame's barriers use.
    pub fn semaphore_index(&self) -> usize {
        self.semaphore_index
    }

    pub fn option(&self) -> Option<&ScalabilityOption> {
        self.option.as_ref()
    }

    pub fn gpu_context_options(&self) -> Option<&GpuContextCreateOptions> {
        self.gpu_ctx_options.as_ref()
    }

    pub fn virtual_engine(&self) -> Option<&VirtualEngineInterface> {
        self.virtual_engine.as_ref()
    }

    pub fn semaphore_pool(&self) -> Option<&SemaphorePool> {
        self.semaphores.as_ref()
    }

    pub fn cmd_buffer_set(&self) -> &CommandBufferSet {
        &self.cmd_buffers
    }

    pub fn os(&self) -> &O {
        &*self.os
    }

    pub fn stats(&self) -> Arc<ScalabilityStats> {
        Arc::clone(&self.stats)
    }

    /// Whether this session can be reused for `params` instead of being rebuilt.
    pub fn is_option_matched(&self, params: &ScalabilityParams) -> bool {
        self.option
            .as_ref()
            .is_some_and(|option| option.matches(params))
    }

    // -----------------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------------

    /// Build the session: option, virtual engine, GPU context options and both semaphore pools.
    ///
    /// Configuration is fully validated before any GPU resource is allocated. If allocation fails
    /// partway, the counters allocated so far are kept and released by [`Self::destroy`].
    pub fn initialize(&mut self, params: &ScalabilityParams) -> Result<()> {
        if self.state != OrchestratorState::Uninitialized || self.semaphores.is_some() {
            return Err(self.invalid_state("initialize"));
        }

        let option = ScalabilityOption::new(params)?;
        let mut virtual_engine = VirtualEngineInterface::initialize(option.num_pipes(), true)?;
        let gpu_ctx_options =
            GpuContextCreateOptions::new(&option, params.debug_engine_instances.as_deref())?;
        virtual_engine.set_engine_instance_override(gpu_ctx_options.engine_instances);

        let mut pool = SemaphorePool::new(option.ring_size() as usize);
        let allocated = pool.allocate(&mut *self.os, option.num_pipes() as usize);
        self.semaphores = Some(pool);
        allocated?;

        self.cmd_buffers
            .resize(option.secondary_cmd_buffer_count() as usize);
        self.pipe_state = PipeState::new(option.num_pipes());
        self.semaphore_index = 0;
        self.attr_ready = false;
        self.returned_pipes = 0;

        debug!(
            num_pipes = option.num_pipes(),
            ring_size = option.ring_size(),
            secondaries = option.secondary_cmd_buffer_count(),
            fe_separate_submission = option.fe_separate_submission(),
            "scalability session initialized"
        );

        self.option = Some(option);
        self.gpu_ctx_options = Some(gpu_ctx_options);
        self.virtual_engine = Some(virtual_engine);
        self.state = OrchestratorState::Initialized;
        Ok(())
    }

    /// Release everything the session owns. Safe to call in any state and more than once; every
    /// semaphore is freed exactly once. Returns the first free failure, if any.
    pub fn destroy(&mut self) -> Result<()> {
        let freed = match self.semaphores.take() {
            Some(mut pool) => pool.free(&mut *self.os),
            None => Ok(()),
        };

        self.virtual_engine = None;
        self.gpu_ctx_options = None;
        self.option = None;
        self.cmd_buffers.clear();
        self.pipe_state = PipeState::new(0);
        self.semaphore_index = 0;
        self.attr_ready = false;
        self.returned_pipes = 0;
        self.frame_hints = FrameHints::default();
        if self.state != OrchestratorState::Uninitialized {
            debug!(from = self.state.name(), "scalability session destroyed");
        }
        self.state = OrchestratorState::Uninitialized;
        freed
    }

    // -----------------------------------------------------------------------------
    // Per-frame flow
    // -----------------------------------------------------------------------------

    /// Select the pipe and pass subsequent calls operate on.
    pub fn update_state(&mut self, params: StateParams) -> Result<()> {
        match self.state {
            OrchestratorState::Initialized
            | OrchestratorState::FrameInProgress { .. }
            | OrchestratorState::Idle => {}
            OrchestratorState::Uninitialized | OrchestratorState::Submitting => {
                return Err(self.invalid_state("update_state"));
            }
        }
        let option = self
            .option
            .as_ref()
            .ok_or(ScalabilityError::NullArgument("scalability option"))?;
        let num_pipes = option.num_pipes();

        if params.current_pipe >= num_pipes {
            return Err(ScalabilityError::InvalidParameter(format!(
                "pipe {} out of range for {num_pipes} pipes",
                params.current_pipe
            )));
        }
        if params.pass_count == 0 || params.current_pass >= params.pass_count {
            return Err(ScalabilityError::InvalidParameter(format!(
                "pass {} out of range for {} passes",
                params.current_pass, params.pass_count
            )));
        }
        let pipe_index_for_submit = params.pipe_index_for_submit.unwrap_or(num_pipes);
        if pipe_index_for_submit == 0 || pipe_index_for_submit > num_pipes {
            return Err(ScalabilityError::InvalidParameter(format!(
                "pipe index for submit {pipe_index_for_submit} outside 1..={num_pipes}"
            )));
        }

        let same_pass = matches!(
            self.state,
            OrchestratorState::FrameInProgress { pass, .. } if pass == params.current_pass
        );
        if !same_pass {
            self.returned_pipes = 0;
        }

        self.pipe_state.apply(&params, pipe_index_for_submit);
        self.state = OrchestratorState::FrameInProgress {
            pipe: params.current_pipe,
            pass: params.current_pass,
        };
        Ok(())
    }

    /// Attach scheduling hints to the frame being recorded. They travel with the next submitted
    /// primary buffer and are cleared once it is submitted.
    pub fn set_frame_hints(&mut self, hints: FrameHints) -> Result<()> {
        match self.state {
            OrchestratorState::Initialized
            | OrchestratorState::FrameInProgress { .. }
            | OrchestratorState::Idle => {}
            OrchestratorState::Uninitialized | OrchestratorState::Submitting => {
                return Err(self.invalid_state("set_frame_hints"));
            }
        }
        let pipe_count = self.pipe_state.pipe_count() as usize;
        if let Some(pipe) = hints.batch_buffers[pipe_count..]
            .iter()
            .position(Option::is_some)
        {
            return Err(ScalabilityError::InvalidParameter(format!(
                "batch buffer for pipe {} but only {pipe_count} pipes",
                pipe + pipe_count
            )));
        }
        self.frame_hints = hints;
        Ok(())
    }

    /// Hand out the active pipe's secondary buffer.
    ///
    /// The first call of a frame also prepares the primary buffer: it attaches frame tracking
    /// when `frame_tracking_requested` is set and writes its leading noop.
    pub fn get_cmd_buffer(&mut self, frame_tracking_requested: bool) -> Result<CmdBuffer> {
        if !matches!(self.state, OrchestratorState::FrameInProgress { .. }) {
            return Err(self.invalid_state("get_cmd_buffer"));
        }
        let virtual_engine = self
            .virtual_engine
            .as_ref()
            .ok_or(ScalabilityError::NullArgument("virtual engine"))?;

        if self.cmd_buffers.primary().is_none() {
            let primary = self.os.get_command_buffer(0)?;
            self.cmd_buffers.set_primary(primary);
        }

        if !self.attr_ready {
            let primary = self
                .cmd_buffers
                .primary_mut()
                .ok_or(ScalabilityError::NullArgument("primary command buffer"))?;
            if frame_tracking_requested {
                primary.attributes.frame_tracking = Some(FrameTracking {
                    tag: self.frame_tracking_tag,
                });
            }
            self.emitter.noop(primary)?;
            self.attr_ready = true;
        }

        let buf_idx = self.pipe_state.current_pipe() as usize;
        virtual_engine
            .get_secondary_cmd_buf(&mut *self.os, &mut self.cmd_buffers, buf_idx)?
            .ok_or(ScalabilityError::NullArgument("secondary command buffer"))
    }

    /// Take back the active pipe's secondary buffer and release the primary.
    pub fn return_cmd_buffer(&mut self, buffer: CmdBuffer) -> Result<()> {
        if !matches!(self.state, OrchestratorState::FrameInProgress { .. }) {
            return Err(self.invalid_state("return_cmd_buffer"));
        }
        let virtual_engine = self
            .virtual_engine
            .as_ref()
            .ok_or(ScalabilityError::NullArgument("virtual engine"))?;

        let current_pipe = self.pipe_state.current_pipe();
        let expected = CommandBufferSet::engine_index(current_pipe as usize);
        if buffer.engine_index() != expected {
            return Err(ScalabilityError::InvalidParameter(format!(
                "buffer of engine {} returned while pipe {current_pipe} (engine {expected}) is active",
                buffer.engine_index()
            )));
        }

        virtual_engine.return_secondary_cmd_buf(&mut *self.os, &mut self.cmd_buffers, buffer)?;
        self.returned_pipes |= 1 << current_pipe;

        if let Some(primary) = self.cmd_buffers.take_primary() {
            self.os.return_command_buffer(&primary)?;
        }
        Ok(())
    }

    /// Append a cross-pipe barrier to `buf`, the active pipe's secondary buffer.
    ///
    /// For [`SyncKind::OnePipeWaitOthers`], `id` is the leader pipe. It is ignored for
    /// [`SyncKind::AllPipes`].
    ///
    /// A ring slot's all-pipes counters must be used by at most one rendezvous per frame.
    pub fn sync_pipe(&mut self, kind: SyncKind, id: u32, buf: &mut CmdBuffer) -> Result<()> {
        if !matches!(self.state, OrchestratorState::FrameInProgress { .. }) {
            return Err(self.invalid_state("sync_pipe"));
        }
        let pool = self
            .semaphores
            .as_ref()
            .ok_or(ScalabilityError::NullArgument("semaphore pool"))?;

        let current_pipe = self.pipe_state.current_pipe() as usize;
        let pipe_count = self.pipe_state.pipe_count();
        if buf.engine_index() != CommandBufferSet::engine_index(current_pipe) {
            return Err(ScalabilityError::InvalidParameter(format!(
                "sync target engine {} does not belong to pipe {current_pipe}",
                buf.engine_index()
            )));
        }

        match kind {
            SyncKind::AllPipes => {
                let set = pool
                    .set(SemaphoreKind::AllPipes, self.semaphore_index)
                    .ok_or(ScalabilityError::NullArgument("all-pipes semaphore set"))?;
                sync::sync_all_pipes(self.emitter, set, current_pipe, pipe_count, buf)?;
                self.stats.inc_sync_all_pipes();
            }
            SyncKind::OnePipeWaitOthers => {
                if id >= u32::from(pipe_count) {
                    return Err(ScalabilityError::InvalidParameter(format!(
                        "leader pipe {id} out of range for {pipe_count} pipes"
                    )));
                }
                let set = pool
                    .set(SemaphoreKind::OnePipeWait, self.semaphore_index)
                    .ok_or(ScalabilityError::NullArgument("one-pipe-wait semaphore set"))?;
                sync::sync_one_pipe_wait_others(
                    self.emitter,
                    set,
                    current_pipe,
                    self.pipe_state.current_pass(),
                    id as usize,
                    buf,
                )?;
                self.stats.inc_sync_one_pipe_wait_others();
            }
        }
        Ok(())
    }

    /// Make sure `buf`, the active pipe's held secondary buffer, has `requested_size` bytes left
    /// and the patch list `requested_patch_list_size` entries, resizing up to
    /// [`MAX_RESIZE_ATTEMPTS`] times.
    ///
    /// Each resize first writes `buf` back so the OS grows it from its real fill level, then grows
    /// `buf` to the capacity the OS reports. A barrier that failed with `NoSpace` can be retried
    /// on the same buffer once this succeeds.
    pub fn verify_cmd_buffer(
        &mut self,
        buf: &mut CmdBuffer,
        requested_size: u32,
        requested_patch_list_size: u32,
    ) -> Result<()> {
        if !matches!(self.state, OrchestratorState::FrameInProgress { .. }) {
            return Err(self.invalid_state("verify_cmd_buffer"));
        }
        let current_pipe = self.pipe_state.current_pipe();
        let expected = CommandBufferSet::engine_index(current_pipe as usize);
        if buf.engine_index() != expected {
            return Err(ScalabilityError::InvalidParameter(format!(
                "buffer of engine {} verified while pipe {current_pipe} (engine {expected}) is active",
                buf.engine_index()
            )));
        }

        resize_until_fits(
            &mut *self.os,
            buf,
            &self.stats,
            requested_size,
            requested_patch_list_size,
            |os, buf| {
                if buf.remaining_bytes() < requested_size {
                    return Err(OsError::NoSpace {
                        engine_index: buf.engine_index(),
                        requested: requested_size,
                        available: buf.remaining_bytes(),
                    }
                    .into());
                }
                os.verify_patch_list_size(requested_patch_list_size)?;
                Ok(())
            },
            |os, buf| {
                os.return_command_buffer(buf)?;
                let capacity = os.resize_command_buffer_and_patch_list(
                    requested_size + CMD_BUFFER_RESERVED_SPACE,
                    requested_patch_list_size,
                    buf.engine_index(),
                )?;
                buf.grow_to(capacity);
                Ok(())
            },
        )
    }

    /// Like [`Self::verify_cmd_buffer`] but for every secondary buffer at once, as stored by the
    /// OS. Use [`Self::verify_cmd_buffer`] for a buffer a pipe is currently holding.
    pub fn verify_space_available(
        &mut self,
        requested_size: u32,
        requested_patch_list_size: u32,
    ) -> Result<()> {
        match self.state {
            OrchestratorState::Uninitialized | OrchestratorState::Submitting => {
                return Err(self.invalid_state("verify_space_available"));
            }
            _ => {}
        }
        let virtual_engine = self
            .virtual_engine
            .as_ref()
            .ok_or(ScalabilityError::NullArgument("virtual engine"))?;
        let cmd_buffers = &self.cmd_buffers;

        resize_until_fits(
            &mut *self.os,
            &mut (),
            &self.stats,
            requested_size,
            requested_patch_list_size,
            |os, _| {
                virtual_engine.verify_secondary_cmd_buf_size(os, cmd_buffers, requested_size)?;
                os.verify_patch_list_size(requested_patch_list_size)?;
                Ok(())
            },
            |os, _| {
                virtual_engine.resize_secondary_cmd_buf(
                    os,
                    cmd_buffers,
                    requested_size + CMD_BUFFER_RESERVED_SPACE,
                    requested_patch_list_size,
                )
            },
        )
    }

    /// Every pipe in `0..pipe_index_for_submit` has returned its buffer in the last pass.
    pub fn is_pipe_ready_to_submit(&self) -> bool {
        matches!(self.state, OrchestratorState::FrameInProgress { .. })
            && self.pipe_state.is_last_pass()
            && (0..self.pipe_state.pipe_index_for_submit())
                .all(|pipe| self.returned_pipes & (1 << pipe) != 0)
    }

    /// Submit the frame once every participating pipe is ready; otherwise report
    /// [`SubmitOutcome::Deferred`] and change nothing.
    pub fn submit_cmd_buffer(&mut self) -> Result<SubmitOutcome> {
        if !matches!(self.state, OrchestratorState::FrameInProgress { .. }) {
            return Err(self.invalid_state("submit_cmd_buffer"));
        }
        if !self.is_pipe_ready_to_submit() {
            self.stats.inc_submits_deferred();
            return Ok(SubmitOutcome::Deferred);
        }

        let option = self
            .option
            .as_ref()
            .ok_or(ScalabilityError::NullArgument("scalability option"))?;
        let virtual_engine = self
            .virtual_engine
            .as_mut()
            .ok_or(ScalabilityError::NullArgument("virtual engine"))?;
        self.state = OrchestratorState::Submitting;

        for buf_idx in 0..self.cmd_buffers.secondary_count() {
            let slot = self
                .cmd_buffers
                .slot_mut(buf_idx)
                .ok_or(ScalabilityError::NullArgument("secondary command buffer"))?;
            // Slots no pipe wrote this frame stay empty and are not chained.
            let Some(mut buffer) = slot.buffer.take() else {
                continue;
            };
            self.emitter.batch_buffer_end(&mut buffer)?;
            self.os.return_command_buffer(&buffer)?;
            virtual_engine.done_secondary_cmd_buf(&mut self.cmd_buffers, buf_idx)?;
        }

        let hints = std::mem::take(&mut self.frame_hints);
        let mut flags = hints.flags;
        if option.using_sfc() {
            flags |= HintFlags::USING_SFC;
        }
        virtual_engine.set_hint_params(&VirtualEngineSetParams {
            pipe_count: option.num_pipes(),
            scalable_mode: true,
            have_front_end_cmds: option.fe_separate_submission(),
            flags,
            batch_buffers: hints.batch_buffers,
        })?;

        let mut primary = match self.cmd_buffers.take_primary() {
            Some(primary) => primary,
            None => self.os.get_command_buffer(0)?,
        };
        primary.attributes.hint_params = Some(virtual_engine.get_hint_params(true).clone());
        self.os.submit_command_buffer(&primary)?;

        let submitted_index = self.semaphore_index;
        self.semaphore_index = (self.semaphore_index + 1) % option.ring_size() as usize;
        self.attr_ready = false;
        self.returned_pipes = 0;
        self.frame_tracking_tag = self.frame_tracking_tag.wrapping_add(1);
        virtual_engine.reset_secondary_cmd_buf_states(&mut self.cmd_buffers);
        self.stats.inc_frames_submitted();
        self.state = OrchestratorState::Idle;

        debug!(
            semaphore_index = submitted_index,
            next = self.semaphore_index,
            "submitted multi-pipe frame"
        );
        Ok(SubmitOutcome::Submitted {
            semaphore_index: submitted_index,
        })
    }

    fn invalid_state(&self, op: &'static str) -> ScalabilityError {
        ScalabilityError::InvalidState {
            op,
            state: self.state.name(),
        }
    }
}

impl<O: OsInterface, E: CmdEmitter + ?Sized> Drop for ScalabilityMultiPipe<'_, O, E> {
    fn drop(&mut self) {
        if self.semaphores.is_some() {
            warn!(
                state = self.state.name(),
                "scalability session dropped without destroy; GPU semaphores leaked"
            );
        }
    }
}

/// Verify, and on `NoSpace` resize and verify again, at most [`MAX_RESIZE_ATTEMPTS`] times.
fn resize_until_fits<O: OsInterface, T: ?Sized>(
    os: &mut O,
    target: &mut T,
    stats: &ScalabilityStats,
    requested_bytes: u32,
    requested_patch_list_size: u32,
    mut verify: impl FnMut(&O, &T) -> Result<()>,
    mut resize: impl FnMut(&mut O, &mut T) -> Result<()>,
) -> Result<()> {
    for attempt in 0..=MAX_RESIZE_ATTEMPTS {
        match verify(&*os, &*target) {
            Ok(()) => return Ok(()),
            Err(err) if err.status() == Status::NoSpace => {}
            Err(err) => return Err(err),
        }
        if attempt == MAX_RESIZE_ATTEMPTS {
            break;
        }
        debug!(attempt, requested_bytes, requested_patch_list_size, "growing command buffer");
        stats.inc_resize_attempts();
        resize(&mut *os, &mut *target)?;
    }

    stats.inc_capacity_failures();
    warn!(requested_bytes, requested_patch_list_size, "command buffer space exhausted");
    Err(ScalabilityError::Capacity {
        attempts: MAX_RESIZE_ATTEMPTS,
        requested_bytes,
        requested_patch_list_size,
    })
}
