//! Multi-pipe scalability core for GPU video workloads.
//!
//! A single decode or video-processing workload can be split across several identical engine
//! instances ("pipes"). This crate coordinates such a split:
//! - per-frame rings of GPU semaphore counters ([`SemaphorePool`]),
//! - one primary plus per-pipe secondary command buffers ([`CommandBufferSet`]),
//! - virtual-engine scheduling hints ([`VirtualEngineInterface`]),
//! - cross-pipe barriers emitted as GPU commands ([`SyncKind`]),
//! all driven by [`ScalabilityMultiPipe`].
//!
//! The OS/resource layer and the command encoder are reached through the traits in `mscale-hw`.
#![forbid(unsafe_code)]

pub mod cmd_buffer_set;
pub mod config;
pub mod error;
pub mod multipipe;
pub mod pipe_state;
pub mod semaphore;
pub mod stats;
pub mod sync;
pub mod virtual_engine;

pub use cmd_buffer_set::{CommandBufferSet, SecondaryBufState, SecondarySlot, SECONDARY_ENGINE_BASE};
pub use config::{
    GpuContextCreateOptions, ScalabilityOption, ScalabilityParams, DEFAULT_RING_SIZE,
    FORCE_ENGINE_INSTANCES_ENV,
};
pub use error::{Result, ScalabilityError, Status};
pub use multipipe::{
    OrchestratorState, ScalabilityMultiPipe, SubmitOutcome, CMD_BUFFER_RESERVED_SPACE,
    MAX_RESIZE_ATTEMPTS,
};
pub use pipe_state::{PipeState, StateParams};
pub use semaphore::{BufferSet, SemaphoreKind, SemaphorePool};
pub use stats::{ScalabilityStats, ScalabilityStatsSnapshot};
pub use sync::SyncKind;
pub use virtual_engine::{FrameHints, VirtualEngineInterface, VirtualEngineSetParams, VirtualEngineVariant};
