//! Hardware-facing seams consumed by the multi-pipe scalability core.
//!
//! This crate intentionally contains no scheduling logic. It defines the boundary between:
//! - the OS/resource layer (GPU buffer allocation, lock/unlock, command-buffer acquisition and
//!   submission), see [`OsInterface`], and
//! - the hardware command-emission layer (atomic increment, semaphore wait, store/flush,
//!   batch-buffer end), see [`CmdEmitter`].
//!
//! Commands are kept as typed [`HwCmd`] values rather than encoded dwords. Each command carries a
//! nominal byte size so that command-buffer capacity accounting behaves like the real thing.
//!
//! [`RecordingOs`] and [`CmdListEmitter`] are in-memory implementations of both seams. They are
//! what the tests and the multi-pipe simulator run against.
#![forbid(unsafe_code)]

pub mod cmd;
pub mod emit;
pub mod hint;
pub mod os;
pub mod recording;
pub mod resource;

pub use cmd::{CmdBuffer, CmdBufferAttributes, FrameTracking, HwCmd};
pub use emit::{CmdEmitter, CmdListEmitter};
pub use hint::{HintFlags, VirtualEngineHintParams, MAX_ENGINE_INSTANCES_PER_CLASS};
pub use os::{OsError, OsInterface, OsResult};
pub use recording::{RecordingOs, RecordingOsConfig, Submission};
pub use resource::{AllocParams, GpuResource, LockFlags, ResourceUsage};
