//! Multi-pipe GPU execution model for command streams produced through `mscale-hw`.
//!
//! Each secondary command buffer of a submission becomes a [`PipeProgram`]. Programs share a
//! [`CounterMemory`] of 32-bit semaphore counters and execute the semaphore commands the way the
//! engines would: increments and stores are atomic and a wait stalls its pipe until the counter
//! holds the expected value.
//!
//! Three executors are provided:
//! - [`RoundRobin`]: one deterministic schedule, producing a full [`SimTrace`],
//! - [`Explorer`]: every interleaving, with deadlock detection and per-state invariants,
//! - [`ThreadedRunner`]: real threads over atomics (and Loom when the `loom` feature is enabled).
#![forbid(unsafe_code)]

pub mod error;
pub mod explore;
pub mod program;
pub mod scheduler;
pub mod step;
pub mod threaded;

pub use error::{BlockedPipe, SimError};
pub use explore::{ExploreReport, ExploreState, Explorer, DEFAULT_STATE_LIMIT};
pub use program::{CounterMemory, PipeProgram};
pub use scheduler::{RoundRobin, SimTrace};
pub use step::{EventKind, SimEvent};
pub use threaded::{ThreadedReport, ThreadedRunner, WorkloadStamp};
