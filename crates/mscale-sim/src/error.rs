use thiserror::Error;

/// A pipe stuck on a semaphore wait when no other pipe could make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPipe {
    pub pipe: usize,
    pub pc: usize,
    pub resource_id: u32,
    pub expected: u32,
    pub actual: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("deadlock: {} pipe(s) blocked: {blocked:?}", blocked.len())]
    Deadlock { blocked: Vec<BlockedPipe> },

    #[error("command references unknown counter {0}")]
    UnknownCounter(u32),

    #[error("pipe {pipe} program does not end with a batch-buffer end")]
    MissingBatchBufferEnd { pipe: usize },

    #[error("pipe {pipe} still waiting on counter {resource_id} after {spins} spins")]
    WaitTimeout {
        pipe: usize,
        resource_id: u32,
        spins: u64,
    },

    #[error("exploration exceeded {limit} states")]
    StateLimit { limit: usize },

    #[error("invariant violated at pcs {pcs:?}: {message}")]
    InvariantViolated { pcs: Vec<usize>, message: String },

    #[error("pipe {0} worker thread panicked")]
    WorkerPanicked(usize),
}
