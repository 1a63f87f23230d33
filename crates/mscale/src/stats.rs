use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session counters for the multi-pipe submission path.
///
/// Updated by the thread driving the orchestrator; safe to read from a telemetry thread through
/// the shared handle returned by [`crate::ScalabilityMultiPipe::stats`].
#[derive(Debug, Default)]
pub struct ScalabilityStats {
    frames_submitted: AtomicU64,
    submits_deferred: AtomicU64,
    sync_all_pipes: AtomicU64,
    sync_one_pipe_wait_others: AtomicU64,
    resize_attempts: AtomicU64,
    capacity_failures: AtomicU64,
}

impl ScalabilityStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_frames_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_submits_deferred(&self) {
        self.submits_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sync_all_pipes(&self) {
        self.sync_all_pipes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sync_one_pipe_wait_others(&self) {
        self.sync_one_pipe_wait_others
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resize_attempts(&self) {
        self.resize_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_capacity_failures(&self) {
        self.capacity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScalabilityStatsSnapshot {
        ScalabilityStatsSnapshot {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            submits_deferred: self.submits_deferred.load(Ordering::Relaxed),
            sync_all_pipes: self.sync_all_pipes.load(Ordering::Relaxed),
            sync_one_pipe_wait_others: self
                .sync_one_pipe_wait_others
                .load(Ordering::Relaxed),
            resize_attempts: self.resize_attempts.load(Ordering::Relaxed),
            capacity_failures: self.capacity_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalabilityStatsSnapshot {
    pub frames_submitted: u64,
    pub submits_deferred: u64,
    pub sync_all_pipes: u64,
    pub sync_one_pipe_wait_others: u64,
    pub resize_attempts: u64,
    pub capacity_failures: u64,
}
