use mscale_hw::MAX_ENGINE_INSTANCES_PER_CLASS;

/// Which pipe and pass the caller is currently building commands for.
///
/// Only [`crate::ScalabilityMultiPipe::update_state`] changes this, and it keeps
/// `current_pipe < pipe_count` and `current_pass < pass_count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeState {
    current_pipe: u8,
    current_pass: u8,
    pass_count: u8,
    pipe_count: u8,
    max_pipes: u8,
    pipe_index_for_submit: u8,
}

impl PipeState {
    pub(crate) fn new(pipe_count: u8) -> Self {
        Self {
            current_pipe: 0,
            current_pass: 0,
            pass_count: 1,
            pipe_count,
            max_pipes: MAX_ENGINE_INSTANCES_PER_CLASS as u8,
            pipe_index_for_submit: pipe_count,
        }
    }

    pub(crate) fn apply(&mut self, params: &StateParams, pipe_index_for_submit: u8) {
        self.current_pipe = params.current_pipe;
        self.current_pass = params.current_pass;
        self.pass_count = params.pass_count;
        self.pipe_index_for_submit = pipe_index_for_submit;
    }

    pub fn current_pipe(&self) -> u8 {
        self.current_pipe
    }

    pub fn current_pass(&self) -> u8 {
        self.current_pass
    }

    pub fn pass_count(&self) -> u8 {
        self.pass_count
    }

    pub fn pipe_count(&self) -> u8 {
        self.pipe_count
    }

    pub fn max_pipes(&self) -> u8 {
        self.max_pipes
    }

    /// Number of leading pipes that must return their buffer before the frame is submitted.
    pub fn pipe_index_for_submit(&self) -> u8 {
        self.pipe_index_for_submit
    }

    pub fn is_last_pass(&self) -> bool {
        self.current_pass + 1 == self.pass_count
    }
}

/// Input to [`crate::ScalabilityMultiPipe::update_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateParams {
    pub current_pipe: u8,
    pub current_pass: u8,
    pub pass_count: u8,
    /// `None` waits for every configured pipe.
    pub pipe_index_for_submit: Option<u8>,
}

impl Default for StateParams {
    fn default() -> Self {
        Self {
            current_pipe: 0,
            current_pass: 0,
            pass_count: 1,
            pipe_index_for_submit: None,
        }
    }
}

impl StateParams {
    pub fn pipe(current_pipe: u8) -> Self {
        Self {
            current_pipe,
            ..Default::default()
        }
    }

    pub fn pipe_pass(current_pipe: u8, current_pass: u8, pass_count: u8) -> Self {
        Self {
            current_pipe,
            current_pass,
            pass_count,
            pipe_index_for_submit: None,
        }
    }
}
