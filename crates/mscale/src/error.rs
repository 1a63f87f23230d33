use mscale_hw::OsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScalabilityError>;

/// Status codes reported to the decode/VP pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidParameter,
    NullPointer,
    NoSpace,
    Unknown,
}

impl Status {
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

#[derive(Debug, Error)]
pub enum ScalabilityError {
    /// Pipe count of zero or above the hardware maximum, or an otherwise unusable session
    /// configuration. Fatal at initialization.
    #[error("invalid scalability configuration: {0}")]
    Configuration(String),

    #[error("failed to allocate {what}: {source}")]
    ResourceAllocation {
        what: &'static str,
        #[source]
        source: OsError,
    },

    /// Command buffer or patch list still too small after every bounded resize attempt.
    #[error(
        "command buffer space exhausted after {attempts} resize attempts \
         (requested {requested_bytes} bytes, {requested_patch_list_size} patch entries)"
    )]
    Capacity {
        attempts: u32,
        requested_bytes: u32,
        requested_patch_list_size: u32,
    },

    /// A collaborator or session object that must exist is missing (e.g. before `initialize` or
    /// after `destroy`).
    #[error("{0} is not available")]
    NullArgument(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("`{op}` is not allowed in state {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Os(#[from] OsError),
}

impl ScalabilityError {
    pub fn status(&self) -> Status {
        match self {
            ScalabilityError::Configuration(_) | ScalabilityError::InvalidParameter(_) => {
                Status::InvalidParameter
            }
            ScalabilityError::NullArgument(_) => Status::NullPointer,
            ScalabilityError::Capacity { .. } => Status::NoSpace,
            ScalabilityError::Os(err) if err.is_no_space() => Status::NoSpace,
            ScalabilityError::ResourceAllocation { .. }
            | ScalabilityError::InvalidState { .. }
            | ScalabilityError::Os(_) => Status::Unknown,
        }
    }
}
