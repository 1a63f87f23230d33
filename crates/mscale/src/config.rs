//! Session configuration.
//!
//! [`ScalabilityParams`] is what the decode/VP pipeline hands to
//! [`crate::ScalabilityMultiPipe::initialize`]. It is turned into an immutable
//! [`ScalabilityOption`] exactly once per session.

use mscale_hw::MAX_ENGINE_INSTANCES_PER_CLASS;
use serde::Deserialize;

use crate::error::{Result, ScalabilityError};

/// Default number of per-frame semaphore sets kept in flight.
pub const DEFAULT_RING_SIZE: u8 = 16;

/// Env var forcing explicit engine instances per pipe, e.g. `MSCALE_FORCE_ENGINE_INSTANCES=1,0`.
///
/// Debug builds of the scheduler honour these instead of choosing engines themselves.
pub const FORCE_ENGINE_INSTANCES_ENV: &str = "MSCALE_FORCE_ENGINE_INSTANCES";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScalabilityParams {
    pub num_pipes: u8,
    pub using_sfc: bool,
    /// Front-end commands are submitted separately from the back-end pipes.
    pub fe_separate_submission: bool,
    /// Number of secondary command buffers. Hardware generations differ on whether a separately
    /// submitted front end needs its own buffer, so this is supplied rather than derived.
    /// `None` means one per pipe.
    pub secondary_cmd_buffer_count: Option<u8>,
    pub ring_size: u8,
    /// Debug-only explicit engine instance per pipe.
    pub debug_engine_instances: Option<Vec<u8>>,
}

impl Default for ScalabilityParams {
    fn default() -> Self {
        Self {
            num_pipes: 1,
            using_sfc: false,
            fe_separate_submission: false,
            secondary_cmd_buffer_count: None,
            ring_size: DEFAULT_RING_SIZE,
            debug_engine_instances: None,
        }
    }
}

impl ScalabilityParams {
    pub fn with_pipes(num_pipes: u8) -> Self {
        Self {
            num_pipes,
            ..Default::default()
        }
    }

    /// Apply [`FORCE_ENGINE_INSTANCES_ENV`] if it is set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(FORCE_ENGINE_INSTANCES_ENV) {
            if !raw.trim().is_empty() {
                self.debug_engine_instances = Some(parse_engine_instances(&raw)?);
            }
        }
        Ok(self)
    }
}

pub(crate) fn parse_engine_instances(raw: &str) -> Result<Vec<u8>> {
    raw.split(',')
        .map(str::trim)
        .map(|v| {
            v.parse::<u8>().map_err(|_| {
                ScalabilityError::Configuration(format!(
                    "{FORCE_ENGINE_INSTANCES_ENV}: `{v}` is not an engine instance id"
                ))
            })
        })
        .collect()
}

/// Immutable per-session configuration derived from [`ScalabilityParams`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalabilityOption {
    num_pipes: u8,
    fe_separate_submission: bool,
    lrca_count: u8,
    secondary_cmd_buffer_count: u8,
    ring_size: u8,
    using_sfc: bool,
}

impl ScalabilityOption {
    /// Pipe-count limits are enforced by the virtual engine; this only checks the fields that
    /// depend on it.
    pub fn new(params: &ScalabilityParams) -> Result<Self> {
        if params.ring_size == 0 {
            return Err(ScalabilityError::Configuration(
                "ring size must be at least 1".into(),
            ));
        }

        let secondary_cmd_buffer_count = params
            .secondary_cmd_buffer_count
            .unwrap_or(params.num_pipes);
        // One extra slot is allowed for a separately submitted front end.
        let max_secondaries = MAX_ENGINE_INSTANCES_PER_CLASS + 1;
        if secondary_cmd_buffer_count < params.num_pipes
            || secondary_cmd_buffer_count as usize > max_secondaries
        {
            return Err(ScalabilityError::Configuration(format!(
                "secondary command buffer count {secondary_cmd_buffer_count} must be in {}..={max_secondaries}",
                params.num_pipes
            )));
        }

        Ok(Self {
            num_pipes: params.num_pipes,
            fe_separate_submission: params.fe_separate_submission,
            lrca_count: params.num_pipes,
            secondary_cmd_buffer_count,
            ring_size: params.ring_size,
            using_sfc: params.using_sfc,
        })
    }

    pub fn num_pipes(&self) -> u8 {
        self.num_pipes
    }

    pub fn fe_separate_submission(&self) -> bool {
        self.fe_separate_submission
    }

    pub fn lrca_count(&self) -> u8 {
        self.lrca_count
    }

    pub fn secondary_cmd_buffer_count(&self) -> u8 {
        self.secondary_cmd_buffer_count
    }

    pub fn ring_size(&self) -> u8 {
        self.ring_size
    }

    pub fn using_sfc(&self) -> bool {
        self.using_sfc
    }

    /// Whether a session built from `params` would use this exact option, i.e. an existing
    /// session can be reused instead of rebuilt.
    pub fn matches(&self, params: &ScalabilityParams) -> bool {
        Self::new(params).is_ok_and(|other| other == *self)
    }
}

/// Parameters for creating the GPU context(s) backing a multi-pipe session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuContextCreateOptions {
    pub lrca_count: u8,
    pub using_sfc: bool,
    pub engine_instances: Option<[u8; MAX_ENGINE_INSTANCES_PER_CLASS]>,
}

impl GpuContextCreateOptions {
    pub(crate) fn new(option: &ScalabilityOption, debug_engine_instances: Option<&[u8]>) -> Result<Self> {
        let engine_instances = debug_engine_instances
            .map(|ids| engine_instance_table(ids, option.num_pipes()))
            .transpose()?;
        Ok(Self {
            lrca_count: option.lrca_count(),
            using_sfc: option.using_sfc(),
            engine_instances,
        })
    }
}

pub(crate) fn engine_instance_table(
    ids: &[u8],
    num_pipes: u8,
) -> Result<[u8; MAX_ENGINE_INSTANCES_PER_CLASS]> {
    if ids.len() != num_pipes as usize {
        return Err(ScalabilityError::Configuration(format!(
            "{} debug engine instances given for {num_pipes} pipes",
            ids.len()
        )));
    }
    let mut table = [0u8; MAX_ENGINE_INSTANCES_PER_CLASS];
    for (slot, &id) in table.iter_mut().zip(ids) {
        if id as usize >= MAX_ENGINE_INSTANCES_PER_CLASS {
            return Err(ScalabilityError::Configuration(format!(
                "engine instance {id} exceeds the per-class maximum of {MAX_ENGINE_INSTANCES_PER_CLASS}"
            )));
        }
        *slot = id;
    }
    Ok(table)
}
