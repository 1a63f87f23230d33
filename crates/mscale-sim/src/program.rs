use std::collections::BTreeMap;

use mscale_hw::{GpuResource, HwCmd, RecordingOs, Submission};

use crate::error::SimError;

/// Command stream executed by one pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeProgram {
    pipe: usize,
    cmds: Vec<HwCmd>,
}

impl PipeProgram {
    /// Fails unless `cmds` is terminated by a batch-buffer end.
    pub fn new(pipe: usize, cmds: Vec<HwCmd>) -> Result<Self, SimError> {
        if cmds.last() != Some(&HwCmd::BatchBufferEnd) {
            return Err(SimError::MissingBatchBufferEnd { pipe });
        }
        Ok(Self { pipe, cmds })
    }

    /// One program per non-empty secondary buffer of `submission`, numbered by pipe.
    pub fn from_submission(submission: &Submission) -> Result<Vec<Self>, SimError> {
        submission
            .secondaries
            .iter()
            .enumerate()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(pipe, buf)| Self::new(pipe, buf.cmds().to_vec()))
            .collect()
    }

    pub fn pipe(&self) -> usize {
        self.pipe
    }

    pub fn cmds(&self) -> &[HwCmd] {
        &self.cmds
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Position of the first command matching `pred`.
    pub fn position(&self, pred: impl Fn(&HwCmd) -> bool) -> Option<usize> {
        self.cmds.iter().position(pred)
    }
}

/// GPU-visible 32-bit counters, keyed by resource id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CounterMemory {
    counters: BTreeMap<u32, u32>,
}

impl CounterMemory {
    /// Every counter referenced by `programs`, initialized to zero.
    pub fn zeroed(programs: &[PipeProgram]) -> Self {
        let counters = referenced(programs).map(|res| (res.id(), 0)).collect();
        Self { counters }
    }

    /// Every counter referenced by `programs`, initialized from the host-visible contents
    /// `os` holds for it.
    pub fn from_os(os: &RecordingOs, programs: &[PipeProgram]) -> Result<Self, SimError> {
        let counters = referenced(programs)
            .map(|res| {
                os.read_u32(&res)
                    .map(|value| (res.id(), value))
                    .ok_or(SimError::UnknownCounter(res.id()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { counters })
    }

    pub fn get(&self, resource_id: u32) -> Result<u32, SimError> {
        self.counters
            .get(&resource_id)
            .copied()
            .ok_or(SimError::UnknownCounter(resource_id))
    }

    pub fn set(&mut self, resource_id: u32, value: u32) -> Result<(), SimError> {
        let slot = self
            .counters
            .get_mut(&resource_id)
            .ok_or(SimError::UnknownCounter(resource_id))?;
        *slot = value;
        Ok(())
    }

    /// `(resource id, value)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.counters.iter().map(|(&id, &value)| (id, value))
    }

    pub fn all_zero(&self) -> bool {
        self.counters.values().all(|&v| v == 0)
    }
}

fn referenced(programs: &[PipeProgram]) -> impl Iterator<Item = GpuResource> + '_ {
    programs
        .iter()
        .flat_map(|p| p.cmds.iter())
        .filter_map(HwCmd::resource)
}
