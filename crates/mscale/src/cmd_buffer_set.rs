use mscale_hw::CmdBuffer;

/// Engine index of the first secondary buffer; index 0 is the primary.
pub const SECONDARY_ENGINE_BASE: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecondaryBufState {
    #[default]
    Idle,
    /// Handed out to the caller.
    Acquired,
    /// Written back by the caller; the slot holds the latest contents.
    Returned,
    /// Terminated with a batch-buffer end and handed to the OS for submission.
    Done,
}

#[derive(Clone, Debug, Default)]
pub struct SecondarySlot {
    pub state: SecondaryBufState,
    pub buffer: Option<CmdBuffer>,
}

/// Primary buffer plus one secondary buffer per pipe.
#[derive(Debug, Default)]
pub struct CommandBufferSet {
    primary: Option<CmdBuffer>,
    secondaries: Vec<SecondarySlot>,
}

impl CommandBufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine_index(buf_idx: usize) -> u32 {
        buf_idx as u32 + SECONDARY_ENGINE_BASE
    }

    /// Inverse of [`CommandBufferSet::engine_index`]; `None` for the primary engine.
    pub fn buf_index(engine_index: u32) -> Option<usize> {
        engine_index
            .checked_sub(SECONDARY_ENGINE_BASE)
            .map(|idx| idx as usize)
    }

    pub fn primary(&self) -> Option<&CmdBuffer> {
        self.primary.as_ref()
    }

    pub fn primary_mut(&mut self) -> Option<&mut CmdBuffer> {
        self.primary.as_mut()
    }

    pub fn set_primary(&mut self, buffer: CmdBuffer) {
        self.primary = Some(buffer);
    }

    pub fn take_primary(&mut self) -> Option<CmdBuffer> {
        self.primary.take()
    }

    pub fn secondary_count(&self) -> usize {
        self.secondaries.len()
    }

    /// Grow to `count` secondary slots. Shrinking requests are ignored.
    pub fn resize(&mut self, count: usize) {
        if count > self.secondaries.len() {
            self.secondaries.resize_with(count, SecondarySlot::default);
        }
    }

    pub fn slot(&self, buf_idx: usize) -> Option<&SecondarySlot> {
        self.secondaries.get(buf_idx)
    }

    pub fn slot_mut(&mut self, buf_idx: usize) -> Option<&mut SecondarySlot> {
        self.secondaries.get_mut(buf_idx)
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut SecondarySlot> {
        self.secondaries.iter_mut()
    }

    pub(crate) fn clear(&mut self) {
        self.primary = None;
        self.secondaries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_only_grows() {
        let mut set = CommandBufferSet::new();
        set.resize(3);
        set.resize(1);
        assert_eq!(set.secondary_count(), 3);
    }

    #[test]
    fn engine_index_round_trip() {
        assert_eq!(CommandBufferSet::engine_index(0), 1);
        assert_eq!(CommandBufferSet::buf_index(3), Some(2));
        assert_eq!(CommandBufferSet::buf_index(0), None);
    }
}
