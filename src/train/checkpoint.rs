//! Activation-checkpoint call indexing
//!
//! Each checkpointed call in a step gets an index so its recomputation in
//! the backward pass can be matched to the original call. The counter is
//! owned by the manager: reset at the start of every step, incremented once
//! per wrapped call.

use tracing::trace;

/// Identifies one checkpointed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTag {
    pub step: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointManager {
    enabled: bool,
    step: usize,
    call_index: usize,
}

impl CheckpointManager {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Self::default() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start a new step; the next call gets index 0.
    pub fn begin_step(&mut self, step: usize) {
        self.step = step;
        self.call_index = 0;
    }

    /// Calls tagged so far in the current step.
    pub fn calls(&self) -> usize {
        self.call_index
    }

    fn next_tag(&mut self) -> CallTag {
        let tag = CallTag { step: self.step, index: self.call_index };
        self.call_index += 1;
        tag
    }

    /// Run `f` as a checkpointed call.
    ///
    /// The tag is handed to `f`; with checkpointing disabled `f` runs
    /// untagged and the counter does not move.
    pub fn run<T>(&mut self, f: impl FnOnce(Option<CallTag>) -> T) -> T {
        if !self.enabled {
            return f(None);
        }
        let tag = self.next_tag();
        trace!(step = tag.step, index = tag.index, "checkpointed call");
        f(Some(tag))
    }
}
