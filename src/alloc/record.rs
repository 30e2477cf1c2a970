use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MAX_STACK_DEPTH;

/// Return addresses captured at an allocation site, innermost first. Never
/// deeper than [`MAX_STACK_DEPTH`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackTrace {
    frames: Vec<usize>,
}

impl StackTrace {
    pub const fn empty() -> Self {
        Self { frames: Vec::new() }
    }

    /// Copy `frames` into storage of our own. If that storage can't be had
    /// the trace is simply empty: losing a stack beats losing the record.
    pub fn copy_from(frames: &[usize]) -> Self {
        let frames = &frames[..frames.len().min(MAX_STACK_DEPTH)];
        let mut owned = Vec::new();
        if owned.try_reserve_exact(frames.len()).is_err() {
            log::debug!("no memory for a {}-frame stack, dropping it", frames.len());
            return Self::empty();
        }
        owned.extend_from_slice(frames);
        Self { frames: owned }
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Everything we know about one live allocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    address: usize,
    size: usize,
    /// Seconds since the epoch
    created: u64,
    /// Made by the loader or the runtime, not the host; fixed at creation
    suspicious: bool,
    stack: StackTrace,
}

impl AllocationRecord {
    pub fn new(address: usize, size: usize, suspicious: bool, stack: StackTrace) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
        Self {
            address,
            size,
            created,
            suspicious,
            stack,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn is_suspicious(&self) -> bool {
        self.suspicious
    }

    pub fn stack(&self) -> &StackTrace {
        &self.stack
    }
}
