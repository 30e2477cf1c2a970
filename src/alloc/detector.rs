//! Is a `free()` target something we handed out?

use std::ffi::c_void;

use crate::{
    alloc::{arena::BumpArena, record::AllocationRecord, registry::Registry},
    config::Config,
    os::Platform,
    report::{emit, Frames, Record},
};

#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Handed out by the bootstrap arena: never freed, never reported
    Bootstrap,
    /// Tracked and live. The record has already left the registry.
    Live(AllocationRecord),
    /// Double free, or a pointer we never handed out
    Corrupt,
}

/// Classify the target of a deallocation. A live target is removed from the
/// registry in the same critical section that finds it, so two threads racing
/// to free one pointer can't both be told it is live.
pub fn inspect<const N: usize>(
    arena: &BumpArena<N>,
    registry: &Registry,
    ptr: *const c_void,
) -> Verdict {
    if arena.contains(ptr) {
        return Verdict::Bootstrap;
    }
    match registry.remove(ptr as usize) {
        Some(record) => Verdict::Live(record),
        None => Verdict::Corrupt,
    }
}

/// Emit a corruption record for `addr`, right now
pub fn report<P>(platform: &P, config: &Config, addr: usize, stack: &[usize])
where
    P: Platform,
{
    let frames = Frames::collect(platform, config.stack_mode, stack);
    emit(
        platform,
        &Record::Corruption {
            addr,
            frames: frames.as_slice(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::record::StackTrace;

    #[test]
    fn classifies_each_kind() {
        let arena = BumpArena::<128>::new();
        let registry = Registry::new();
        registry
            .add(AllocationRecord::new(0x1000, 100, false, StackTrace::empty()))
            .unwrap();
        let boot = arena.allocate(8).unwrap();

        assert_eq!(
            inspect(&arena, &registry, boot.as_ptr().cast()),
            Verdict::Bootstrap
        );
        // an interior pointer leaves the real record alone
        assert_eq!(
            inspect(&arena, &registry, 0x1032 as *const c_void),
            Verdict::Corrupt
        );
        assert!(registry.find(0x1000));
        assert!(matches!(
            inspect(&arena, &registry, 0x1000 as *const c_void),
            Verdict::Live(record) if record.size() == 100
        ));
        // a second free of the same address
        assert_eq!(
            inspect(&arena, &registry, 0x1000 as *const c_void),
            Verdict::Corrupt
        );
        assert!(registry.is_empty());
    }
}
