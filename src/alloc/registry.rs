//! What is currently live. Records leaving the map are dropped by the
//! caller, after the lock is gone.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ahash::RandomState;
use hashbrown::HashMap;

use crate::{
    alloc::record::AllocationRecord,
    error::{Result, TrackError},
};

/// Fixed seeds: no need for DoS resistance, and no randomness source to ask
/// from inside `malloc()`
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

type LiveMap = HashMap<usize, AllocationRecord, RandomState>;

const fn empty_map() -> LiveMap {
    HashMap::with_hasher(RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]))
}

pub struct Registry {
    live: Mutex<LiveMap>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            live: Mutex::new(empty_map()),
        }
    }

    /// Nobody panics while holding the lock (and the release profile aborts
    /// anyway), so a poisoned map is still a consistent one
    fn lock(&self) -> MutexGuard<'_, LiveMap> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `record`. If the map can't grow, the record is dropped
    /// and the allocation goes untracked.
    pub fn add(&self, record: AllocationRecord) -> Result<()> {
        let addr = record.address();
        let mut live = self.lock();
        if live.try_reserve(1).is_err() {
            drop(live);
            return Err(TrackError::MetadataExhausted { addr });
        }
        let stale = live.insert(addr, record);
        drop(live);
        if stale.is_some() {
            log::debug!("{addr:#x} handed out again without a tracked free");
        }
        Ok(())
    }

    /// Stop tracking `addr`, handing back its record
    pub fn remove(&self, addr: usize) -> Option<AllocationRecord> {
        self.lock().remove(&addr)
    }

    /// Is `addr` tracked as live right now?
    pub fn find(&self, addr: usize) -> bool {
        self.lock().contains_key(&addr)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exit-time sweep: take every record, sorted by address, leaving the
    /// registry empty. The lock is only held for the swap; the caller walks
    /// the records without it.
    pub fn sweep(&self) -> Vec<AllocationRecord> {
        let swept = std::mem::replace(&mut *self.lock(), empty_map());
        let mut records: Vec<AllocationRecord> = swept.into_values().collect();
        records.sort_unstable_by_key(AllocationRecord::address);
        records
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::record::StackTrace;

    fn record(addr: usize, size: usize) -> AllocationRecord {
        AllocationRecord::new(addr, size, false, StackTrace::empty())
    }

    #[test]
    fn add_find_remove() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        registry.add(record(0x10, 8)).unwrap();
        registry.add(record(0x20, 16)).unwrap();
        assert!(registry.find(0x10));
        assert!(!registry.find(0x18));
        assert_eq!(registry.remove(0x10).map(|r| r.size()), Some(8));
        assert_eq!(registry.remove(0x10), None);
        assert!(!registry.find(0x10));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn one_record_per_address() {
        let registry = Registry::new();
        registry.add(record(0x10, 8)).unwrap();
        registry.add(record(0x10, 32)).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove(0x10).map(|r| r.size()), Some(32));
    }

    #[test]
    fn sweep_empties_and_sorts() {
        let registry = Registry::new();
        for addr in [0x30, 0x10, 0x20] {
            registry.add(record(addr, addr)).unwrap();
        }
        let swept: Vec<usize> = registry.sweep().iter().map(|r| r.address()).collect();
        assert_eq!(swept, [0x10, 0x20, 0x30]);
        assert!(registry.is_empty());
        assert!(registry.sweep().is_empty());
    }

    #[test]
    fn concurrent_threads_keep_their_own_addresses() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let registry = Registry::new();
        crossbeam::scope(|s| {
            for t in 0..THREADS {
                let registry = &registry;
                s.spawn(move |_| {
                    let base = (t + 1) << 20;
                    for i in 0..PER_THREAD {
                        registry.add(record(base + i * 16, 16)).unwrap();
                    }
                    // free every other one
                    for i in (0..PER_THREAD).step_by(2) {
                        assert!(registry.remove(base + i * 16).is_some());
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(registry.len(), THREADS * PER_THREAD / 2);
        for t in 0..THREADS {
            let base = (t + 1) << 20;
            assert!(!registry.find(base));
            assert!(registry.find(base + 16));
        }
    }
}
