//! Memory for allocations made while the real `malloc()` is being looked up.

use std::{
    cell::UnsafeCell,
    ffi::c_void,
    mem,
    ptr::NonNull,
    sync::{Mutex, PoisonError},
};

use crate::{
    error::{Result, TrackError},
    util::num::round_up,
};

/// Capacity of the process-wide arena
pub const ARENA_BYTES: usize = 64 * 1024;
/// Alignment of every block, as good as `malloc()`'s
pub const ARENA_ALIGN: usize = 16;
/// Every block is preceded by its size, padded out to keep the alignment
const HEADER: usize = ARENA_ALIGN;

#[repr(C, align(16))]
struct Region<const N: usize>([u8; N]);

/// A simple stack allocator over a fixed region, that returns an error if
/// there is ever not enough space remaining. `free` is a nop and `allocate`
/// is just a sp bump.
pub struct BumpArena<const N: usize = ARENA_BYTES> {
    region: UnsafeCell<Region<N>>,
    sp: Mutex<usize>,
}

// SAFETY: bytes of the region are only written by `allocate()`, under `sp`'s
// lock, and only for the range it is about to hand out. Handed out ranges
// never overlap, since `sp` only moves forward.
unsafe impl<const N: usize> Sync for BumpArena<N> {}

impl<const N: usize> BumpArena<N> {
    pub const fn new() -> Self {
        Self {
            region: UnsafeCell::new(Region([0; N])),
            sp: Mutex::new(0),
        }
    }

    fn base(&self) -> *mut u8 {
        self.region.get().cast()
    }

    /// Hand out `size` fresh, zeroed, 16-aligned bytes
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let exhausted = TrackError::ArenaExhausted { requested: size };
        let mut sp = self.sp.lock().unwrap_or_else(PoisonError::into_inner);

        let header = *sp;
        let data = header + HEADER;
        let end = data.checked_add(size).ok_or(exhausted)?;
        if end > N {
            return Err(exhausted);
        }

        // SAFETY:
        // - `header + HEADER + size <= N`, so both the header and the block
        //   are inside the region
        // - `header` is a multiple of 16 into a 16-aligned region, so the
        //   write is aligned for `usize`
        // - this range is past `sp`, so nobody else has it
        unsafe { self.base().add(header).cast::<usize>().write(size) };
        *sp = round_up(end, ARENA_ALIGN).min(N);

        // SAFETY: `data < N`, in bounds of a non-null region
        Ok(unsafe { NonNull::new_unchecked(self.base().add(data)) })
    }

    /// Was `ptr` (or rather, could it have been) handed out by this arena?
    pub fn contains(&self, ptr: *const c_void) -> bool {
        let base = self.base() as usize;
        (base..base + N).contains(&(ptr as usize))
    }

    /// The size `ptr` was allocated with
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`BumpArena::allocate()`] on this arena
    pub unsafe fn block_size(&self, ptr: *const c_void) -> usize {
        debug_assert!(self.contains(ptr));
        // SAFETY: caller guarantees `ptr` is a block start, which always has
        // its header `HEADER` bytes below it, aligned
        unsafe {
            ptr.cast::<u8>()
                .sub(HEADER)
                .cast::<usize>()
                .read()
        }
    }

    /// Bytes consumed so far, headers and padding included
    pub fn used(&self) -> usize {
        *self.sp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for BumpArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(HEADER >= mem::size_of::<usize>());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_aligned_distinct_and_sized() {
        let arena = BumpArena::<256>::new();
        let a = arena.allocate(3).unwrap();
        let b = arena.allocate(40).unwrap();
        assert_eq!(a.as_ptr() as usize % ARENA_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize % ARENA_ALIGN, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 3);
        // SAFETY: both came from `arena`
        unsafe {
            assert_eq!(arena.block_size(a.as_ptr().cast()), 3);
            assert_eq!(arena.block_size(b.as_ptr().cast()), 40);
        }
    }

    #[test]
    fn blocks_come_out_zeroed() {
        let arena = BumpArena::<128>::new();
        let p = arena.allocate(32).unwrap();
        // SAFETY: `p` is valid for 32 bytes
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn contains_only_its_own_region() {
        let arena = BumpArena::<128>::new();
        let p = arena.allocate(8).unwrap();
        assert!(arena.contains(p.as_ptr().cast()));
        let outside = 5u64;
        assert!(!arena.contains((&outside as *const u64).cast()));
        assert!(!arena.contains(std::ptr::null()));
    }

    #[test]
    fn exhaustion_is_an_error_not_a_wrap() {
        let arena = BumpArena::<64>::new();
        assert!(arena.allocate(32).is_ok());
        assert_eq!(
            arena.allocate(32),
            Err(TrackError::ArenaExhausted { requested: 32 })
        );
        assert_eq!(
            arena.allocate(usize::MAX),
            Err(TrackError::ArenaExhausted {
                requested: usize::MAX
            })
        );
        assert_eq!(arena.used(), 48);
    }
}
