//! Our own allocations go to the real primitives, not our hooks.

use std::{
    alloc::{GlobalAlloc, Layout},
    ffi::c_void,
    mem, ptr,
};

use crate::{alloc::arena::ARENA_ALIGN, externc::INTERCEPTOR};

/// What `malloc()` guarantees on every 64-bit glibc target
const MALLOC_ALIGN: usize = 2 * mem::size_of::<usize>();

pub struct RealAlloc;

#[global_allocator]
static GLOBAL: RealAlloc = RealAlloc;

unsafe impl GlobalAlloc for RealAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let resolver = INTERCEPTOR.resolver();
        let Some(fns) = resolver.get().or_else(|| resolver.resolve()) else {
            if layout.align() > ARENA_ALIGN {
                return ptr::null_mut();
            }
            return match INTERCEPTOR.arena().allocate(layout.size()) {
                Ok(block) => block.as_ptr(),
                Err(_) => ptr::null_mut(),
            };
        };
        if layout.align() <= MALLOC_ALIGN {
            // SAFETY: the real malloc() accepts any size
            return unsafe { (fns.malloc)(layout.size()) }.cast();
        }
        // posix_memalign() is not intercepted, so this is libc's, and its
        // blocks go back through the real free()
        let mut out: *mut c_void = ptr::null_mut();
        // SAFETY: `out` is valid for a write, the alignment is a power of two
        // and a multiple of the pointer size
        match unsafe { libc::posix_memalign(&mut out, layout.align(), layout.size()) } {
            0 => out.cast(),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        match INTERCEPTOR.resolver().get() {
            // SAFETY: the real calloc() accepts any arguments
            Some(fns) if layout.align() <= MALLOC_ALIGN => unsafe {
                (fns.calloc)(1, layout.size()).cast()
            },
            _ => {
                // SAFETY: same contract as ours
                let block = unsafe { self.alloc(layout) };
                if !block.is_null() {
                    // SAFETY: `block` is valid for `layout.size()` writes
                    unsafe { ptr::write_bytes(block, 0, layout.size()) };
                }
                block
            }
        }
    }

    unsafe fn dealloc(&self, block: *mut u8, _: Layout) {
        let block = block.cast::<c_void>();
        if INTERCEPTOR.arena().contains(block) {
            return;
        }
        if let Some(fns) = INTERCEPTOR.resolver().get() {
            // SAFETY: every non-arena block came from the real allocator
            unsafe { (fns.free)(block) };
        }
    }

    unsafe fn realloc(&self, block: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let in_arena = INTERCEPTOR.arena().contains(block.cast());
        match INTERCEPTOR.resolver().get() {
            Some(fns) if !in_arena && layout.align() <= MALLOC_ALIGN => {
                // SAFETY: `block` came from the real malloc()
                unsafe { (fns.realloc)(block.cast(), new_size).cast() }
            }
            _ => {
                // SAFETY: `new_size` is valid for `layout.align()`, the caller
                // guarantees it
                let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
                // SAFETY: same contract as ours
                let moved = unsafe { self.alloc(new_layout) };
                if !moved.is_null() {
                    // SAFETY: both blocks are valid for the smaller size, and
                    // `moved` is fresh
                    unsafe {
                        ptr::copy_nonoverlapping(block, moved, layout.size().min(new_size));
                        self.dealloc(block, layout);
                    }
                }
                moved
            }
        }
    }
}
