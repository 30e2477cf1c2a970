use std::ffi::{c_int, c_void};

extern "C" {
    /// glibc's `<execinfo.h>` unwinder. The first call loads the unwinder's
    /// support library, which allocates.
    fn backtrace(buffer: *mut *mut c_void, size: c_int) -> c_int;
}

/// Capture the calling thread's return addresses into `frames`, innermost
/// first. Returns how many frames were written.
pub fn capture(frames: &mut [usize]) -> usize {
    let size = c_int::try_from(frames.len()).unwrap_or(c_int::MAX);
    // SAFETY: `usize` and `*mut c_void` have the same layout, and `frames`
    // is valid for `size` writes
    let n = unsafe { backtrace(frames.as_mut_ptr().cast(), size) };
    usize::try_from(n).unwrap_or(0)
}
