//! Which loaded module does an address belong to? Only the module: turning
//! addresses into file/line is left to the out-of-process symbolizer.

use std::{ffi::CStr, mem::MaybeUninit};

/// Basename of the module containing `addr`, per `dladdr()`
pub fn containing(addr: usize) -> Option<&'static str> {
    let mut info = MaybeUninit::<libc::Dl_info>::uninit();
    // SAFETY: dladdr() only inspects the loader's module list and writes
    // `info` on success; `addr` is never dereferenced
    if unsafe { libc::dladdr(addr as *const libc::c_void, info.as_mut_ptr()) } == 0 {
        return None;
    }
    // SAFETY: a non-zero return means `info` was filled in
    let info = unsafe { info.assume_init() };
    if info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: `dli_fname` points into the loader's link map, which lives as
    // long as the module stays loaded, and we never unload anything
    let path = unsafe { CStr::from_ptr(info.dli_fname) }.to_str().ok()?;
    Some(basename(path))
}

/// Basename of the module this library lives in
pub fn own() -> Option<&'static str> {
    containing(own as *const () as usize)
}

/// Everything after the last `/`
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}
