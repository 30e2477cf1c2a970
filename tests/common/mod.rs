//! Fake collaborators for driving an `Interceptor` without preloading
//! anything: libc's own allocator standing in for the "real" one, and a
//! platform with a made-up module map that records what it emits.

#![allow(dead_code)]

use std::{
    ffi::{c_void, CStr},
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use leakcheck::{
    alloc::resolver::{CallocFn, FreeFn, MallocFn, ReallocFn},
    os::Platform,
};

pub const OWN_MODULE: &str = "libleakcheck.so";

/// What a capture returns by default: one frame in this library, then the
/// program, calling through libc back into itself (think `qsort()`)
pub const STACK: [usize; 4] = [0x1010, 0x3030, 0x2020, 0x3040];

/// libc allocating on its own behalf, like stdio's buffer on the first
/// `printf()`
pub const RUNTIME_STACK: [usize; 4] = [0x1010, 0x1020, 0x2020, 0x3030];

/// Platform with a fixed stack and module map: `0x1xxx` is this library,
/// `0x2xxx` libc, `0x3xxx` the program
pub struct Recorder {
    stack: &'static [usize],
    lines: Mutex<Vec<String>>,
    captures: AtomicUsize,
}

impl Recorder {
    pub const fn new() -> Self {
        Self::with_stack(&STACK)
    }

    pub const fn with_stack(stack: &'static [usize]) -> Self {
        Self {
            stack,
            lines: Mutex::new(Vec::new()),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lines_of(&self, kind: &str) -> Vec<String> {
        let tag = format!("{{\"type\":\"{kind}\"");
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(&tag))
            .collect()
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::Relaxed)
    }
}

impl Platform for Recorder {
    fn capture(&self, frames: &mut [usize]) -> usize {
        self.captures.fetch_add(1, Ordering::Relaxed);
        let n = frames.len().min(self.stack.len());
        frames[..n].copy_from_slice(&self.stack[..n]);
        n
    }

    fn module_name(&self, addr: usize) -> Option<&str> {
        match addr >> 12 {
            1 => Some(OWN_MODULE),
            2 => Some("libc.so.6"),
            3 => Some("app"),
            _ => None,
        }
    }

    fn own_module(&self) -> Option<&str> {
        Some(OWN_MODULE)
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8(line.to_vec()).expect("records are utf-8");
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

/// libc's allocator, as the "next" one
pub fn libc_lookup(name: &CStr) -> *mut c_void {
    match name.to_bytes() {
        b"malloc" => libc::malloc as MallocFn as *mut c_void,
        b"free" => libc::free as FreeFn as *mut c_void,
        b"realloc" => libc::realloc as ReallocFn as *mut c_void,
        b"calloc" => libc::calloc as CallocFn as *mut c_void,
        _ => ptr::null_mut(),
    }
}

unsafe extern "C" fn out_of_memory(_: usize) -> *mut c_void {
    ptr::null_mut()
}

unsafe extern "C" fn realloc_out_of_memory(_: *mut c_void, _: usize) -> *mut c_void {
    ptr::null_mut()
}

/// libc's allocator, except that `malloc()` always fails
pub fn failing_malloc_lookup(name: &CStr) -> *mut c_void {
    match name.to_bytes() {
        b"malloc" => out_of_memory as MallocFn as *mut c_void,
        _ => libc_lookup(name),
    }
}

/// libc's allocator, except that `realloc()` always fails
pub fn failing_realloc_lookup(name: &CStr) -> *mut c_void {
    match name.to_bytes() {
        b"realloc" => realloc_out_of_memory as ReallocFn as *mut c_void,
        _ => libc_lookup(name),
    }
}

pub fn hex(ptr: *const c_void) -> String {
    format!("{:#x}", ptr as usize)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
