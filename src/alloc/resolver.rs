//! Finding the real allocator with `dlsym(RTLD_NEXT)`, which may itself call
//! back into our `malloc()`.

use std::{
    ffi::{c_void, CStr},
    fmt::Write,
    mem,
};

use libc::size_t;

use crate::{
    error::{Result, TrackError},
    lazy_lock::{LazyLock, LazyLockState},
    util::print::{putstr, write_all_raw, StackWriter, DIAGNOSTIC_FD},
};

pub type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;

/// Maps a symbol name to its address, null if there is no such symbol
pub type SymbolLookup = fn(&CStr) -> *mut c_void;

/// The real (non-intercepted) allocation primitives. Calling these never
/// comes back into this library.
#[derive(Clone, Copy, Debug)]
pub struct RealFns {
    pub malloc: MallocFn,
    pub free: FreeFn,
    pub realloc: ReallocFn,
    pub calloc: CallocFn,
}

impl RealFns {
    /// Look up all four primitives through `lookup`
    pub fn lookup(lookup: SymbolLookup) -> Result<Self> {
        // SAFETY: each name is paired with the function type of its C
        // prototype
        unsafe {
            Ok(Self {
                malloc: symbol(lookup, c"malloc")?,
                free: symbol(lookup, c"free")?,
                realloc: symbol(lookup, c"realloc")?,
                calloc: symbol(lookup, c"calloc")?,
            })
        }
    }
}

/// # Safety
///
/// `F` must be the function pointer type of whatever `name` refers to
unsafe fn symbol<F: Copy>(lookup: SymbolLookup, name: &'static CStr) -> Result<F> {
    debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());
    let addr = lookup(name);
    if addr.is_null() {
        return Err(TrackError::ResolveFailed {
            symbol: name.to_str().unwrap_or("?"),
        });
    }
    // SAFETY: non-null, and the caller vouches for the type
    Ok(unsafe { mem::transmute_copy::<*mut c_void, F>(&addr) })
}

/// The next definition of `name` after this library, i.e. the one we shadow
pub fn next_symbol(name: &CStr) -> *mut c_void {
    // SAFETY: `name` is NUL-terminated, RTLD_NEXT is always a valid handle
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
}

/// Process-wide `uninitialized -> resolving -> resolved` state machine
/// around [`RealFns`].
pub struct Resolver {
    fns: LazyLock<RealFns>,
    lookup: SymbolLookup,
}

impl Resolver {
    pub const fn new(lookup: SymbolLookup) -> Self {
        Self {
            fns: LazyLock::new(),
            lookup,
        }
    }

    pub fn state(&self) -> LazyLockState {
        self.fns.state()
    }

    /// The real primitives, if resolution already finished
    pub fn get(&self) -> Option<&RealFns> {
        self.fns.get()
    }

    /// The real primitives, resolving them if nobody has yet. `None` means a
    /// resolution is in flight, possibly further up this very thread's stack.
    ///
    /// Failing to find them is fatal: there is no sane way to keep going.
    pub fn resolve(&self) -> Option<&RealFns> {
        self.fns
            .initialize(|| match RealFns::lookup(self.lookup) {
                Ok(fns) => fns,
                Err(err) => fatal(err),
            })
            .ok()
    }
}

#[cold]
fn fatal(err: TrackError) -> ! {
    let mut buf = [0u8; 128];
    let mut w = StackWriter::new(&mut buf);
    let _ = write!(w, "[leakcheck] fatal: {err}");
    write_all_raw(DIAGNOSTIC_FD, w.line());
    putstr("[leakcheck] cannot continue without the real allocator, aborting\n");
    // SAFETY: abort() has no preconditions and never returns
    unsafe { libc::abort() }
}
