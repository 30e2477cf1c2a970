//! `malloc()` and friends, with tracking. The exported hooks in `externc`
//! just call through to here.

use std::{
    cell::Cell,
    ffi::{c_int, c_void},
    ptr,
    sync::atomic::{AtomicBool, Ordering},
};

use once_cell::sync::OnceCell;

use crate::{
    alloc::{
        arena::BumpArena,
        detector::{self, Verdict},
        record::{AllocationRecord, StackTrace},
        registry::Registry,
        resolver::{RealFns, Resolver, SymbolLookup},
    },
    config::{Config, MAX_STACK_DEPTH},
    os::Platform,
    report::{
        self,
        leak::{self, LeakSummary},
    },
};

thread_local! {
    /// Set while this thread is inside a hook
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Marks this thread as inside a hook until dropped. A guard entered while
/// another is alive on the same thread is `nested`.
struct HookGuard {
    nested: bool,
}

impl HookGuard {
    fn enter() -> Self {
        // TLS that is already torn down counts as nested: capture nothing
        let nested = IN_HOOK.try_with(|flag| flag.replace(true)).unwrap_or(true);
        Self { nested }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if !self.nested {
            let _ = IN_HOOK.try_with(|flag| flag.set(false));
        }
    }
}

/// What became of a `free()`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeOutcome {
    /// `free(NULL)`
    Null,
    /// A bootstrap arena block; ignored
    Bootstrap,
    /// Forwarded to the real `free()`
    Released,
    /// Not live: reported as corruption, not forwarded
    Suppressed,
    /// Arrived mid-resolution for a non-arena pointer; nothing to forward to
    Unresolved,
}

enum Entry<'a> {
    Ready { fns: &'a RealFns, suspicious: bool },
    Bootstrapping,
}

pub struct Interceptor<P> {
    resolver: Resolver,
    arena: BumpArena,
    registry: Registry,
    config: OnceCell<Config>,
    load_config: fn() -> Config,
    /// Set by the exit sweep; from then on calls pass straight through
    finished: AtomicBool,
    platform: P,
}

impl<P> Interceptor<P> {
    pub const fn new(lookup: SymbolLookup, load_config: fn() -> Config, platform: P) -> Self {
        Self {
            resolver: Resolver::new(lookup),
            arena: BumpArena::new(),
            registry: Registry::new(),
            config: OnceCell::new(),
            load_config,
            finished: AtomicBool::new(false),
            platform,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn arena(&self) -> &BumpArena {
        &self.arena
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &Config {
        self.config.get_or_init(self.load_config)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Is `ptr` currently tracked as live?
    pub fn is_tracked(&self, ptr: *const c_void) -> bool {
        self.registry.find(ptr as usize)
    }
}

impl<P> Interceptor<P>
where
    P: Platform,
{
    /// Load the configuration and resolve the real primitives now, rather
    /// than on the first call. Idempotent.
    pub fn initialize(&self) {
        let config = self.config();
        if self.resolver.resolve().is_some() {
            log::debug!(
                "real allocator resolved, bootstrap arena used {} of {} bytes, {config:?}",
                self.arena.used(),
                self.arena.capacity()
            );
        }
    }

    fn enter(&self) -> Entry<'_> {
        if let Some(fns) = self.resolver.get() {
            return Entry::Ready {
                fns,
                suspicious: false,
            };
        }
        // Whoever gets here first triggers the lookup, and its own allocation
        // is as much the bootstrap's as the loader's are
        match self.resolver.resolve() {
            Some(fns) => Entry::Ready {
                fns,
                suspicious: true,
            },
            None => Entry::Bootstrapping,
        }
    }

    /// `malloc(size)`
    pub fn allocate(&self, size: usize) -> *mut c_void {
        let (fns, suspicious) = match self.enter() {
            Entry::Ready { fns, suspicious } => (fns, suspicious),
            Entry::Bootstrapping => return self.bootstrap_allocate(size),
        };
        // SAFETY: the real malloc() accepts any size
        let ptr = unsafe { (fns.malloc)(size) };
        if !ptr.is_null() {
            self.track(ptr, size, suspicious);
        }
        ptr
    }

    /// `calloc(count, size)`
    pub fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void {
        let Some(total) = count.checked_mul(size) else {
            set_errno(libc::ENOMEM);
            return ptr::null_mut();
        };
        let (fns, suspicious) = match self.enter() {
            Entry::Ready { fns, suspicious } => (fns, suspicious),
            // arena blocks are never reused, so they are still zeroed
            Entry::Bootstrapping => return self.bootstrap_allocate(total),
        };
        // SAFETY: the real calloc() accepts any arguments
        let ptr = unsafe { (fns.calloc)(count, size) };
        if !ptr.is_null() {
            self.track(ptr, total, suspicious);
        }
        ptr
    }

    /// `free(ptr)`
    ///
    /// # Safety
    ///
    /// Same as `free()`, except that a `ptr` we don't track as live is never
    /// dereferenced or forwarded (until [`Interceptor::finish()`] has run).
    pub unsafe fn deallocate(&self, ptr: *mut c_void) -> FreeOutcome {
        if ptr.is_null() {
            return FreeOutcome::Null;
        }
        let fns = match self.enter() {
            Entry::Ready { fns, .. } => fns,
            Entry::Bootstrapping if self.arena.contains(ptr) => return FreeOutcome::Bootstrap,
            Entry::Bootstrapping => return FreeOutcome::Unresolved,
        };
        match detector::inspect(&self.arena, &self.registry, ptr) {
            Verdict::Bootstrap => FreeOutcome::Bootstrap,
            Verdict::Live(record) => {
                // SAFETY: `ptr` came from the real allocator and was live
                // until the detector took its record
                unsafe { (fns.free)(ptr) };
                drop(record);
                FreeOutcome::Released
            }
            Verdict::Corrupt if self.is_finished() => {
                // SAFETY: the registry was swept at exit, from here on the
                // host's frees are its own business
                unsafe { (fns.free)(ptr) };
                FreeOutcome::Released
            }
            Verdict::Corrupt => {
                self.report_corruption(ptr as usize);
                FreeOutcome::Suppressed
            }
        }
    }

    /// `realloc(ptr, size)`
    ///
    /// The record for the result is created fresh: its stack is the
    /// `realloc()` call site, not the original allocation's.
    ///
    /// # Safety
    ///
    /// Same as `realloc()`, except that a `ptr` we don't track as live is
    /// reported and never forwarded (until [`Interceptor::finish()`] has run).
    pub unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.allocate(size);
        }
        if size == 0 {
            // SAFETY: same contract as ours
            unsafe { self.deallocate(ptr) };
            return ptr::null_mut();
        }
        let (fns, suspicious) = match self.enter() {
            Entry::Ready { fns, suspicious } => (fns, suspicious),
            // SAFETY: same contract as ours
            Entry::Bootstrapping => return unsafe { self.regrow_arena_block(ptr, size) },
        };
        if self.arena.contains(ptr) {
            // SAFETY: same contract as ours
            return unsafe { self.regrow_arena_block(ptr, size) };
        }
        if self.is_finished() {
            // SAFETY: passing through, see `deallocate()`
            return unsafe { (fns.realloc)(ptr, size) };
        }

        // Take the old record out *before* the real realloc() releases the
        // address, or another thread could be handed it and have its fresh
        // record removed in our place
        let Some(old) = self.registry.remove(ptr as usize) else {
            self.report_corruption(ptr as usize);
            return ptr::null_mut();
        };
        // SAFETY: `ptr` is live, we had its record
        let moved = unsafe { (fns.realloc)(ptr, size) };
        if moved.is_null() {
            // `ptr` is untouched, and so is its record
            if let Err(err) = self.registry.add(old) {
                log::warn!("{err}");
            }
            return moved;
        }
        drop(old);
        self.track(moved, size, suspicious);
        moved
    }

    /// Exit-time sweep: report everything still live, then step aside. Only
    /// the first call reports anything.
    ///
    /// The process must be effectively single-threaded by now: nobody else
    /// may still be allocating.
    pub fn finish(&self) -> Option<LeakSummary> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return None;
        }
        let _guard = HookGuard::enter();
        let leaks = self.registry.sweep();
        Some(leak::report(&self.platform, self.config(), &leaks))
    }

    fn bootstrap_allocate(&self, size: usize) -> *mut c_void {
        match self.arena.allocate(size) {
            Ok(ptr) => ptr.as_ptr().cast(),
            Err(err) => {
                log::warn!("{err}");
                set_errno(libc::ENOMEM);
                ptr::null_mut()
            }
        }
    }

    /// `realloc()` of an arena block: a fresh block (from the arena while
    /// still bootstrapping, tracked afterwards) with the old contents. The
    /// old block stays where it is.
    ///
    /// # Safety
    ///
    /// `ptr` must not be null
    unsafe fn regrow_arena_block(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        if !self.arena.contains(ptr) {
            // not ours, and no real realloc() to hand it to yet
            return ptr::null_mut();
        }
        let new = self.allocate(size);
        if !new.is_null() {
            // SAFETY: `ptr` is an arena block start (nobody else could have
            // gotten an arena address), valid for its recorded size; `new` is
            // valid for `size` bytes, and fresh, so they don't overlap
            unsafe {
                let old = self.arena.block_size(ptr);
                ptr::copy_nonoverlapping(ptr.cast::<u8>(), new.cast::<u8>(), old.min(size));
            }
        }
        new
    }

    /// Capture the caller's stack into `frames`. Nested hook calls capture
    /// nothing: the unwinder itself allocates the first time round, and must
    /// not be re-entered.
    fn capture(&self, guard: &HookGuard, frames: &mut [usize; MAX_STACK_DEPTH]) -> usize {
        if guard.nested {
            return 0;
        }
        let depth = self.config().stack_depth.min(MAX_STACK_DEPTH);
        self.platform.capture(&mut frames[..depth])
    }

    /// Record `ptr` as live. The stack is walked even with capture turned off,
    /// to tell the runtime's own allocations from the host's; it is only kept
    /// if capture is on.
    fn track(&self, ptr: *mut c_void, size: usize, suspicious: bool) {
        if self.is_finished() {
            return;
        }
        let guard = HookGuard::enter();
        let mut frames = [0usize; MAX_STACK_DEPTH];
        let depth = self.capture(&guard, &mut frames);
        let stack = &frames[..depth];

        // nested calls come from the unwinder or the loader, never the host
        let suspicious =
            suspicious || guard.nested || report::allocated_by_runtime(&self.platform, stack);
        let kept: &[usize] = if self.config().capture_stacks { stack } else { &[] };
        let record =
            AllocationRecord::new(ptr as usize, size, suspicious, StackTrace::copy_from(kept));
        if let Err(err) = self.registry.add(record) {
            log::warn!("{err}");
        }
    }

    fn report_corruption(&self, addr: usize) {
        let guard = HookGuard::enter();
        let mut frames = [0usize; MAX_STACK_DEPTH];
        let depth = if self.config().capture_stacks {
            self.capture(&guard, &mut frames)
        } else {
            0
        };
        detector::report(&self.platform, self.config(), addr, &frames[..depth]);
    }
}

fn set_errno(errno: c_int) {
    // SAFETY: __errno_location() always points at this thread's errno
    unsafe { *libc::__errno_location() = errno };
}
