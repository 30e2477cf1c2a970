//! The platform's introspection facilities, behind one trait so that the
//! tracking logic can be driven with synthetic stacks and module maps.

pub mod backtrace;
pub mod module;

use crate::util::print::{write_all_raw, DIAGNOSTIC_FD};

/// What the tracker needs from the platform, besides the allocator itself
pub trait Platform: Sync {
    /// Fill `frames` with the calling thread's return addresses, innermost
    /// first, returning how many were written
    fn capture(&self, frames: &mut [usize]) -> usize;

    /// Filename of the loaded module containing `addr`
    fn module_name(&self, addr: usize) -> Option<&str>;

    /// Filename of the module this library was loaded from
    fn own_module(&self) -> Option<&str>;

    /// Write one complete, newline-terminated diagnostic record
    fn emit(&self, line: &[u8]);
}

/// The real thing: `backtrace()`, `dladdr()` and `write(2)` to stderr
#[derive(Clone, Copy, Debug, Default)]
pub struct Native;

impl Platform for Native {
    fn capture(&self, frames: &mut [usize]) -> usize {
        backtrace::capture(frames)
    }

    fn module_name(&self, addr: usize) -> Option<&str> {
        module::containing(addr)
    }

    fn own_module(&self) -> Option<&str> {
        module::own()
    }

    fn emit(&self, line: &[u8]) {
        write_all_raw(DIAGNOSTIC_FD, line);
    }
}
