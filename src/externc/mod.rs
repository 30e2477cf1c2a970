use std::ffi::c_void;

use libc::size_t;

use crate::{
    alloc::{interceptor::Interceptor, resolver::next_symbol},
    config::Config,
    os::Native,
    util::print,
};

pub static INTERCEPTOR: Interceptor<Native> = Interceptor::new(next_symbol, load_config, Native);

/// Read the environment, and bring up logging to match
fn load_config() -> Config {
    let (config, rejected) = Config::from_env();
    print::install(config.log_level);
    for err in rejected.iter() {
        log::warn!("{err}");
    }
    config
}

#[no_mangle]
pub extern "C" fn malloc(size: size_t) -> *mut c_void {
    INTERCEPTOR.allocate(size)
}

/// # Safety
///
/// See `free(3)`
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    // SAFETY: same contract as ours
    unsafe { INTERCEPTOR.deallocate(ptr) };
}

/// # Safety
///
/// See `realloc(3)`
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    // SAFETY: same contract as ours
    unsafe { INTERCEPTOR.reallocate(ptr, size) }
}

#[no_mangle]
pub extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    INTERCEPTOR.zero_allocate(count, size)
}

extern "C" fn on_load() {
    INTERCEPTOR.initialize();
}

extern "C" fn on_unload() {
    INTERCEPTOR.finish();
}

#[used]
#[link_section = ".init_array"]
static ON_LOAD: extern "C" fn() = on_load;

#[used]
#[link_section = ".fini_array"]
static ON_UNLOAD: extern "C" fn() = on_unload;
