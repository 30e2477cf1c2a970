//! | Variable                | Values                                     | Default |
//! |-------------------------|--------------------------------------------|---------|
//! | `LEAKCHECK_STACKS`      | `0`/`false`/`off` disables stack capture   | on      |
//! | `LEAKCHECK_FULL_STACK`  | `1`/`true`/`on` reports every frame        | clean   |
//! | `LEAKCHECK_STACK_DEPTH` | frames captured per allocation, `1..=32`   | 16      |
//! | `LEAKCHECK_LOG`         | `off`/`error`/`warn`/`info`/`debug`/`trace` | `warn`  |

use std::ffi::CStr;

use log::LevelFilter;

use crate::error::TrackError;

/// Hard ceiling on captured frames per allocation
pub const MAX_STACK_DEPTH: usize = 32;
pub const DEFAULT_STACK_DEPTH: usize = 16;

pub const STACKS_VAR: &CStr = c"LEAKCHECK_STACKS";
pub const FULL_STACK_VAR: &CStr = c"LEAKCHECK_FULL_STACK";
pub const STACK_DEPTH_VAR: &CStr = c"LEAKCHECK_STACK_DEPTH";
pub const LOG_VAR: &CStr = c"LEAKCHECK_LOG";

/// Which frames make it into reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackMode {
    /// Only frames from user code: this library and the platform runtime
    /// (libc, the dynamic loader, ...) are left out
    Clean,
    /// Every captured frame
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub capture_stacks: bool,
    pub stack_mode: StackMode,
    /// Always within `1..=MAX_STACK_DEPTH`
    pub stack_depth: usize,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_stacks: true,
            stack_mode: StackMode::Clean,
            stack_depth: DEFAULT_STACK_DEPTH,
            log_level: LevelFilter::Warn,
        }
    }
}

/// Variables that held garbage. Fixed capacity, one slot per variable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    vars: [Option<&'static str>; 4],
}

impl Rejected {
    fn push(&mut self, var: &'static CStr) {
        let name = var.to_str().unwrap_or("?");
        if let Some(slot) = self.vars.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vars.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackError> + '_ {
        self.vars
            .iter()
            .flatten()
            .map(|&var| TrackError::InvalidConfig { var })
    }
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> (Self, Rejected) {
        Self::from_lookup(getenv)
    }

    /// Build a configuration from `lookup`, which maps a variable name to its
    /// value. Unparseable values keep their default and are reported back.
    pub fn from_lookup<'a, L>(lookup: L) -> (Self, Rejected)
    where
        L: Fn(&CStr) -> Option<&'a str>,
    {
        let mut config = Self::default();
        let mut rejected = Rejected::default();

        if let Some(value) = lookup(STACKS_VAR) {
            match parse_flag(value) {
                Some(on) => config.capture_stacks = on,
                None => rejected.push(STACKS_VAR),
            }
        }
        if let Some(value) = lookup(FULL_STACK_VAR) {
            match parse_flag(value) {
                Some(true) => config.stack_mode = StackMode::Full,
                Some(false) => config.stack_mode = StackMode::Clean,
                None => rejected.push(FULL_STACK_VAR),
            }
        }
        if let Some(value) = lookup(STACK_DEPTH_VAR) {
            match value.trim().parse::<usize>() {
                Ok(depth) => config.stack_depth = depth.clamp(1, MAX_STACK_DEPTH),
                Err(_) => rejected.push(STACK_DEPTH_VAR),
            }
        }
        if let Some(value) = lookup(LOG_VAR) {
            match value.trim().parse::<LevelFilter>() {
                Ok(level) => config.log_level = level,
                Err(_) => rejected.push(LOG_VAR),
            }
        }

        (config, rejected)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    const ON: [&str; 4] = ["1", "true", "on", "yes"];
    const OFF: [&str; 4] = ["0", "false", "off", "no"];
    if ON.iter().any(|on| value.eq_ignore_ascii_case(on)) {
        Some(true)
    } else if OFF.iter().any(|off| value.eq_ignore_ascii_case(off)) {
        Some(false)
    } else {
        None
    }
}

fn getenv(name: &CStr) -> Option<&'static str> {
    // SAFETY: `name` is NUL-terminated. The returned pointer stays valid until
    // somebody calls setenv() on the same name, and we copy out of it before
    // returning control to the host.
    let value = unsafe { libc::getenv(name.as_ptr()) };
    if value.is_null() {
        return None;
    }
    // SAFETY: non-null getenv() results are NUL-terminated strings
    unsafe { CStr::from_ptr(value) }.to_str().ok()
}
