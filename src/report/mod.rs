//! The diagnostic stream: one JSON record per line, each written with a
//! single `write(2)` from a stack buffer.

pub mod leak;

use std::io::{Cursor, Write};

use serde::Serialize;

use crate::{config::StackMode, os::Platform, serialize::hex_addr};

/// Frames shown per record, innermost first
pub const REPORT_FRAMES: usize = 7;
/// Longest record we can emit
pub const LINE_BYTES: usize = 4096;
/// `bin` of a frame whose module can't be determined
pub const UNKNOWN_MODULE: &str = "unknown";

/// Module name prefixes of the platform runtime, hidden in clean stacks
const RUNTIME_MODULES: &[&str] = &[
    "libc.so",
    "libc-",
    "libpthread",
    "ld-linux",
    "ld-musl",
    "libdl",
    "libm.so",
    "libm-",
    "libgcc_s",
];

pub fn is_runtime_module(name: &str) -> bool {
    RUNTIME_MODULES.iter().any(|prefix| name.starts_with(prefix))
}

/// Was this allocation made by the runtime on its own behalf, like stdio's
/// lazily allocated buffers? That is, is the innermost frame of `stack`
/// outside this library in a runtime module?
pub fn allocated_by_runtime<P>(platform: &P, stack: &[usize]) -> bool
where
    P: Platform,
{
    let own = platform.own_module();
    stack
        .iter()
        .map(|&addr| platform.module_name(addr))
        .find(|&bin| bin.is_none() || bin != own)
        .flatten()
        .is_some_and(is_runtime_module)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Frame<'a> {
    #[serde(with = "hex_addr")]
    pub addr: usize,
    pub bin: &'a str,
}

/// Up to [`REPORT_FRAMES`] frames, on the stack
#[derive(Clone, Copy, Debug)]
pub struct Frames<'a> {
    buf: [Frame<'a>; REPORT_FRAMES],
    len: usize,
}

impl<'a> Frames<'a> {
    pub const fn new() -> Self {
        Self {
            buf: [Frame {
                addr: 0,
                bin: UNKNOWN_MODULE,
            }; REPORT_FRAMES],
            len: 0,
        }
    }

    /// Pick the frames of `stack` worth showing: the innermost
    /// [`REPORT_FRAMES`], after dropping this library's and the runtime's own
    /// frames in [`StackMode::Clean`]
    pub fn collect<P>(platform: &'a P, mode: StackMode, stack: &[usize]) -> Self
    where
        P: Platform,
    {
        let own = platform.own_module();
        let mut frames = Self::new();
        for &addr in stack {
            if frames.len == REPORT_FRAMES {
                break;
            }
            let bin = platform.module_name(addr);
            if mode == StackMode::Clean {
                if let Some(bin) = bin {
                    if Some(bin) == own || is_runtime_module(bin) {
                        continue;
                    }
                }
            }
            frames.buf[frames.len] = Frame {
                addr,
                bin: bin.unwrap_or(UNKNOWN_MODULE),
            };
            frames.len += 1;
        }
        frames
    }

    pub fn as_slice(&self) -> &[Frame<'a>] {
        &self.buf[..self.len]
    }
}

impl Default for Frames<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record<'a> {
    Header {
        leaks_count: usize,
        total_bytes: usize,
    },
    Leak {
        #[serde(with = "hex_addr")]
        addr: usize,
        size: usize,
        frames: &'a [Frame<'a>],
    },
    Summary {
        real_leaks: usize,
        real_bytes: usize,
        libc_leaks: usize,
        libc_bytes: usize,
    },
    Corruption {
        #[serde(with = "hex_addr")]
        addr: usize,
        frames: &'a [Frame<'a>],
    },
}

impl Record<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Header { .. } => "header",
            Self::Leak { .. } => "leak",
            Self::Summary { .. } => "summary",
            Self::Corruption { .. } => "corruption",
        }
    }
}

/// Serialize `record` as one JSON line into `buf`
pub fn encode<'b>(record: &Record<'_>, buf: &'b mut [u8]) -> serde_json::Result<&'b [u8]> {
    let len = {
        let mut cursor = Cursor::new(&mut *buf);
        serde_json::to_writer(&mut cursor, record)?;
        cursor.write_all(b"\n").map_err(serde_json::Error::io)?;
        cursor.position() as usize
    };
    Ok(&buf[..len])
}

/// Encode `record` and hand it to the platform's diagnostic stream
pub fn emit<P>(platform: &P, record: &Record<'_>)
where
    P: Platform,
{
    let mut buf = [0u8; LINE_BYTES];
    match encode(record, &mut buf) {
        Ok(line) => platform.emit(line),
        Err(err) => log::warn!("dropping {} record: {err}", record.kind()),
    }
}
