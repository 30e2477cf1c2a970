//! Output that never touches the allocator. Everything in here may be called
//! from inside `malloc()` itself, so no `std::io`, no `format!()`, no locks.

use std::{
    fmt::{self, Write},
    io,
};

use libc::c_int;
use log::{LevelFilter, Log, Metadata, Record};

/// The diagnostic stream. Distinct from whatever the host writes to stdout.
pub const DIAGNOSTIC_FD: c_int = libc::STDERR_FILENO;

/// `write(2)` all of `bytes` to `fd`, retrying on `EINTR`. Anything else is
/// dropped on the floor -- there is nobody to report a failed report to.
pub fn write_all_raw(fd: c_int, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is a live slice, valid for `bytes.len()` reads
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return;
        }
        if n == 0 {
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

/// `puts`... but to the diagnostic stream, and doesn't use the allocator
pub fn putstr(s: &str) {
    write_all_raw(DIAGNOSTIC_FD, s.as_bytes());
}

/// A `fmt::Write` over a fixed buffer. Output past the end is cut off, and
/// [`StackWriter::line()`] marks the cut with `...`.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            truncated: false,
        }
    }

    /// Terminate the text with `\n`, overwriting the last byte if full
    pub fn line(&mut self) -> &[u8] {
        const CUT: &[u8] = b"...\n";
        if self.buf.is_empty() {
            return &[];
        }
        if self.truncated && self.buf.len() >= CUT.len() {
            let at = self.buf.len() - CUT.len();
            self.buf[at..].copy_from_slice(CUT);
            self.len = self.buf.len();
            return &self.buf[..];
        }
        if self.len == self.buf.len() {
            self.len -= 1;
        }
        self.buf[self.len] = b'\n';
        self.len += 1;
        &self.buf[..self.len]
    }
}

impl Write for StackWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

/// Longest log line we bother emitting
const LOG_LINE_BYTES: usize = 512;

/// A [`log::Log`] that formats into a stack buffer and `write(2)`s it. Safe
/// to use from inside the allocation hooks.
pub struct RawLogger;

pub static LOGGER: RawLogger = RawLogger;

impl Log for RawLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut buf = [0u8; LOG_LINE_BYTES];
        let mut w = StackWriter::new(&mut buf);
        let _ = write!(
            w,
            "[leakcheck] {:<5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        write_all_raw(DIAGNOSTIC_FD, w.line());
    }

    fn flush(&self) {}
}

/// Install [`LOGGER`] as the `log` backend. If something else got there
/// first we only adjust the level.
pub fn install(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_writer_truncates_and_keeps_newline() {
        let mut buf = [0u8; 8];
        let mut w = StackWriter::new(&mut buf);
        let _ = write!(w, "{}", "0123456789");
        assert_eq!(w.line(), b"0123...\n");
    }

    #[test]
    fn tiny_buffers_still_end_in_a_newline() {
        let mut buf = [0u8; 2];
        let mut w = StackWriter::new(&mut buf);
        let _ = write!(w, "abc");
        assert_eq!(w.line(), b"a\n");
    }

    #[test]
    fn stack_writer_formats_in_place() {
        let mut buf = [0u8; 32];
        let mut w = StackWriter::new(&mut buf);
        let _ = write!(w, "{} + {} = {}", 1, 2, 3);
        assert_eq!(w.line(), b"1 + 2 = 3\n");
    }

    #[test]
    fn write_all_raw_to_a_pipe() {
        let mut fds = [0 as c_int; 2];
        // SAFETY: `fds` has room for the two descriptors
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        write_all_raw(fds[1], b"hello\n");
        let mut out = [0u8; 6];
        // SAFETY: `out` is valid for 6 writes
        let n = unsafe { libc::read(fds[0], out.as_mut_ptr().cast(), out.len()) };
        assert_eq!(n, 6);
        assert_eq!(&out, b"hello\n");
        // SAFETY: both descriptors came from pipe() above
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
