//! A leak and double-free checker for unmodified programs.
//!
//! ```sh
//! cargo build --release --features preload
//! LD_PRELOAD=target/release/libleakcheck.so ./some-program 2> report.jsonl
//! ```
//!
//! Without `preload`, nothing is hooked up and
//! [`alloc::interceptor::Interceptor`] can be driven directly.

pub mod alloc;
pub mod config;
pub mod error;
#[cfg(feature = "preload")]
pub mod externc;
pub mod lazy_lock;
pub mod os;
pub mod report;
pub mod serialize;
pub mod util;
