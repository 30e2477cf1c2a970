pub mod arena;
pub mod detector;
#[cfg(feature = "preload")]
pub mod global;
pub mod interceptor;
pub mod record;
pub mod registry;
pub mod resolver;
