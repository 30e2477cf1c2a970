use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackError {
    /// The real allocation primitive could not be found. Fatal.
    #[error("could not locate the real `{symbol}`")]
    ResolveFailed { symbol: &'static str },
    /// The registry could not grow to hold the record for `addr`
    #[error("no memory for tracking metadata, {addr:#x} is untracked")]
    MetadataExhausted { addr: usize },
    /// The bootstrap arena ran dry while the resolver was still resolving
    #[error("bootstrap arena exhausted ({requested} bytes requested)")]
    ArenaExhausted { requested: usize },
    /// An environment variable held something we could not parse
    #[error("ignoring invalid value of {var}, using the default")]
    InvalidConfig { var: &'static str },
}

pub type Result<T, E = TrackError> = std::result::Result<T, E>;
