use thiserror::Error;

/// Returned by every blocking wait once the run context has been cancelled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("relay run was cancelled")]
pub struct Cancelled;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload of {len} bytes exceeds the {max} byte slot size")]
    TooLarge { len: usize, max: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one destination address must be given")]
    NoDestinations,
    #[error("listening port {0} is outside 1..=65534")]
    InvalidPort(u16),
    #[error("ring capacity must be at least one slot")]
    ZeroCapacity,
}
