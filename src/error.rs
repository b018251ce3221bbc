//! Error types for the balancer.
//!
//! Only configuration and construction problems surface as errors. Broken
//! bookkeeping (bad shard ids, non-adjacent merges, degenerate divides) is a
//! caller bug and panics at the point of detection.

use crate::types::Key;
use thiserror::Error;

/// Result type alias for balancer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the balancer.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The key universe is empty or inverted.
    #[error("invalid key range: [{lb}, {ub})")]
    InvalidKeyRange { lb: Key, ub: Key },

    /// The initial even split would produce shards below the minimum size.
    #[error("initial shard size {shard_size} is below the minimum shard size {min_shard_size}")]
    ShardTooSmall { shard_size: u64, min_shard_size: u64 },

    /// Transfer batch encoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The runtime has already been shut down.
    #[error("balancer is shutting down")]
    ShuttingDown,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
