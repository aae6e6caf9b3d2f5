//! Error taxonomy for aggregator operations.
//!
//! Saturation is deliberately absent: a full shard is a protocol signal
//! (see [`shard::WriteOutcome`]), not a failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Conflicting open flags, or an on-disk format newer than this build
    /// understands.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Opening a missing database without `create_if_missing`.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed metadata, or a failed repair of an interrupted split.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Any underlying file-system failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<shard::ShardError> for Error {
    fn from(e: shard::ShardError) -> Self {
        match e {
            shard::ShardError::Io(io) => Error::Io(io),
            shard::ShardError::Corrupt(msg) => Error::Corruption(msg),
        }
    }
}

impl From<keeper::KeeperError> for Error {
    fn from(e: keeper::KeeperError) -> Self {
        match e {
            keeper::KeeperError::Io(io) => Error::Io(io),
            keeper::KeeperError::Corrupt => Error::Corruption("keeper record".to_string()),
        }
    }
}
