use std::error::Error;
use std::fmt::{self, Display};

/// Typed errors returned by page store backends.
#[derive(Debug)]
pub enum StoreError {
    /// No connection could be checked out of the pool.
    Pool(String),
    /// The store rejected or failed a command.
    Command(String),
    /// A payload could not be encoded.
    Codec(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Pool(s) => write!(f, "store pool error: {}", s),
            StoreError::Command(s) => write!(f, "store command failed: {}", s),
            StoreError::Codec(s) => write!(f, "payload codec error: {}", s),
        }
    }
}

impl Error for StoreError {}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for StoreError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        StoreError::Command(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}
