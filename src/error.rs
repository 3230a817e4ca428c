//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Lookup failures reported by a bucket.
///
/// Writes are infallible, so these are the only kinds a caller ever sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key is absent and no loader was consulted
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key is absent and the configured loader had no value for it
    #[error("Key not found and not loadable: {0}")]
    NotFoundOrLoadable(String),
}

impl CacheError {
    /// Returns the key the failed operation was about.
    pub fn key(&self) -> &str {
        match self {
            CacheError::NotFound(key) | CacheError::NotFoundOrLoadable(key) => key,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache lookups.
pub type Result<T> = std::result::Result<T, CacheError>;
