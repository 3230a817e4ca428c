//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Reads after which an entry is evicted, None = unlimited
    pub access_ceiling: Option<u64>,
    /// Worker threads of the shared sweep timer runtime
    pub timer_threads: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SLIDECACHE_ACCESS_CEILING` - Access-count ceiling for new buckets (default: unset)
    /// - `SLIDECACHE_TIMER_THREADS` - Timer runtime worker threads (default: 1)
    ///
    /// Zero or unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self {
            access_ceiling: env::var("SLIDECACHE_ACCESS_CEILING")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &u64| n > 0),
            timer_threads: env::var("SLIDECACHE_TIMER_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_ceiling: None,
            timer_threads: 1,
        }
    }
}
