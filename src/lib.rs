//! slidecache - An embeddable key/value cache with sliding TTL
//!
//! Values live in named buckets. Every read slides an entry's expiry window
//! forward, and each bucket evicts due entries on its own timer.

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod tasks;

pub use cache::{Bucket, BucketStats, Entry};
pub use config::Config;
pub use error::{CacheError, Result};
pub use registry::{discard, open, open_with_ceiling, open_with_config};
pub use tasks::configure_timer_runtime;
