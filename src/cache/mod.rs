//! Cache Module
//!
//! Provides the bucket container with sliding TTL expiration and its building
//! blocks.

mod bucket;
mod entry;
mod expiry;
mod stats;


// Re-export public types
pub use bucket::{Bucket, DataLoader, EntryHook};
pub use entry::Entry;
pub use expiry::{ExpirationHandle, ExpirationQueue};
pub use stats::BucketStats;
