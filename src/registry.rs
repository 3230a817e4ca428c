//! Bucket Registry
//!
//! Process-wide map from bucket name to bucket.
//!
//! Buckets are registered on the first `open` of a name and live until the
//! process exits or they are [`discard`]ed. Entries are keyed by name *and*
//! value type, so `open::<String>("a")` and `open::<u64>("a")` are two
//! independent buckets.
//!
//! The registry lock is never held while a bucket lock is taken.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::Bucket;
use crate::config::Config;

type RegistryKey = (String, TypeId);
type Registered = Arc<dyn Any + Send + Sync>;

static REGISTRY: OnceLock<RwLock<HashMap<RegistryKey, Registered>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<RegistryKey, Registered>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn registry_key<V: 'static>(name: &str) -> RegistryKey {
    (name.to_string(), TypeId::of::<V>())
}

fn downcast<V>(registered: Registered) -> Option<Arc<Bucket<V>>>
where
    V: Clone + Send + Sync + 'static,
{
    registered.downcast::<Bucket<V>>().ok()
}

// == Open ==
/// Returns the bucket registered under `name`, creating it if needed.
pub fn open<V>(name: &str) -> Arc<Bucket<V>>
where
    V: Clone + Send + Sync + 'static,
{
    open_with_ceiling(name, None)
}

/// Like [`open`], but a newly created bucket gets `ceiling` as its access
/// ceiling. The ceiling is ignored if the bucket already exists.
pub fn open_with_ceiling<V>(name: &str, ceiling: Option<u64>) -> Arc<Bucket<V>>
where
    V: Clone + Send + Sync + 'static,
{
    let key = registry_key::<V>(name);

    let existing = registry().read().get(&key).cloned();
    if let Some(bucket) = existing.and_then(downcast::<V>) {
        return bucket;
    }

    let mut buckets = registry().write();
    // Another thread may have created it between the two locks
    if let Some(bucket) = buckets.get(&key).cloned().and_then(downcast::<V>) {
        return bucket;
    }
    let bucket = Bucket::with_access_ceiling(name, ceiling);
    buckets.insert(key, bucket.clone());
    debug!(bucket = name, "Registered bucket");
    bucket
}

/// Like [`open`], taking creation parameters from `config`.
pub fn open_with_config<V>(name: &str, config: &Config) -> Arc<Bucket<V>>
where
    V: Clone + Send + Sync + 'static,
{
    open_with_ceiling(name, config.access_ceiling)
}

// == Discard ==
/// Unregisters the bucket under `name` and flushes it.
///
/// Holders of the returned handle (or earlier clones) keep a working but
/// unregistered bucket; the next `open` of the name creates a fresh one.
pub fn discard<V>(name: &str) -> Option<Arc<Bucket<V>>>
where
    V: Clone + Send + Sync + 'static,
{
    let removed = registry().write().remove(&registry_key::<V>(name));
    let bucket = removed.and_then(downcast::<V>)?;
    bucket.flush();
    debug!(bucket = name, "Discarded bucket");
    Some(bucket)
}
