//! Cache Bucket Module
//!
//! A named cache container combining a key/entry map, an expiration queue and
//! a self-rescheduling sweep timer.
//!
//! # Locking
//! Map, queue and timer sit behind one `RwLock`. Hooks, the loader and the
//! diagnostic logger are always invoked after that lock is released, so they
//! may call back into the same bucket.
//!
//! # Expiration
//! Entries with a non-zero TTL have one record in the expiration queue. A leak
//! check pops every due record, evicts those entries and arms a single timer
//! for the next deadline, which runs the next leak check on a timer thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, dispatcher, trace, Dispatch};

use crate::cache::{BucketStats, Entry, ExpirationQueue};
use crate::error::{CacheError, Result};
use crate::tasks::SweepTimer;

/// Fallback consulted on a read miss.
pub type DataLoader<V> = Arc<dyn Fn(&str) -> Option<Entry<V>> + Send + Sync>;

/// Callback observing an entry being added or removed.
pub type EntryHook<V> = Arc<dyn Fn(&Entry<V>) + Send + Sync>;

/// A resident entry plus the bookkeeping the bucket needs around it.
struct Resident<V> {
    entry: Entry<V>,
    /// Distinguishes this entry from a later one under the same key
    generation: u64,
    /// Set once a delete has claimed the entry and is running its hook
    deleting: Option<Arc<PendingDelete>>,
}

/// Completion signal for a claimed entry.
///
/// Writers of the same key on other threads block on it until the entry is
/// gone, so a second `delete` never reports `NotFound` while the key is still
/// readable.
struct PendingDelete {
    owner: ThreadId,
    done: Mutex<bool>,
    finished: Condvar,
}

impl PendingDelete {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            owner: thread::current().id(),
            done: Mutex::new(false),
            finished: Condvar::new(),
        })
    }

    fn is_owned_by_current_thread(&self) -> bool {
        self.owner == thread::current().id()
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.finished.notify_all();
    }
}

/// A delete in progress: the entry stays resident until `complete_delete`.
struct Claim<V> {
    snapshot: Entry<V>,
    generation: u64,
    pending: Arc<PendingDelete>,
    on_delete: Option<EntryHook<V>>,
    logger: Option<Dispatch>,
}

/// Outcome of trying to claim a key for deletion.
enum Lookup<V> {
    /// Nothing to delete. Includes entries the current thread is already
    /// deleting, so hooks can re-enter without waiting on themselves.
    Absent,
    Claimed(Claim<V>),
    /// Another thread's delete owns the entry
    Busy(Arc<PendingDelete>),
}

/// Removes a claimed entry when dropped, even if the delete hook panicked.
struct Release<'a, V> {
    state: &'a RwLock<State<V>>,
    key: &'a str,
    generation: u64,
    pending: &'a PendingDelete,
}

impl<V> Drop for Release<'_, V> {
    fn drop(&mut self) {
        self.state.write().release(self.key, self.generation);
        self.pending.finish();
    }
}

struct State<V> {
    entries: HashMap<String, Resident<V>>,
    queue: ExpirationQueue,
    timer: SweepTimer,
    /// Instant the pending timer fires at, None = dormant
    wake_at: Option<Instant>,
    /// Delay the pending timer was armed with
    next_wake_after: Duration,
    next_generation: u64,
    stats: BucketStats,
    loader: Option<DataLoader<V>>,
    on_add: Option<EntryHook<V>>,
    on_delete: Option<EntryHook<V>>,
    logger: Option<Dispatch>,
}

impl<V: Clone> State<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            queue: ExpirationQueue::new(),
            timer: SweepTimer::new(),
            wake_at: None,
            next_wake_after: Duration::ZERO,
            next_generation: 0,
            stats: BucketStats::new(),
            loader: None,
            on_add: None,
            on_delete: None,
            logger: None,
        }
    }

    /// Marks the entry under `key` as being deleted by the caller.
    fn claim(&mut self, key: &str) -> Lookup<V> {
        let Some(resident) = self.entries.get_mut(key) else {
            return Lookup::Absent;
        };
        match &resident.deleting {
            Some(pending) if pending.is_owned_by_current_thread() => Lookup::Absent,
            Some(pending) => Lookup::Busy(pending.clone()),
            None => {
                let pending = PendingDelete::new();
                resident.deleting = Some(pending.clone());
                Lookup::Claimed(Claim {
                    snapshot: resident.entry.clone(),
                    generation: resident.generation,
                    pending,
                    on_delete: self.on_delete.clone(),
                    logger: self.logger.clone(),
                })
            }
        }
    }
}

impl<V> State<V> {
    /// Removes the entry under `key` if it is still the claimed generation.
    fn release(&mut self, key: &str, generation: u64) {
        let owned = self
            .entries
            .get(key)
            .is_some_and(|r| r.generation == generation);
        if owned {
            if let Some(mut resident) = self.entries.remove(key) {
                self.unlink(&mut resident.entry);
            }
        }
    }

    /// Drops `entry`'s expiration record, if it still has one.
    fn unlink(&mut self, entry: &mut Entry<V>) {
        if let Some(handle) = entry.expiration.take() {
            self.queue.remove(handle);
        }
    }
}

// == Bucket ==
/// An independently locked cache container.
///
/// Buckets are always shared through an `Arc`; see [`Bucket::new`] or the
/// registry's [`open`](crate::open).
pub struct Bucket<V> {
    name: String,
    access_ceiling: Option<u64>,
    /// Handed to the sweep timer so a pending timer never keeps the bucket alive
    this: Weak<Bucket<V>>,
    state: RwLock<State<V>>,
}

impl<V> Bucket<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates an empty, dormant bucket.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_access_ceiling(name, None)
    }

    /// Creates an empty bucket whose entries are evicted once they have been
    /// read `ceiling` times.
    pub fn with_access_ceiling(name: impl Into<String>, ceiling: Option<u64>) -> Arc<Self> {
        let name = name.into();
        debug!(bucket = %name, ?ceiling, "Creating bucket");
        Arc::new_cyclic(|this| Self {
            name,
            access_ceiling: ceiling,
            this: this.clone(),
            state: RwLock::new(State::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_ceiling(&self) -> Option<u64> {
        self.access_ceiling
    }

    // == Hook Setters ==
    // Last writer wins; hooks are never chained.

    /// Installs the loader consulted by [`get`](Self::get) on a miss.
    pub fn set_data_loader<F>(&self, loader: F)
    where
        F: Fn(&str) -> Option<Entry<V>> + Send + Sync + 'static,
    {
        self.state.write().loader = Some(Arc::new(loader));
    }

    /// Installs the callback fired after an entry is added.
    pub fn set_on_add<F>(&self, hook: F)
    where
        F: Fn(&Entry<V>) + Send + Sync + 'static,
    {
        self.state.write().on_add = Some(Arc::new(hook));
    }

    /// Installs the callback fired when an entry leaves the bucket.
    ///
    /// Explicit deletes, replacements and access-ceiling evictions fire it
    /// while the entry is still resident; reads keep finding it until the hook
    /// returns, and writes of the same key from other threads wait for it.
    /// The sweep leaves such an entry to its delete even when it falls due.
    /// Expired entries are reported right after the sweep removed them. Flush
    /// fires nothing.
    pub fn set_on_delete<F>(&self, hook: F)
    where
        F: Fn(&Entry<V>) + Send + Sync + 'static,
    {
        self.state.write().on_delete = Some(Arc::new(hook));
    }

    /// Routes this bucket's diagnostics to `logger` instead of the global
    /// subscriber.
    pub fn set_logger(&self, logger: Dispatch) {
        self.state.write().logger = Some(logger);
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// A replaced entry goes through the full delete path first, so its
    /// `on_delete` hook fires before the new entry's `on_add`. A non-zero
    /// `ttl` that falls due before the armed timer triggers an immediate leak
    /// check on the calling thread.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> Entry<V> {
        let key = key.into();

        let mut state = loop {
            let mut state = self.state.write();
            match state.claim(&key) {
                Lookup::Absent => break state,
                Lookup::Claimed(claim) => {
                    drop(state);
                    self.complete_delete(claim);
                }
                Lookup::Busy(pending) => {
                    drop(state);
                    pending.wait();
                }
            }
        };

        // Anything still resident is being deleted by this thread's own hook
        if let Some(mut stale) = state.entries.remove(&key) {
            state.unlink(&mut stale.entry);
        }

        let mut entry = Entry::new(key.clone(), value, ttl);
        let due = entry.expires_at();
        if let Some(due) = due {
            entry.expiration = Some(state.queue.push(key.clone(), due));
        }
        let snapshot = entry.clone();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.entries.insert(
            key,
            Resident {
                entry,
                generation,
                deleting: None,
            },
        );

        let sweep = due.is_some_and(|due| state.wake_at.map_or(true, |wake| due < wake));
        let on_add = state.on_add.clone();
        let logger = state.logger.clone();
        drop(state);

        with_logger(logger.as_ref(), || {
            debug!(bucket = %self.name, key = snapshot.key(), ?ttl, "Adding entry");
        });
        if let Some(on_add) = on_add {
            on_add(&snapshot);
        }
        if sweep {
            self.leak_check();
        }
        snapshot
    }

    // == Get ==
    /// Looks up `key`, renewing its sliding expiry window.
    ///
    /// On a miss the data loader, if any, is asked for the value; a loaded
    /// entry is stored with the loader's TTL and returned.
    ///
    /// # Errors
    /// - `NotFound` if the key is absent and there is no loader
    /// - `NotFoundOrLoadable` if the loader had no value for the key
    pub fn get(&self, key: &str) -> Result<Entry<V>> {
        let now = Instant::now();
        let mut guard = self.state.write();
        let state = &mut *guard;

        let hit = match state.entries.get_mut(key) {
            Some(resident) => {
                let due = resident.entry.keep_alive(now);
                if let (Some(handle), Some(due)) = (resident.entry.expiration, due) {
                    state.queue.update(handle, due);
                }
                let snapshot = resident.entry.clone();
                let exhausted = resident.deleting.is_none()
                    && self
                        .access_ceiling
                        .is_some_and(|ceiling| snapshot.access_count() >= ceiling);
                Some((snapshot, exhausted))
            }
            None => None,
        };

        match hit {
            Some((snapshot, exhausted)) => {
                state.stats.record_hit();
                let claim = if exhausted {
                    match state.claim(key) {
                        Lookup::Claimed(claim) => {
                            state.stats.record_eviction();
                            Some(claim)
                        }
                        Lookup::Absent | Lookup::Busy(_) => None,
                    }
                } else {
                    None
                };
                let logger = state.logger.clone();
                drop(guard);

                with_logger(logger.as_ref(), || {
                    trace!(
                        bucket = %self.name,
                        key,
                        accesses = snapshot.access_count(),
                        "Entry hit"
                    );
                });
                if let Some(claim) = claim {
                    with_logger(logger.as_ref(), || {
                        debug!(bucket = %self.name, key, "Entry reached access ceiling");
                    });
                    self.complete_delete(claim);
                }
                Ok(snapshot)
            }
            None => {
                state.stats.record_miss();
                let loader = state.loader.clone();
                let logger = state.logger.clone();
                drop(guard);

                let Some(loader) = loader else {
                    return Err(CacheError::NotFound(key.to_string()));
                };
                match loader(key) {
                    Some(loaded) => {
                        with_logger(logger.as_ref(), || {
                            debug!(bucket = %self.name, key, "Loaded entry on miss");
                        });
                        self.state.write().stats.record_load();
                        let ttl = loaded.ttl();
                        Ok(self.set(key, loaded.into_value(), ttl))
                    }
                    None => Err(CacheError::NotFoundOrLoadable(key.to_string())),
                }
            }
        }
    }

    // == Delete ==
    /// Removes the entry under `key` and returns it.
    ///
    /// If another thread is already deleting the key, waits for that delete
    /// to finish and then reports the key as absent.
    ///
    /// # Errors
    /// - `NotFound` if the key is absent, or is being deleted by the calling
    ///   thread's own delete hook
    pub fn delete(&self, key: &str) -> Result<Entry<V>> {
        loop {
            let lookup = self.state.write().claim(key);
            match lookup {
                Lookup::Claimed(claim) => return Ok(self.complete_delete(claim)),
                Lookup::Busy(pending) => pending.wait(),
                Lookup::Absent => return Err(CacheError::NotFound(key.to_string())),
            }
        }
    }

    /// Runs the delete hook for a claimed entry, then unlinks it.
    fn complete_delete(&self, claim: Claim<V>) -> Entry<V> {
        let Claim {
            snapshot,
            generation,
            pending,
            on_delete,
            logger,
        } = claim;

        {
            let _release = Release {
                state: &self.state,
                key: snapshot.key(),
                generation,
                pending: &pending,
            };
            if let Some(on_delete) = on_delete {
                on_delete(&snapshot);
            }
        }

        with_logger(logger.as_ref(), || {
            debug!(
                bucket = %self.name,
                key = snapshot.key(),
                created = %snapshot.created_at_utc(),
                "Deleted entry"
            );
        });
        snapshot
    }

    // == Exists ==
    /// Returns true if `key` is resident. Does not renew or load.
    pub fn exists(&self, key: &str) -> bool {
        self.state.read().entries.contains_key(key)
    }

    // == Count ==
    /// Returns the number of resident entries, including ones that are past
    /// due but not yet swept.
    pub fn count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns a snapshot of the resident keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.state.read().entries.keys().cloned().collect()
    }

    // == Stats ==
    /// Returns current bucket statistics.
    pub fn stats(&self) -> BucketStats {
        let state = self.state.read();
        let mut stats = state.stats.clone();
        stats.entries = state.entries.len();
        stats
    }

    // == Flush ==
    /// Drops every entry and cancels the pending timer. No hooks fire.
    pub fn flush(&self) {
        let logger = {
            let mut state = self.state.write();
            state.entries.clear();
            state.queue.clear();
            state.timer.cancel();
            state.wake_at = None;
            state.next_wake_after = Duration::ZERO;
            state.logger.clone()
        };
        with_logger(logger.as_ref(), || {
            debug!(bucket = %self.name, "Flushed bucket");
        });
    }

    // == Leak Check ==
    /// Evicts every entry whose deadline has passed and re-arms the timer for
    /// the next one.
    ///
    /// Leaves the bucket dormant when no entry with a TTL remains.
    fn leak_check(&self) {
        let now = Instant::now();
        let mut state = self.state.write();
        state.timer.cancel();
        let previous = state.next_wake_after;

        let due = state.queue.pop_due(now);
        let mut expired = Vec::with_capacity(due.len());
        for key in due {
            let Some(resident) = state.entries.get_mut(&key) else {
                continue;
            };
            // Record was popped along with the key
            resident.entry.expiration = None;
            if resident.deleting.is_some() {
                // Its delete removes it once the hook returns
                continue;
            }
            if let Some(resident) = state.entries.remove(&key) {
                expired.push(resident.entry);
            }
        }
        state.stats.record_expirations(expired.len());

        match state.queue.min_dispose_at() {
            Some(wake_at) => {
                let delay = wake_at.saturating_duration_since(now);
                state.wake_at = Some(wake_at);
                state.next_wake_after = delay;
                let bucket = self.this.clone();
                state.timer.arm(delay, move || {
                    if let Some(bucket) = bucket.upgrade() {
                        bucket.leak_check();
                    }
                });
            }
            None => {
                state.wake_at = None;
                state.next_wake_after = Duration::ZERO;
            }
        }

        let next = state.next_wake_after;
        let on_delete = state.on_delete.clone();
        let logger = state.logger.clone();
        drop(state);

        with_logger(logger.as_ref(), || {
            if previous.is_zero() {
                trace!(bucket = %self.name, "Expiration check installed");
            } else {
                trace!(bucket = %self.name, ?previous, "Expiration check triggered");
            }
            if !expired.is_empty() {
                debug!(bucket = %self.name, expired = expired.len(), "Swept expired entries");
            }
            if next.is_zero() {
                trace!(bucket = %self.name, "No expiring entries left, going dormant");
            } else {
                trace!(bucket = %self.name, next_wake = ?next, "Next expiration check armed");
            }
        });

        if let Some(on_delete) = on_delete {
            for entry in &expired {
                on_delete(entry);
            }
        }
    }
}

impl<V> fmt::Debug for Bucket<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("access_ceiling", &self.access_ceiling)
            .field("entries", &self.state.read().entries.len())
            .finish()
    }
}

/// Runs `f` with `logger` as the default dispatcher, or as-is without one.
fn with_logger<F: FnOnce()>(logger: Option<&Dispatch>, f: F) {
    match logger {
        Some(logger) => dispatcher::with_default(logger, f),
        None => f(),
    }
}
