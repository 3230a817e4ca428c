//! Integration Tests for the Bucket API
//!
//! Exercises buckets through the public surface, including the background
//! sweep timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, sleep};
use std::time::Duration;

use slidecache::{open, open_with_ceiling, Bucket, CacheError, Entry};

const KEY: &str = "cachekey";
const VALUE: &str = "cachevalue";

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// == Basic Operations ==

#[test]
fn test_set_then_get() {
    let bucket = open::<String>("it_set_then_get");
    bucket.set(KEY, VALUE.to_string(), Duration::from_secs(1));

    let entry = bucket.get(KEY).unwrap();
    assert_eq!(entry.value(), VALUE);
    assert_eq!(entry.key(), KEY);
}

#[test]
fn test_exists_and_delete() {
    let bucket = open::<String>("it_exists_delete");
    bucket.set(KEY, VALUE.to_string(), Duration::ZERO);
    assert!(bucket.exists(KEY));

    let removed = bucket.delete(KEY).unwrap();
    assert_eq!(removed.value(), VALUE);
    assert!(!bucket.exists(KEY));
    assert!(matches!(bucket.get(KEY), Err(CacheError::NotFound(_))));
}

#[test]
fn test_count_many_entries() {
    let count = 100_000;
    let bucket = open::<String>("it_count");
    for i in 0..count {
        bucket.set(format!("{KEY}{i}"), VALUE.to_string(), Duration::from_secs(10));
    }
    for i in 0..count {
        let entry = bucket.get(&format!("{KEY}{i}")).unwrap();
        assert_eq!(entry.value(), VALUE);
    }
    assert_eq!(bucket.count(), count);
}

// == Expiration ==

#[test]
fn test_entry_expires() {
    let bucket = open::<String>("it_expire");
    bucket.set(KEY, VALUE.to_string(), ms(250));
    assert!(bucket.get(KEY).is_ok());

    sleep(ms(500));
    assert!(matches!(bucket.get(KEY), Err(CacheError::NotFound(_))));
    assert_eq!(bucket.count(), 0);
}

#[test]
fn test_non_expiring_entry_survives() {
    let bucket = open::<String>("it_non_expiring");
    bucket.set(KEY, VALUE.to_string(), Duration::ZERO);

    sleep(ms(500));
    assert_eq!(bucket.get(KEY).unwrap().value(), VALUE);
}

#[test]
fn test_reads_slide_expiry_window() {
    let bucket = open::<String>("it_sliding");
    bucket.set(KEY, VALUE.to_string(), ms(250));

    for _ in 0..20 {
        sleep(ms(50));
        assert!(bucket.get(KEY).is_ok(), "read within the window must renew it");
    }

    sleep(ms(500));
    assert!(matches!(bucket.get(KEY), Err(CacheError::NotFound(_))));
}

#[test]
fn test_entries_expire_independently() {
    let long_key = format!("{KEY}{KEY}");
    let bucket = open::<String>("it_independent");
    bucket.set(KEY, VALUE.to_string(), ms(250));
    bucket.set(long_key.as_str(), VALUE.repeat(2), ms(750));

    assert!(bucket.get(KEY).is_ok());
    sleep(ms(500));
    assert!(bucket.get(KEY).is_err());
    assert_eq!(bucket.get(&long_key).unwrap().value(), &VALUE.repeat(2));

    sleep(ms(1_200));
    assert!(bucket.get(&long_key).is_err());
}

#[test]
fn test_count_includes_unswept_entries() {
    // The sweep is the only thing that removes entries; reads don't filter
    let bucket = Bucket::new("it_lazy_count");
    bucket.set("a", 1u8, Duration::from_secs(30));
    bucket.set("b", 2u8, Duration::from_secs(30));
    assert_eq!(bucket.count(), 2);
    assert!(bucket.exists("a"));
}

// == Flush ==

#[test]
fn test_flush() {
    let bucket = open::<String>("it_flush");
    bucket.set(KEY, VALUE.to_string(), Duration::from_secs(10));
    sleep(ms(100));
    bucket.flush();

    assert!(bucket.get(KEY).is_err());
    assert_eq!(bucket.count(), 0);
}

#[test]
fn test_flush_is_idempotent() {
    let bucket = open::<String>("it_flush_twice");
    bucket.flush();
    bucket.flush();
    assert_eq!(bucket.count(), 0);

    // Still usable, and the sweep re-arms after a flush
    bucket.set(KEY, VALUE.to_string(), ms(50));
    sleep(ms(300));
    assert!(!bucket.exists(KEY));
}

// == Hooks ==

#[test]
fn test_callbacks_fire_on_add_and_expiry() {
    let added = Arc::new(Mutex::new(String::new()));
    let removed = Arc::new(Mutex::new(String::new()));

    let bucket = open::<String>("it_callbacks");
    let slot = added.clone();
    bucket.set_on_add(move |entry: &Entry<String>| {
        *slot.lock().unwrap() = entry.key().to_string();
    });
    let slot = removed.clone();
    bucket.set_on_delete(move |entry: &Entry<String>| {
        *slot.lock().unwrap() = entry.key().to_string();
    });

    bucket.set(KEY, VALUE.to_string(), ms(500));

    sleep(ms(250));
    assert_eq!(*added.lock().unwrap(), KEY);
    assert_eq!(*removed.lock().unwrap(), "");

    sleep(ms(500));
    assert_eq!(*removed.lock().unwrap(), KEY);
}

#[test]
fn test_replace_fires_each_hook_once() {
    let adds = Arc::new(Mutex::new(Vec::new()));
    let deletes = Arc::new(Mutex::new(Vec::new()));

    let bucket = Bucket::new("it_replace");
    let log = adds.clone();
    bucket.set_on_add(move |e: &Entry<u32>| log.lock().unwrap().push(*e.value()));
    let log = deletes.clone();
    bucket.set_on_delete(move |e: &Entry<u32>| log.lock().unwrap().push(*e.value()));

    bucket.set(KEY, 1, Duration::from_secs(5));
    bucket.set(KEY, 2, Duration::from_secs(1));

    assert_eq!(*bucket.get(KEY).unwrap().value(), 2);
    assert_eq!(*adds.lock().unwrap(), vec![1, 2]);
    assert_eq!(*deletes.lock().unwrap(), vec![1]);
}

#[test]
fn test_last_hook_wins() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let bucket = Bucket::new("it_last_hook");
    let counter = first.clone();
    bucket.set_on_add(move |_: &Entry<u8>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = second.clone();
    bucket.set_on_add(move |_: &Entry<u8>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bucket.set(KEY, 0, Duration::ZERO);
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

// == Access Ceiling ==

#[test]
fn test_access_ceiling() {
    let bucket = open_with_ceiling::<String>("it_ceiling", Some(3));
    bucket.set(KEY, VALUE.to_string(), Duration::ZERO);

    for _ in 0..3 {
        assert_eq!(bucket.get(KEY).unwrap().value(), VALUE);
    }
    assert!(matches!(bucket.get(KEY), Err(CacheError::NotFound(_))));
}

// == Data Loader ==

#[test]
fn test_data_loader() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bucket = open::<String>("it_loader");
    let counter = calls.clone();
    bucket.set_data_loader(move |key: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        (key != "nil").then(|| Entry::new(key, key.to_string(), ms(500)))
    });

    assert!(matches!(
        bucket.get("nil"),
        Err(CacheError::NotFoundOrLoadable(_))
    ));
    assert!(!bucket.exists("nil"));

    for i in 0..10 {
        let key = format!("{KEY}{i}");
        assert_eq!(bucket.get(&key).unwrap().value(), &key);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 11);

    // Cached now, the loader is not asked again
    assert_eq!(bucket.get(&format!("{KEY}3")).unwrap().value(), &format!("{KEY}3"));
    assert_eq!(calls.load(Ordering::SeqCst), 11);
}

// == Concurrency ==

#[test]
fn test_concurrent_disjoint_keys() {
    const THREADS: usize = 4;
    const OPS: usize = 100_000;
    const KEYS: usize = 1_000;

    let bucket = Bucket::new("it_stress");
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let bucket = bucket.clone();
            thread::spawn(move || {
                let mut model = HashMap::new();
                for i in 0..OPS {
                    let key = format!("t{t}-k{}", (i * 7) % KEYS);
                    match i % 5 {
                        0 | 1 => {
                            let ttl = if i % 2 == 0 { Duration::ZERO } else { Duration::from_secs(60) };
                            bucket.set(key.clone(), i, ttl);
                            model.insert(key, i);
                        }
                        2 | 3 => {
                            let found = bucket.get(&key).ok().map(|e| *e.value());
                            assert_eq!(found, model.get(&key).copied());
                        }
                        _ => {
                            assert_eq!(bucket.delete(&key).is_ok(), model.remove(&key).is_some());
                        }
                    }
                }
                model
            })
        })
        .collect();

    let mut expected = HashMap::new();
    for handle in handles {
        expected.extend(handle.join().unwrap());
    }

    assert_eq!(bucket.count(), expected.len());
    for (key, value) in expected {
        assert_eq!(*bucket.get(&key).unwrap().value(), value);
    }
}
