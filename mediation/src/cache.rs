use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use crate::record::Value;
use crate::time::{SystemTime, TimeSource};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    /// `None` when the TTL reaches past the last representable date
    pub expires_at: Option<OffsetDateTime>,
}

impl CacheEntry {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// Bounded lookup table backing record enrichment.
///
/// Every entry lives for the same TTL, counted from its last `set`. Expiry is
/// checked on read: an expired entry stays in memory until it is overwritten
/// or evicted, but `lookup` never returns it.
///
/// Reads go through `LruCache::peek` under a shared lock, so they neither
/// block each other nor reorder entries. Recency therefore only moves on
/// writes: a full cache evicts the least recently written entry, which under
/// a uniform TTL is also the one closest to expiry.
pub struct LookupCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl LookupCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self::with_timesource(capacity, ttl, SystemTime {})
    }

    pub fn with_timesource<T: TimeSource + Send + Sync + 'static>(
        capacity: NonZeroUsize,
        ttl: Duration,
        timesource: T,
    ) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
            timesource: Arc::new(timesource),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        let now = self.timesource.now();
        let entries = self.read();
        match entries.peek(key) {
            Some(entry) if entry.is_live(now) => {
                counter!("mediation_cache_lookups_total", "result" => "hit").increment(1);
                Some(entry.value.clone())
            }
            Some(_) => {
                counter!("mediation_cache_lookups_total", "result" => "expired").increment(1);
                None
            }
            None => {
                counter!("mediation_cache_lookups_total", "result" => "miss").increment(1);
                None
            }
        }
    }

    /// Insert or overwrite `key`. Inserting a new key into a full cache
    /// evicts exactly one entry first.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let now = self.timesource.now();
        let entry = CacheEntry {
            value,
            expires_at: time::Duration::try_from(self.ttl)
                .ok()
                .and_then(|ttl| now.checked_add(ttl)),
        };

        let mut entries = self.write();
        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            if let Some((evicted, _)) = entries.pop_lru() {
                counter!("mediation_cache_evictions_total").increment(1);
                debug!(key = %evicted, "evicted enrichment cache entry");
            }
        }
        drop(entries.put(key, entry));
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.read().cap().get()
    }

    // Guarded sections never panic midway, a poisoned lock still holds a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use time::macros::datetime;

    use super::*;
    use crate::time::ManualTime;

    fn cache(capacity: usize, ttl_secs: u64) -> (LookupCache, ManualTime) {
        let clock = ManualTime::new(datetime!(2024-06-01 12:00 UTC));
        let cache = LookupCache::with_timesource(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(ttl_secs),
            clock.clone(),
        );
        (cache, clock)
    }

    #[test]
    fn missing_key_is_not_found() {
        let (cache, _) = cache(4, 60);
        assert_eq!(cache.lookup("subscriber:001"), None);
    }

    #[test]
    fn entry_expires_at_ttl() {
        let (cache, clock) = cache(4, 60);
        cache.set("subscriber:001", Value::from("premium"));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.lookup("subscriber:001"), Some(Value::from("premium")));

        // Visible only while strictly before expiry
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.lookup("subscriber:001"), None);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(cache.lookup("subscriber:001"), None);
        // Still physically present until overwritten or evicted
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ttl_past_last_date_never_expires() {
        // Too large for a time::Duration, then too large to add to now
        for ttl_secs in [u64::MAX, 9000 * 365 * 24 * 3600] {
            let (cache, clock) = cache(4, ttl_secs);
            cache.set("subscriber:001", Value::from("premium"));

            clock.advance(Duration::from_secs(100 * 365 * 24 * 3600));
            assert_eq!(cache.lookup("subscriber:001"), Some(Value::from("premium")));
        }
    }

    #[test]
    fn overwrite_refreshes_expiry() {
        let (cache, clock) = cache(4, 60);
        cache.set("device:35", Value::from("smartphone"));
        clock.advance(Duration::from_secs(45));
        cache.set("device:35", Value::from("tablet"));
        clock.advance(Duration::from_secs(45));

        assert_eq!(cache.lookup("device:35"), Some(Value::from("tablet")));
    }

    #[test]
    fn full_cache_evicts_least_recently_written() {
        let (cache, _) = cache(2, 60);
        cache.set("a", Value::Int(1));
        cache.set("b", Value::Int(2));
        // Reads do not count as use
        assert!(cache.lookup("a").is_some());

        cache.set("c", Value::Int(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("a"), None);
        assert_eq!(cache.lookup("b"), Some(Value::Int(2)));
        assert_eq!(cache.lookup("c"), Some(Value::Int(3)));
    }

    #[test]
    fn overwriting_at_capacity_does_not_evict() {
        let (cache, _) = cache(2, 60);
        cache.set("a", Value::Int(1));
        cache.set("b", Value::Int(2));
        cache.set("a", Value::Int(10));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("a"), Some(Value::Int(10)));
        assert_eq!(cache.lookup("b"), Some(Value::Int(2)));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let (cache, _) = cache(8, 60);
        for i in 0..100 {
            cache.set(format!("cell:{i}"), Value::Int(i));
            assert!(cache.len() <= cache.capacity());
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.lookup("cell:99"), Some(Value::Int(99)));
        assert_eq!(cache.lookup("cell:91"), None);
    }

    #[test]
    fn concurrent_readers_and_writer() {
        let (cache, _) = cache(16, 60);
        let cache = Arc::new(cache);
        cache.set("geo:NYC001", Value::from("us-east"));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        assert_eq!(cache.lookup("geo:NYC001"), Some(Value::from("us-east")));
                    }
                })
            })
            .collect();
        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    cache.set(format!("geo:{}", i % 8), Value::Int(i));
                }
            })
        };

        for reader in readers {
            reader.join().expect("reader panicked");
        }
        writer.join().expect("writer panicked");
        assert!(cache.len() <= 16);
    }
}
