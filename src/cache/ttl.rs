//! Self-expiring map with minute buckets.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BUCKET_WIDTH: Duration = Duration::from_secs(60);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    bucket: usize,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Table<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    buckets: Vec<HashSet<K>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    expired: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

/// Key/value map whose entries expire individually.
///
/// Entries are filed into `ceil(base_ttl / 1 min)` buckets by the minute they expire in. The
/// sweeper visits one bucket per minute, so a sweep costs the size of that bucket rather than
/// the size of the map. Reads check expiry themselves and never return a stale value.
pub struct TtlCache<K, V> {
    table: Mutex<Table<K, V>>,
    origin: Instant,
    base_ttl: Duration,
    bucket_count: usize,
    stats: AtomicStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(base_ttl: Duration) -> Self {
        let minutes = base_ttl.as_secs().div_ceil(BUCKET_WIDTH.as_secs()).max(1) as usize;
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                buckets: (0..minutes).map(|_| HashSet::new()).collect(),
            }),
            origin: Instant::now(),
            base_ttl,
            bucket_count: minutes,
            stats: AtomicStats::default(),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table<K, V>> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn base_ttl(&self) -> Duration {
        self.base_ttl
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Bucket that an entry expiring at `at` is filed under.
    pub fn bucket_index(&self, at: Instant) -> usize {
        let minute = at.saturating_duration_since(self.origin).as_secs() / BUCKET_WIDTH.as_secs();
        (minute % self.bucket_count as u64) as usize
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut table = self.table();
        let bucket = match table.entries.get(key) {
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(entry) => entry.bucket,
        };
        table.entries.remove(key);
        table.buckets[bucket].remove(key);
        self.stats.expired.fetch_add(1, Ordering::Relaxed);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.table()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Insert or replace `key`, moving it out of its previous bucket.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let bucket = self.bucket_index(expires_at);
        let mut table = self.table();

        if let Some(old_bucket) = table.entries.get(&key).map(|e| e.bucket) {
            table.buckets[old_bucket].remove(&key);
        }
        table.buckets[bucket].insert(key.clone());
        table.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                bucket,
            },
        );
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut table = self.table();
        let entry = table.entries.remove(key)?;
        table.buckets[entry.bucket].remove(key);
        Some(entry.value)
    }

    /// Number of stored entries, including expired ones not yet swept or read.
    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.table().buckets.get(bucket).map_or(0, HashSet::len)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    /// Sweep the bucket of the minute that just ended, where every entry of this cycle is due.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let last_minute = now.checked_sub(BUCKET_WIDTH).unwrap_or(self.origin);
        self.sweep_bucket_at(self.bucket_index(last_minute), now)
    }

    pub fn sweep_bucket(&self, bucket: usize) -> usize {
        self.sweep_bucket_at(bucket, Instant::now())
    }

    fn sweep_bucket_at(&self, bucket: usize, now: Instant) -> usize {
        let mut guard = self.table();
        let table = &mut *guard;
        let Some(keys) = table.buckets.get_mut(bucket) else {
            return 0;
        };

        let before = keys.len();
        let entries = &mut table.entries;
        // Entries due later in this minute, or a whole cycle later, stay filed here.
        keys.retain(|k| match entries.get(k) {
            Some(e) if e.is_expired(now) => {
                entries.remove(k);
                false
            }
            Some(_) => true,
            None => false,
        });
        let removed = before - keys.len();
        self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Sweep once a minute until `shutdown` fires or the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + BUCKET_WIDTH, BUCKET_WIDTH);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(cache) = weak.upgrade() else { break };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "cache sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_without_sweep() {
        let cache = TtlCache::new(Duration::from_secs(3600));
        cache.set("k", 1, Duration::from_millis(10));
        assert_eq!(cache.get(&"k"), Some(1));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cache.contains(&"k"));
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_count_rounds_up() {
        assert_eq!(TtlCache::<u32, ()>::new(Duration::from_secs(24 * 3600)).bucket_count(), 1440);
        assert_eq!(TtlCache::<u32, ()>::new(Duration::from_secs(90)).bucket_count(), 2);
        assert_eq!(TtlCache::<u32, ()>::new(Duration::ZERO).bucket_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_moves_key_between_buckets() {
        let cache = TtlCache::new(Duration::from_secs(3600));
        let start = Instant::now();
        cache.set(7u64, (), 10 * MINUTE);
        let first = cache.bucket_index(start + 10 * MINUTE);
        assert_eq!(cache.bucket_len(first), 1);

        cache.set(7u64, (), 20 * MINUTE);
        let second = cache.bucket_index(start + 20 * MINUTE);
        assert_ne!(first, second);
        assert_eq!(cache.bucket_len(first), 0);
        assert_eq!(cache.bucket_len(second), 1);

        tokio::time::sleep(15 * MINUTE).await;
        assert_eq!(cache.sweep_bucket(first), 0);
        assert_eq!(cache.get(&7), Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_visits_one_bucket() {
        let cache = TtlCache::new(Duration::from_secs(3600));
        cache.set(1u32, "a", Duration::from_secs(30));
        cache.set(2u32, "b", 5 * MINUTE);
        cache.set(3u32, "c", Duration::from_secs(50));
        cache.set(4u32, "d", Duration::from_secs(62));

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(cache.sweep(), 2);
        // 4 is due but filed in the next bucket; reads still hide it.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&4), None);
        assert_eq!(cache.get(&2), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_entries_due_later() {
        let cache = TtlCache::new(Duration::from_secs(3600));
        cache.set(1u32, (), Duration::from_secs(10));
        cache.set(2u32, (), Duration::from_secs(50));
        let bucket = cache.bucket_index(Instant::now());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(cache.sweep_bucket(bucket), 1);
        assert_eq!(cache.bucket_len(bucket), 1);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(cache.sweep_bucket(bucket), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove() {
        let cache = TtlCache::new(MINUTE);
        cache.set("x".to_string(), 3, MINUTE);
        assert_eq!(cache.remove(&"x".to_string()), Some(3));
        assert_eq!(cache.remove(&"x".to_string()), None);
        assert_eq!(cache.bucket_len(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_cache_dropped() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(3600)));
        cache.set(1u32, (), Duration::from_secs(1));
        let handle = cache.spawn_sweeper(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }
}
