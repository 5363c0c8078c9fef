use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::db::{to_db_timestamp, Plan, Stats};

pub const STATS_KEY: &str = "stats:general";

/// Cache key for a search window. Both bounds use the stored timestamp format,
/// so equivalent inputs (`+00:00` vs `Z`, missing millis) share an entry.
pub fn search_key(start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
    format!("search:{}:{}", to_db_timestamp(start), to_db_timestamp(end))
}

/// Values held by the service cache.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Plans(Arc<Vec<Plan>>),
    Stats(Stats),
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process key/value cache with per-entry expiry. Cloning shares the map.
///
/// `invalidate_all` bumps a generation counter; readers that loaded a value
/// from storage before an invalidation use [`TtlCache::set_if_generation`]
/// so they cannot repopulate the cache with pre-invalidation data.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
    generation: Arc<AtomicU64>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            generation: self.generation.clone(),
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Expired entries are evicted on the way out and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Another writer may have refreshed the key between the two locks.
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    #[cfg(test)]
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Store only if no invalidation happened since `generation` was read.
    /// Returns whether the value was stored.
    pub async fn set_if_generation(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        let mut entries = self.entries.write().await;
        // invalidate_all bumps under the same lock
        if self.generation() != generation {
            return false;
        }
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    #[cfg(test)]
    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop every entry. Returns how many were held.
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!("Cache invalidated ({} entries dropped)", count);
        count
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache = TtlCache::new();
        cache.set("k", 42u32, Duration::from_secs(1)).await;

        assert_eq!(cache.get("k").await, Some(42));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("k").await, None);
        // lazily evicted on read
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn set_overwrites_and_refreshes_expiry() {
        let cache = TtlCache::new();
        cache.set("k", "old", Duration::from_millis(50)).await;
        cache.set("k", "new", Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.get("k").await, Some("new"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn invalidate_all_drops_everything() {
        let cache = TtlCache::new();
        cache.set("a", 1, Duration::from_secs(60)).await;
        cache.set("b", 2, Duration::from_secs(60)).await;

        assert_eq!(cache.invalidate_all().await, 2);

        assert!(cache.is_empty().await);
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn stale_writes_after_invalidation_are_dropped() {
        let cache: TtlCache<u32> = TtlCache::default();
        let before = cache.generation();

        cache.invalidate_all().await;

        assert!(!cache.set_if_generation("k", 1, Duration::from_secs(60), before).await);
        assert!(cache.is_empty().await);

        let current = cache.generation();
        assert_eq!(current, before + 1);
        assert!(cache.set_if_generation("k", 2, Duration::from_secs(60), current).await);
        assert_eq!(cache.get("k").await, Some(2));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_entries() {
        let cache = TtlCache::new();
        cache.set("short", 1, Duration::from_millis(10)).await;
        cache.set("long", 2, Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("long").await, Some(2));
        assert!(!cache.remove("short").await);
        assert!(cache.remove("long").await);
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let cache = TtlCache::new();
        let other = cache.clone();
        other.set("k", 7, Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(7));
    }

    #[tokio::test]
    async fn concurrent_writers_and_readers() {
        let cache = TtlCache::new();
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set(format!("k{}", i), i, Duration::from_secs(60)).await;
                cache.get(&format!("k{}", i)).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(i as u32));
        }
        assert_eq!(cache.len().await, 32);
    }

    #[test]
    fn search_keys_are_normalized() {
        let start = Utc.with_ymd_and_hms(2021, 6, 30, 21, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(
            search_key(&start, &end),
            "search:2021-06-30T21:00:00.000Z:2021-07-01T00:00:00.000Z"
        );

        let same_start = chrono::DateTime::parse_from_rfc3339("2021-06-30T23:00:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(search_key(&same_start, &end), search_key(&start, &end));
    }
}
