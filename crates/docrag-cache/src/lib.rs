//! In-process keyed byte cache with per-entry TTL and atomic counters.
//!
//! One [`Cache`] instance backs three tiers, separated by key prefix:
//!
//! - `query:<user_id>:<hash>` — cached search results (default TTL 1 h),
//!   invalidated per user when ingestion completes or fails
//! - `embedding:<hash>` — cached query embeddings (default TTL 24 h)
//! - `revoked:<token_id>` — token revocation flags, append-only with TTL
//!
//! Cache failures are never fatal anywhere in docrag: a read problem is a
//! miss, a write problem is ignored, both are logged at `warn`. Hit, miss,
//! and eviction counts are owned by the cache itself as atomic integers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

/// Key prefix for cached query results; the user id segment makes per-user
/// invalidation a prefix sweep.
pub const QUERY_PREFIX: &str = "query:";
/// Key prefix for cached query embeddings.
pub const EMBEDDING_PREFIX: &str = "embedding:";
/// Key prefix for revoked-token flags.
pub const REVOKED_PREFIX: &str = "revoked:";

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Keyed byte store with TTL.
pub struct Cache {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Cache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a value. Expired entries count as misses and are dropped lazily.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().await;
            // Re-check under the write lock; a set may have raced us.
            if entries
                .get(key)
                .is_some_and(|e| e.expires_at <= Instant::now())
            {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with a TTL. Last writer wins.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Whether a live entry exists, without touching hit/miss counters.
    pub async fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .is_some_and(|e| e.expires_at > Instant::now())
    }

    /// Delete a key. Idempotent.
    pub async fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(key).is_some()
    }

    /// Delete every key under a prefix, returning the count removed.
    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(prefix, removed, "evicted cache entries");
        }
        removed
    }

    /// Drop all expired entries eagerly, returning the count removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Live entry count (expired entries may still be counted until swept).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Namespace helper: the query-result cache key for one user.
#[must_use]
pub fn query_key(user_id: i64, hash: &str) -> String {
    format!("{QUERY_PREFIX}{user_id}:{hash}")
}

/// Namespace helper: the prefix covering all of one user's query results.
#[must_use]
pub fn query_user_prefix(user_id: i64) -> String {
    format!("{QUERY_PREFIX}{user_id}:")
}

/// Namespace helper: the embedding cache key for a query hash.
#[must_use]
pub fn embedding_key(hash: &str) -> String {
    format!("{EMBEDDING_PREFIX}{hash}")
}

/// Namespace helper: the revocation flag for a token id.
#[must_use]
pub fn revoked_key(token_id: &str) -> String {
    format!("{REVOKED_PREFIX}{token_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_within_ttl() {
        let cache = Cache::new();
        cache
            .set("k", b"value".to_vec(), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("k").await, Some(b"value".to_vec()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let cache = Cache::new();
        cache.set("k", b"v".to_vec(), Duration::from_millis(10)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k").await, None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_miss() {
        let cache = Cache::new();
        assert_eq!(cache.get("absent").await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let cache = Cache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;

        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = Cache::new();
        cache.set("k", b"one".to_vec(), Duration::from_secs(60)).await;
        cache.set("k", b"two".to_vec(), Duration::from_secs(60)).await;

        assert_eq!(cache.get("k").await, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_prefix_scopes_to_user() {
        let cache = Cache::new();
        let ttl = Duration::from_secs(60);
        cache.set(&query_key(1, "aaa"), b"r1".to_vec(), ttl).await;
        cache.set(&query_key(1, "bbb"), b"r2".to_vec(), ttl).await;
        cache.set(&query_key(2, "aaa"), b"r3".to_vec(), ttl).await;
        cache.set(&embedding_key("aaa"), b"e".to_vec(), ttl).await;

        let removed = cache.delete_prefix(&query_user_prefix(1)).await;
        assert_eq!(removed, 2);

        // User 2's results and the embedding cache survive.
        assert!(cache.get(&query_key(2, "aaa")).await.is_some());
        assert!(cache.get(&embedding_key("aaa")).await.is_some());
        assert!(cache.get(&query_key(1, "aaa")).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let cache = Cache::new();
        cache
            .set("short", b"v".to_vec(), Duration::from_millis(10))
            .await;
        cache.set("long", b"v".to_vec(), Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.contains("long").await);
    }

    #[tokio::test]
    async fn test_revocation_flag() {
        let cache = Cache::new();
        let key = revoked_key("token-abc");
        cache.set(&key, vec![1], Duration::from_secs(60)).await;

        assert!(cache.contains(&key).await);
        assert!(!cache.contains(&revoked_key("token-def")).await);
    }

    #[tokio::test]
    async fn test_contains_does_not_count() {
        let cache = Cache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;

        assert!(cache.contains("k").await);
        assert!(!cache.contains("absent").await);

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }
}
