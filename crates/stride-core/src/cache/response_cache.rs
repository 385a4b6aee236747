//! Two-tier response cache with per-key single-flight deduplication.
//!
//! Lookup order: in-memory hot tier first, then the persistent store
//! (promoting to memory on hit). Concurrent callers for the same key
//! coordinate through a per-key async mutex so the compute closure runs
//! at most once; callers arriving while a computation is in flight wait
//! for it and read the freshly stored value. A failed computation clears
//! the in-flight slot so later callers retry instead of inheriting the
//! failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use stride_types::cache::{CacheEntry, CacheError};

use super::store::CacheStore;

/// Deduplicating cache for LLM responses.
///
/// Generic over the persistent tier. Values are serialized to JSON
/// strings in both tiers, so the store stays untyped.
pub struct ResponseCache<S: CacheStore> {
    memory: DashMap<String, CacheEntry>,
    store: S,
    /// Per-key coordination locks for single-flight computes. Entries
    /// are removed once the flight lands; the map only holds keys with
    /// an active or just-finished computation.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: CacheStore> ResponseCache<S> {
    /// Create a cache over the given persistent store.
    pub fn new(store: S) -> Self {
        Self {
            memory: DashMap::new(),
            store,
            inflight: DashMap::new(),
        }
    }

    /// Look up a live entry across both tiers, promoting store hits to memory.
    async fn lookup(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Utc::now();

        if let Some(entry) = self.memory.get(key) {
            if !entry.is_expired(now) {
                debug!(key, "Response cache hit (memory)");
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.memory.remove(key);
        }

        if let Some(entry) = self.store.get(key).await? {
            if entry.is_expired(now) {
                self.store.remove(key).await?;
                return Ok(None);
            }
            debug!(key, "Response cache hit (persistent), promoting to memory");
            let value = entry.value.clone();
            self.memory.insert(key.to_string(), entry);
            return Ok(Some(value));
        }

        Ok(None)
    }

    /// Store a value in both tiers.
    async fn insert(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at: Utc::now(),
            ttl,
            tags: tags.to_vec(),
        };
        self.store.put(&entry).await?;
        self.memory.insert(key.to_string(), entry);
        Ok(())
    }

    /// Fetch the cached value for `key` or compute and store it.
    ///
    /// Guarantees at most one concurrent computation per key: a second
    /// caller with the same key waits on the first flight and then reads
    /// the stored value. Different keys never contend (no global lock).
    ///
    /// A compute failure is returned as `CacheError::ComputeFailed` and
    /// leaves no poisoned state behind.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[String],
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(json) = self.lookup(key).await? {
            return deserialize_value(&json);
        }

        // Slow path: acquire this key's flight lock. Whoever wins the
        // race computes; everyone else blocks here and re-checks.
        let flight = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        if let Some(json) = self.lookup(key).await? {
            self.inflight.remove(key);
            return deserialize_value(&json);
        }

        let result = compute().await;
        self.inflight.remove(key);

        match result {
            Ok(value) => {
                let json = serde_json::to_string(&value).map_err(|e| CacheError::Store {
                    reason: format!("failed to serialize value: {e}"),
                })?;
                if let Err(e) = self.insert(key, json, ttl, tags).await {
                    // A write failure degrades to "uncached", not a user error
                    warn!(key, error = %e, "Failed to persist cache entry");
                }
                Ok(value)
            }
            Err(e) => Err(CacheError::ComputeFailed {
                reason: e.to_string(),
            }),
        }
    }

    /// Fetch the cached value for `key` without computing.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.lookup(key).await? {
            Some(json) => deserialize_value(&json).map(Some),
            None => Ok(None),
        }
    }

    /// Purge every entry carrying the given tag from both tiers.
    ///
    /// Used to drop all responses generated under a stale persona or
    /// prompt-template version at once.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        self.memory
            .retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        let removed = self.store.invalidate_tag(tag).await?;
        debug!(tag, removed, "Invalidated cache entries by tag");
        Ok(removed)
    }

    /// Remove a single entry from both tiers.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.memory.remove(key);
        self.store.remove(key).await
    }

    /// Number of live entries in the hot tier (diagnostics).
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }
}

fn deserialize_value<T: DeserializeOwned>(json: &str) -> Result<T, CacheError> {
    serde_json::from_str(json).map_err(|e| CacheError::Deserialization {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory CacheStore for tests.
    #[derive(Default)]
    struct TestStore {
        entries: DashMap<String, CacheEntry>,
    }

    impl CacheStore for TestStore {
        async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Ok(self.entries.get(key).map(|e| e.clone()))
        }

        async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
            self.entries.insert(entry.key.clone(), entry.clone());
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), CacheError> {
            self.entries.remove(key);
            Ok(())
        }

        async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
            let before = self.entries.len();
            self.entries
                .retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
            Ok((before - self.entries.len()) as u64)
        }

        async fn purge_expired(&self) -> Result<u64, CacheError> {
            let now = Utc::now();
            let before = self.entries.len();
            self.entries.retain(|_, entry| !entry.is_expired(now));
            Ok((before - self.entries.len()) as u64)
        }
    }

    fn ttl() -> Duration {
        Duration::from_secs(300)
    }

    #[tokio::test]
    async fn test_compute_then_hit() {
        let cache = ResponseCache::new(TestStore::default());
        let calls = AtomicU32::new(0);

        let first: String = cache
            .get_or_compute("k1", ttl(), &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>("hello".to_string())
            })
            .await
            .unwrap();
        assert_eq!(first, "hello");

        let second: String = cache
            .get_or_compute("k1", ttl(), &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>("recomputed".to_string())
            })
            .await
            .unwrap();
        assert_eq!(second, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_concurrent_callers() {
        let cache = Arc::new(ResponseCache::new(TestStore::default()));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", ttl(), &[], move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Hold the flight open long enough for every
                            // caller to pile up behind the key lock
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, CacheError>("computed once".to_string())
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            let value: String = handle.await.unwrap();
            assert_eq!(value, "computed once");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "compute ran more than once");
    }

    #[tokio::test]
    async fn test_failed_compute_does_not_poison() {
        let cache = ResponseCache::new(TestStore::default());

        let failed = cache
            .get_or_compute::<String, _, _, _>("k", ttl(), &[], || async {
                Err::<String, _>(CacheError::Store {
                    reason: "upstream boom".to_string(),
                })
            })
            .await;
        assert!(matches!(failed, Err(CacheError::ComputeFailed { .. })));

        // The next caller computes fresh rather than seeing the failure
        let value: String = cache
            .get_or_compute("k", ttl(), &[], || async {
                Ok::<_, CacheError>("recovered".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "recovered");
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let cache = ResponseCache::new(TestStore::default());

        let _: String = cache
            .get_or_compute("k", Duration::from_secs(0), &[], || async {
                Ok::<_, CacheError>("stale".to_string())
            })
            .await
            .unwrap();

        let value: String = cache
            .get_or_compute("k", ttl(), &[], || async {
                Ok::<_, CacheError>("fresh".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "fresh");
    }

    #[tokio::test]
    async fn test_persistent_tier_promotion() {
        let store = TestStore::default();
        store
            .put(&CacheEntry {
                key: "warm".to_string(),
                value: serde_json::to_string("from disk").unwrap(),
                created_at: Utc::now(),
                ttl: ttl(),
                tags: vec![],
            })
            .await
            .unwrap();

        let cache = ResponseCache::new(store);
        assert_eq!(cache.memory_len(), 0);

        let value: Option<String> = cache.get("warm").await.unwrap();
        assert_eq!(value.as_deref(), Some("from disk"));
        // Promoted to the hot tier on hit
        assert_eq!(cache.memory_len(), 1);
    }

    #[tokio::test]
    async fn test_tag_invalidation_purges_both_tiers() {
        let cache = ResponseCache::new(TestStore::default());

        let tags = vec!["persona:v1".to_string()];
        let _: String = cache
            .get_or_compute("a", ttl(), &tags, || async {
                Ok::<_, CacheError>("a-value".to_string())
            })
            .await
            .unwrap();
        let _: String = cache
            .get_or_compute("b", ttl(), &[], || async {
                Ok::<_, CacheError>("b-value".to_string())
            })
            .await
            .unwrap();

        let removed = cache.invalidate_tag("persona:v1").await.unwrap();
        assert_eq!(removed, 1);

        let a: Option<String> = cache.get("a").await.unwrap();
        assert!(a.is_none());
        let b: Option<String> = cache.get("b").await.unwrap();
        assert_eq!(b.as_deref(), Some("b-value"));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let cache = Arc::new(ResponseCache::new(TestStore::default()));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", ttl(), &[], || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, CacheError>("slow".to_string())
                    })
                    .await
                    .unwrap()
            })
        };

        // The fast key completes while the slow flight is still open
        let fast: String = tokio::time::timeout(
            Duration::from_millis(100),
            cache.get_or_compute("fast", ttl(), &[], || async {
                Ok::<_, CacheError>("fast".to_string())
            }),
        )
        .await
        .expect("fast key blocked behind unrelated flight")
        .unwrap();
        assert_eq!(fast, "fast");

        let slow_value: String = slow.await.unwrap();
        assert_eq!(slow_value, "slow");
    }
}
