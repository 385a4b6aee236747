//! CacheStore trait definition.
//!
//! The persistent tier of the response cache. Implementations live in
//! stride-infra (e.g., `SqliteCacheStore`). Uses native async fn in
//! traits (RPITIT, Rust 2024 edition).

use stride_types::cache::{CacheEntry, CacheError};

/// Persistent storage contract for the response cache.
///
/// The store is responsible for durability across process restarts; the
/// in-memory hot tier lives in [`super::ResponseCache`]. Expired entries
/// may be returned by `get` -- the cache treats them as misses and calls
/// `remove`, so stores don't need their own expiry sweep (though
/// `purge_expired` lets hosts reclaim space on their own schedule).
pub trait CacheStore: Send + Sync {
    /// Fetch an entry by key, expired or not.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Insert or replace an entry.
    fn put(
        &self,
        entry: &CacheEntry,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;

    /// Remove a single entry. Removing a missing key is not an error.
    fn remove(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;

    /// Remove every entry carrying the given tag. Returns the count removed.
    fn invalidate_tag(
        &self,
        tag: &str,
    ) -> impl std::future::Future<Output = Result<u64, CacheError>> + Send;

    /// Remove every expired entry. Returns the count removed.
    fn purge_expired(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, CacheError>> + Send;
}
