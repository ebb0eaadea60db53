//! Response cache in front of a query service
//!
//! Responses are stored under a hash of the full query text, so any change to
//! the area, the queried items or the timeout misses the cache. Entries older
//! than the TTL are swept when the cache is opened. Cache failures are logged
//! and never fail a fetch.

use crate::storage::{StorageBackend, load_json_backend, save_json_backend};
use gpx_poi_lib::{OverpassResponse, QueryService};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const KEY_PREFIX: &str = "overpass:";

#[derive(Debug, Deserialize)]
struct CacheEntry {
    /// Seconds since the Unix epoch
    ts: u64,
    response: OverpassResponse,
}

/// Timestamp of an entry without decoding its response
#[derive(Deserialize)]
struct EntryStamp {
    ts: u64,
}

pub struct CachedService<S> {
    inner: S,
    storage: Box<dyn StorageBackend>,
    ttl: Duration,
}

impl<S: QueryService> CachedService<S> {
    pub fn new(inner: S, storage: Box<dyn StorageBackend>, ttl: Duration) -> Self {
        let cached = Self {
            inner,
            storage,
            ttl,
        };
        cached.sweep(unix_now());
        cached
    }

    /// Drop cached responses that are expired or unreadable; returns how many
    fn sweep(&self, now: u64) -> usize {
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to list cache entries: {}", e);
                return 0;
            }
        };

        let mut evicted = 0;
        for key in keys.iter().filter(|key| key.starts_with(KEY_PREFIX)) {
            let fresh = match load_json_backend::<EntryStamp>(self.storage.as_ref(), key) {
                Ok(Some(stamp)) => now.saturating_sub(stamp.ts) <= self.ttl.as_secs(),
                Ok(None) => continue,
                Err(_) => false,
            };
            if fresh {
                continue;
            }
            match self.storage.remove(key) {
                Ok(()) => evicted += 1,
                Err(e) => tracing::warn!("Failed to evict cache entry {}: {}", key, e),
            }
        }
        if evicted > 0 {
            tracing::debug!("Evicted {} stale cache entries", evicted);
        }
        evicted
    }

    fn lookup(&self, key: &str, now: u64) -> Option<OverpassResponse> {
        let entry = match load_json_backend::<CacheEntry>(self.storage.as_ref(), key) {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry {}: {}", key, e);
                return None;
            }
        };

        let age = now.saturating_sub(entry.ts);
        if age > self.ttl.as_secs() {
            tracing::debug!("Cache entry {} expired ({} s old)", key, age);
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!("Failed to evict cache entry {}: {}", key, e);
            }
            return None;
        }

        tracing::info!("Using cached response {} ({} s old)", key, age);
        Some(entry.response)
    }

    fn store(&self, key: &str, now: u64, response: &OverpassResponse) {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            ts: u64,
            response: &'a OverpassResponse,
        }
        let entry = Borrowed { ts: now, response };
        if let Err(e) = save_json_backend(self.storage.as_ref(), key, &entry) {
            tracing::warn!("Failed to cache response {}: {}", key, e);
        }
    }
}

impl<S: QueryService> QueryService for CachedService<S> {
    fn query(&self, ql: &str) -> impl Future<Output = gpx_poi_lib::Result<OverpassResponse>> {
        async move {
            let key = cache_key(ql);
            let now = unix_now();
            if let Some(response) = self.lookup(&key, now) {
                return Ok(response);
            }
            let response = self.inner.query(ql).await?;
            self.store(&key, now, &response);
            Ok(response)
        }
    }
}

/// FNV-1a 64 of the query text
pub fn cache_key(query: &str) -> String {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = query
        .bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME));
    format!("{KEY_PREFIX}{hash:016x}")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageResult;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStorage(Mutex<HashMap<String, String>>);

    impl StorageBackend for MemoryStorage {
        fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
            self.0.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }

        fn keys(&self) -> StorageResult<Vec<String>> {
            Ok(self.0.lock().unwrap().keys().cloned().collect())
        }
    }

    #[derive(Default)]
    struct CountingService {
        calls: AtomicUsize,
    }

    impl QueryService for CountingService {
        async fn query(&self, _ql: &str) -> gpx_poi_lib::Result<OverpassResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OverpassResponse::from_json(
                r#"{"elements": [{"type": "node", "id": 1, "lat": 48.0, "lon": 16.0}]}"#,
            )
        }
    }

    #[test]
    fn test_cache_key() {
        // FNV-1a 64 test vectors
        assert_eq!(cache_key(""), "overpass:cbf29ce484222325");
        assert_eq!(cache_key("a"), "overpass:af63dc4c8601ec8c");
        assert_ne!(cache_key("[timeout:90]"), cache_key("[timeout:25]"));
    }

    #[tokio::test]
    async fn test_second_query_hits_cache() {
        let cached = CachedService::new(
            CountingService::default(),
            Box::new(MemoryStorage::default()),
            Duration::from_secs(3600),
        );
        let first = cached.query("q").await.unwrap();
        let second = cached.query("q").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        cached.query("other").await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_opening_evicts_stale_entries_under_other_keys() {
        let storage = MemoryStorage::default();
        let fresh = format!(r#"{{"ts": {}, "response": {{"elements": []}}}}"#, unix_now());
        storage
            .set_string(&cache_key("stale"), r#"{"ts": 0, "response": {"elements": []}}"#)
            .unwrap();
        storage.set_string(&cache_key("broken"), "not json").unwrap();
        storage.set_string(&cache_key("fresh"), &fresh).unwrap();
        storage.set_string("settings", r#"{"ts": 0}"#).unwrap();

        let cached = CachedService::new(
            CountingService::default(),
            Box::new(storage),
            Duration::from_secs(3600),
        );
        let mut keys = cached.storage.keys().unwrap();
        keys.sort();
        let mut expected = vec![cache_key("fresh"), "settings".to_string()];
        expected.sort();
        assert_eq!(keys, expected);

        // A query for some other key leaves the fresh entry in place
        cached.query("new").await.unwrap();
        assert_eq!(cached.storage.keys().unwrap().len(), 3);
        assert!(cached.query("fresh").await.unwrap().elements.is_empty());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_and_corrupt_entries_refetch() {
        let storage = MemoryStorage::default();
        storage
            .set_string(&cache_key("old"), r#"{"ts": 0, "response": {"elements": []}}"#)
            .unwrap();
        storage.set_string(&cache_key("bad"), "not json").unwrap();
        let cached = CachedService::new(
            CountingService::default(),
            Box::new(storage),
            Duration::from_secs(3600),
        );

        assert_eq!(cached.query("old").await.unwrap().elements.len(), 1);
        assert_eq!(cached.query("bad").await.unwrap().elements.len(), 1);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }
}
