//! Bounded, process-wide response cache.

use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::entry::CachedEntry;
use crate::config::CacheConfig;
use crate::error::{ClientError, ClientResult};
use crate::http::headers::Headers;
use crate::observability::metrics;

/// ETag-validated response cache with least-recently-used eviction.
///
/// Every operation takes the internal lock for its whole duration, so
/// insert, evict and lookup are serialized across concurrent executions.
/// Once [`close`](Self::close) has run, every call fails with
/// [`ClientError::Disposed`].
pub struct ResponseCache {
    entries: Mutex<Option<LruCache<String, CachedEntry>>>,
    capacity: NonZeroUsize,
}

impl ResponseCache {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Some(LruCache::new(capacity))),
            capacity,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut LruCache<String, CachedEntry>) -> R,
    ) -> ClientResult<R> {
        let mut guard = self.entries.lock();
        let entries = guard.as_mut().ok_or(ClientError::Disposed)?;
        Ok(f(entries))
    }

    /// Look up `url`, marking it most recently used.
    pub fn get(&self, url: &str) -> ClientResult<Option<CachedEntry>> {
        self.with_entries(|entries| entries.get(url).cloned())
    }

    /// Store a response. Returns `false` (and stores nothing) when the
    /// headers carry no ETag.
    pub fn set(&self, url: &str, data: Value, headers: &Headers) -> ClientResult<bool> {
        if headers.etag().is_none() {
            return Ok(false);
        }
        let entry = CachedEntry::new(url, data, headers.clone());
        let size = self.with_entries(|entries| {
            if let Some((evicted, _)) = entries.push(url.to_string(), entry) {
                if evicted != url {
                    tracing::debug!(url = %evicted, "Evicted cached response");
                    metrics::record_cache_eviction();
                }
            }
            entries.len()
        })?;
        metrics::record_cache_size(size);
        Ok(true)
    }

    /// Reset the capture time of an entry after a `304`, returning it.
    pub fn refresh(&self, url: &str) -> ClientResult<Option<CachedEntry>> {
        self.with_entries(|entries| {
            entries.get_mut(url).map(|entry| {
                entry.captured_at = Instant::now();
                entry.clone()
            })
        })
    }

    /// Clear the force-check bit of one entry once a revalidation is under way.
    pub fn clear_force_check(&self, url: &str) -> ClientResult<()> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.peek_mut(url) {
                entry.force_server_check = false;
            }
        })
    }

    /// Flag every entry of `database` for revalidation without evicting it.
    /// Returns the number of entries flagged.
    pub fn force_server_check(&self, database: &str) -> ClientResult<usize> {
        self.with_entries(|entries| {
            let mut flagged = 0;
            for (_, entry) in entries.iter_mut() {
                let matches = entry
                    .database
                    .as_deref()
                    .is_some_and(|db| db.eq_ignore_ascii_case(database));
                if matches {
                    entry.force_server_check = true;
                    flagged += 1;
                }
            }
            flagged
        })
    }

    pub fn len(&self) -> ClientResult<usize> {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> ClientResult<bool> {
        self.len().map(|n| n == 0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().is_none()
    }

    /// Drop every entry; later calls fail with `Disposed`.
    pub fn close(&self) {
        if self.entries.lock().take().is_some() {
            metrics::record_cache_size(0);
            tracing::debug!("Response cache closed");
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, url: &str, by: std::time::Duration) {
        let mut guard = self.entries.lock();
        if let Some(entry) = guard.as_mut().and_then(|e| e.peek_mut(url)) {
            if let Some(earlier) = entry.captured_at.checked_sub(by) {
                entry.captured_at = earlier;
            }
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn etag(value: &str) -> Headers {
        [("ETag", value)].into_iter().collect()
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(2);
        cache.set("u1", json!(1), &etag("a")).unwrap();
        cache.set("u2", json!(2), &etag("b")).unwrap();
        cache.set("u3", json!(3), &etag("c")).unwrap();

        assert!(cache.get("u1").unwrap().is_none());
        assert!(cache.get("u2").unwrap().is_some());
        assert!(cache.get("u3").unwrap().is_some());
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn test_get_promotes_entry() {
        let cache = ResponseCache::new(2);
        cache.set("u1", json!(1), &etag("a")).unwrap();
        cache.set("u2", json!(2), &etag("b")).unwrap();
        cache.get("u1").unwrap();
        cache.set("u3", json!(3), &etag("c")).unwrap();

        assert!(cache.get("u1").unwrap().is_some());
        assert!(cache.get("u2").unwrap().is_none());
    }

    #[test]
    fn test_set_without_etag_is_noop() {
        let cache = ResponseCache::new(4);
        assert!(!cache.set("u1", json!({"a": 1}), &Headers::new()).unwrap());
        assert!(!cache.set("u1", json!({"a": 1}), &etag("")).unwrap());
        assert!(cache.get("u1").unwrap().is_none());
    }

    #[test]
    fn test_returned_data_is_isolated() {
        let cache = ResponseCache::new(4);
        cache
            .set("u1", json!({"name": "original"}), &etag("e1"))
            .unwrap();

        let mut entry = cache.get("u1").unwrap().unwrap();
        Arc::make_mut(&mut entry.data)["name"] = json!("changed");

        let again = cache.get("u1").unwrap().unwrap();
        assert_eq!(again.data["name"], "original");
    }

    #[test]
    fn test_force_server_check_by_database() {
        let cache = ResponseCache::new(4);
        cache
            .set("http://h/databases/a/docs?id=1", json!(1), &etag("x"))
            .unwrap();
        cache
            .set("http://h/databases/b/docs?id=1", json!(2), &etag("y"))
            .unwrap();

        assert_eq!(cache.force_server_check("A").unwrap(), 1);
        assert!(
            cache
                .get("http://h/databases/a/docs?id=1")
                .unwrap()
                .unwrap()
                .force_server_check
        );
        assert!(
            !cache
                .get("http://h/databases/b/docs?id=1")
                .unwrap()
                .unwrap()
                .force_server_check
        );

        cache.clear_force_check("http://h/databases/a/docs?id=1").unwrap();
        assert!(
            !cache
                .get("http://h/databases/a/docs?id=1")
                .unwrap()
                .unwrap()
                .force_server_check
        );
    }

    #[test]
    fn test_refresh_resets_age() {
        let cache = ResponseCache::new(4);
        cache.set("u1", json!(1), &etag("a")).unwrap();
        cache.backdate("u1", Duration::from_secs(60));
        assert!(cache.get("u1").unwrap().unwrap().age() >= Duration::from_secs(60));

        let refreshed = cache.refresh("u1").unwrap().unwrap();
        assert!(refreshed.age() < Duration::from_secs(5));
        assert!(cache.refresh("missing").unwrap().is_none());
    }

    #[test]
    fn test_closed_cache_is_disposed() {
        let cache = ResponseCache::new(4);
        cache.set("u1", json!(1), &etag("a")).unwrap();
        cache.close();

        assert!(cache.is_closed());
        assert!(matches!(cache.get("u1"), Err(ClientError::Disposed)));
        assert!(matches!(
            cache.set("u1", json!(1), &etag("a")),
            Err(ClientError::Disposed)
        ));
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(ResponseCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let url = format!("u{}-{}", t, i);
                        cache.set(&url, json!(i), &etag("e")).unwrap();
                        cache.get(&url).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len().unwrap(), 64);
    }
}
