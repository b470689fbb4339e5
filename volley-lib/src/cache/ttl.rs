use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::Response;

#[derive(Debug)]
struct CacheEntry {
    inserted_at: Instant,
    response: Arc<Response>,
}

/// Response cache keyed by the full URL with a fixed time-to-live.
///
/// Expired entries are removed lazily when read. When a write would exceed
/// `max_entries`, one arbitrary entry is evicted; this is not an LRU.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    /// Create an empty cache. `max_entries == 0` disables storing.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `url`, dropping the entry if it outlived the TTL
    ///
    /// # Panics
    ///
    /// Panics if the cache mutex is poisoned
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<Response>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get(url)?;
        if entry.inserted_at.elapsed() > self.ttl {
            entries.remove(url);
            return None;
        }
        Some(entry.response.clone())
    }

    /// Store `response` under `url`
    ///
    /// # Panics
    ///
    /// Panics if the cache mutex is poisoned
    pub fn put(&self, url: &str, response: Arc<Response>) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries
            && !entries.contains_key(url)
            && let Some(victim) = entries.keys().next().cloned()
        {
            entries.remove(&victim);
        }
        entries.insert(
            url.to_string(),
            CacheEntry {
                inserted_at: Instant::now(),
                response,
            },
        );
    }

    /// Number of stored entries, expired ones included
    ///
    /// # Panics
    ///
    /// Panics if the cache mutex is poisoned
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries
    ///
    /// # Panics
    ///
    /// Panics if the cache mutex is poisoned
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::response;

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_returns_same_object() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        let stored = Arc::new(response("http://h.example/a", 200));
        cache.put("http://h.example/a", stored.clone());

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = cache.get("http://h.example/a").unwrap();
        assert!(Arc::ptr_eq(&hit, &stored));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_evicted_on_read() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        cache.put("http://h.example/a", Arc::new(response("http://h.example/a", 200)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("http://h.example/a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_is_respected() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        for i in 0..5 {
            let url = format!("http://h.example/{i}");
            cache.put(&url, Arc::new(response(&url, 200)));
            assert!(cache.len() <= 2);
        }
        // The latest write always survives
        assert!(cache.get("http://h.example/4").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.put("a", Arc::new(response("http://h.example/a", 200)));
        cache.put("b", Arc::new(response("http://h.example/b", 200)));
        cache.put("b", Arc::new(response("http://h.example/b", 404)));
        assert!(cache.get("a").is_some());
        assert_eq!(cache.get("b").unwrap().status().as_u16(), 404);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = ResponseCache::new(Duration::from_secs(60), 0);
        cache.put("a", Arc::new(response("http://h.example/a", 200)));
        assert!(cache.is_empty());
    }
}
