use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

use crate::Response;
use crate::utils::url::dedup_key;

/// Path-level response deduplication.
///
/// All URLs sharing host and canonical path (query and fragment ignored) map
/// to the first response stored for that path. Entries are written once and
/// never replaced.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: DashMap<String, Arc<Response>>,
}

impl DedupCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The response first seen for the path of `url`
    #[must_use]
    pub fn get(&self, url: &Url) -> Option<Arc<Response>> {
        self.entries.get(&dedup_key(url)).map(|r| r.clone())
    }

    /// Store `response` for the path of `url` unless one is already stored.
    /// Returns the retained response.
    pub fn insert(&self, url: &Url, response: Arc<Response>) -> Arc<Response> {
        self.entries
            .entry(dedup_key(url))
            .or_insert(response)
            .clone()
    }

    /// Number of deduplicated paths
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was stored yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::response;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_query_variants_share_an_entry() {
        let cache = DedupCache::new();
        let first = Arc::new(response("http://h.example/a?x=1", 200));
        cache.insert(&url("http://h.example/a?x=1"), first.clone());

        let hit = cache.get(&url("http://H.example//a/?x=2#frag")).unwrap();
        assert!(Arc::ptr_eq(&hit, &first));
        assert!(cache.get(&url("http://h.example/b")).is_none());
    }

    #[test]
    fn test_first_writer_wins() {
        let cache = DedupCache::new();
        let first = Arc::new(response("http://h.example/a", 200));
        let second = Arc::new(response("http://h.example/a", 500));

        let kept = cache.insert(&url("http://h.example/a"), first.clone());
        assert!(Arc::ptr_eq(&kept, &first));
        let kept = cache.insert(&url("http://h.example/a?y=1"), second);
        assert!(Arc::ptr_eq(&kept, &first));
        assert_eq!(cache.len(), 1);
    }
}
