use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use moka::{Expiry, Instant};
use serde::{de::DeserializeOwned, Serialize};

/// A stored fingerprint value plus the TTL it was written with, so
/// `PerEntryExpiry` can read each entry's own policy back off the value
/// instead of applying one cache-wide duration.
struct StoredEntry {
    ttl: Duration,
    data: Vec<u8>,
}

/// Per-entry expiry: every fingerprint expires `ttl` after it was written,
/// where `ttl` came from whichever of `put`/`put_content` wrote it.
struct PerEntryExpiry;

impl Expiry<String, Arc<StoredEntry>> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<StoredEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded TTL map over logical fingerprints. Backed by `moka::sync::Cache`
/// for the TTL-plus-approximate-LRU bounded-map role. Values are stored
/// pre-serialized so a single cache can hold heterogeneous entry types
/// (book, chapter page, content, category list) under one
/// fingerprint-keyed namespace. Each entry carries its own TTL via
/// `PerEntryExpiry` rather than one duration for the whole cache, so
/// `put` (metadata/list fingerprints) and `put_content` (chapter text)
/// expire independently.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, Arc<StoredEntry>>,
    default_ttl: Duration,
    content_ttl: Duration,
}

impl MemoryCache {
    pub fn new(max_items: u64, default_ttl: Duration, content_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_items)
            .expire_after(PerEntryExpiry)
            .build();
        Self {
            inner,
            default_ttl,
            content_ttl,
        }
    }

    /// Fingerprint namespaces: `book:{id}`, `chapters:{id}:page:{n}`,
    /// `content:{id}:{chapter_key}`, `categories`, `cat:{id}:{page}`.
    pub fn book_key(book_id: &str) -> String {
        format!("book:{book_id}")
    }

    pub fn chapters_page_key(book_id: &str, page: u32) -> String {
        format!("chapters:{book_id}:page:{page}")
    }

    pub fn content_key(book_id: &str, chapter_key: &str) -> String {
        format!("content:{book_id}:{chapter_key}")
    }

    pub fn categories_key() -> String {
        "categories".to_string()
    }

    pub fn category_page_key(category_id: &str, page: u32) -> String {
        format!("cat:{category_id}:{page}")
    }

    /// `moka` evicts expired entries lazily, so "present" here already
    /// implies fresh.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.inner.get(key)?;
        serde_json::from_slice(&entry.data).ok()
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_content<T: Serialize>(&self, key: &str, value: &T) {
        self.put_with_ttl(key, value, self.content_ttl);
    }

    /// Serializes `value` and inserts it under `key` with its own `ttl`,
    /// independent of whatever TTL other entries in the cache were written
    /// with. `PerEntryExpiry::expire_after_create` reads `ttl` back off the
    /// stored entry when `moka` schedules its expiration.
    fn put_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(data) = serde_json::to_vec(value) {
            self.inner.insert(key.to_string(), Arc::new(StoredEntry { ttl, data }));
        }
    }

    /// Drops every entry whose key starts with `prefix`. Used by
    /// force-resync and `/admin/cache/clear`.
    pub fn invalidate(&self, prefix: &str) {
        let prefix = prefix.to_string();
        self.inner.invalidate_entries_if(move |key, _| key.starts_with(&prefix)).ok();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = MemoryCache::new(100, Duration::from_secs(60), Duration::from_secs(300));
        let key = MemoryCache::book_key("b1");
        cache.put(&key, &vec!["a".to_string(), "b".to_string()]);
        let value: Option<Vec<String>> = cache.get(&key);
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn invalidate_drops_only_matching_prefix() {
        let cache = MemoryCache::new(100, Duration::from_secs(60), Duration::from_secs(300));
        cache.put(&MemoryCache::book_key("b1"), &"book-one");
        cache.put(&MemoryCache::chapters_page_key("b1", 1), &"page-one");
        cache.put(&MemoryCache::book_key("b2"), &"book-two");

        cache.invalidate("book:b1");
        cache.inner.run_pending_tasks();

        assert_eq!(cache.get::<String>(&MemoryCache::book_key("b1")), None);
        assert_eq!(
            cache.get::<String>(&MemoryCache::chapters_page_key("b1", 1)),
            Some("page-one".to_string())
        );
        assert_eq!(
            cache.get::<String>(&MemoryCache::book_key("b2")),
            Some("book-two".to_string())
        );
    }

    #[test]
    fn put_and_put_content_expire_on_their_own_ttl() {
        let cache = MemoryCache::new(100, Duration::from_millis(20), Duration::from_secs(300));
        cache.put(&MemoryCache::book_key("b1"), &"book-one");
        cache.put_content(&MemoryCache::content_key("b1", "c1"), &"chapter text");

        std::thread::sleep(Duration::from_millis(80));
        cache.inner.run_pending_tasks();

        assert_eq!(cache.get::<String>(&MemoryCache::book_key("b1")), None);
        assert_eq!(
            cache.get::<String>(&MemoryCache::content_key("b1", "c1")),
            Some("chapter text".to_string())
        );
    }
}
