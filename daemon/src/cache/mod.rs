// SPDX-License-Identifier: MIT
//! Hover documentation cache.
//!
//! Keys are (uri, line, column, content-hash); since the current on-disk
//! hash is part of every lookup, an entry can only ever be read back while
//! the file still has the content it was computed against. No explicit
//! invalidation exists or is needed — stale entries just stop being hit
//! and age out of the LRU.
//!
//! The cache is process-lifetime in memory, serialized to a JSON file on
//! graceful shutdown and reloaded at startup so warm docs survive daemon
//! restarts.

use std::path::Path;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use leta_proto::CacheInfo;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoverKey {
    pub uri: String,
    pub line: u32,
    pub column: u32,
    pub content_hash: String,
}

impl HoverKey {
    fn approx_bytes(&self) -> u64 {
        (self.uri.len() + self.content_hash.len() + 16) as u64
    }
}

struct Inner {
    lru: LruCache<HoverKey, String>,
    current_bytes: u64,
}

pub struct HoverCache {
    inner: Mutex<Inner>,
    max_bytes: u64,
}

impl HoverCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                current_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Hits are only possible when `content_hash` is the file's current
    /// hash, because it is part of the key.
    pub async fn get(&self, key: &HoverKey) -> Option<String> {
        self.inner.lock().await.lru.get(key).cloned()
    }

    pub async fn insert(&self, key: HoverKey, hover: String) {
        let mut inner = self.inner.lock().await;
        let added = key.approx_bytes() + hover.len() as u64;
        if let Some(old) = inner.lru.push(key, hover) {
            inner.current_bytes = inner
                .current_bytes
                .saturating_sub(old.0.approx_bytes() + old.1.len() as u64);
        }
        inner.current_bytes += added;
        while inner.current_bytes > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((k, v)) => {
                    inner.current_bytes = inner
                        .current_bytes
                        .saturating_sub(k.approx_bytes() + v.len() as u64);
                }
                None => break,
            }
        }
    }

    pub async fn info(&self) -> CacheInfo {
        let inner = self.inner.lock().await;
        CacheInfo {
            current_bytes: inner.current_bytes,
            max_bytes: self.max_bytes,
            entries: inner.lru.len() as u64,
        }
    }

    /// Load persisted entries. Unreadable or malformed files start empty.
    pub async fn load(&self, path: &Path) {
        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        let Ok(entries) = serde_json::from_slice::<Vec<(HoverKey, String)>>(&bytes) else {
            warn!(path = %path.display(), "discarding unreadable hover cache file");
            return;
        };
        let count = entries.len();
        for (key, value) in entries {
            self.insert(key, value).await;
        }
        debug!(count, "hover cache loaded");
    }

    /// Persist current entries, most-recently-used last so a reload
    /// re-establishes the same LRU order.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<(&HoverKey, &String)> = inner.lru.iter().collect();
        entries.reverse();
        let bytes = serde_json::to_vec(&entries)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(uri: &str, line: u32, hash: &str) -> HoverKey {
        HoverKey {
            uri: uri.to_string(),
            line,
            column: 0,
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn hit_requires_matching_content_hash() {
        let cache = HoverCache::new(1024);
        cache
            .insert(key("file:///a.rs", 3, "hash-1"), "fn a()".into())
            .await;

        assert_eq!(cache.get(&key("file:///a.rs", 3, "hash-1")).await.as_deref(), Some("fn a()"));
        // Same position, new file content: no hit.
        assert!(cache.get(&key("file:///a.rs", 3, "hash-2")).await.is_none());
    }

    #[tokio::test]
    async fn byte_budget_evicts_least_recent() {
        // Each entry is ~109 bytes; the budget fits two but not three.
        let cache = HoverCache::new(250);
        cache.insert(key("file:///a.rs", 1, "h"), "x".repeat(80)).await;
        cache.insert(key("file:///b.rs", 1, "h"), "y".repeat(80)).await;
        // Touch a so b becomes the eviction candidate.
        assert!(cache.get(&key("file:///a.rs", 1, "h")).await.is_some());
        cache.insert(key("file:///c.rs", 1, "h"), "z".repeat(80)).await;

        let info = cache.info().await;
        assert!(info.current_bytes <= 250);
        assert!(cache.get(&key("file:///a.rs", 1, "h")).await.is_some());
        assert!(cache.get(&key("file:///b.rs", 1, "h")).await.is_none());
        assert!(cache.get(&key("file:///c.rs", 1, "h")).await.is_some());
    }

    #[tokio::test]
    async fn persistence_roundtrip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hover_cache.json");

        let cache = HoverCache::new(4096);
        cache.insert(key("file:///a.rs", 1, "h1"), "doc a".into()).await;
        cache.insert(key("file:///b.rs", 2, "h2"), "doc b".into()).await;
        cache.save(&file).await.unwrap();

        let reloaded = HoverCache::new(4096);
        reloaded.load(&file).await;
        assert_eq!(reloaded.get(&key("file:///a.rs", 1, "h1")).await.as_deref(), Some("doc a"));
        assert_eq!(reloaded.get(&key("file:///b.rs", 2, "h2")).await.as_deref(), Some("doc b"));
        assert_eq!(reloaded.info().await.entries, 2);
    }

    #[tokio::test]
    async fn corrupt_persistence_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hover_cache.json");
        std::fs::write(&file, b"{not json").unwrap();

        let cache = HoverCache::new(4096);
        cache.load(&file).await;
        assert_eq!(cache.info().await.entries, 0);
    }
}
