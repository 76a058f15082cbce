//! Topic snapshot cache used for subscriber catch-up.
//!
//! The cache is advisory: a miss, an error, or no cache at all simply means
//! a new subscriber waits for the next live message.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use crate::errors::CacheError;

/// Last-known payload per topic.
#[async_trait]
pub trait TopicCache: Send + Sync {
    /// Most recent payload for `topic`, if any and not expired.
    async fn get(&self, topic: &str) -> Result<Option<Value>, CacheError>;
    /// Store `payload` for `topic` for `ttl`.
    async fn set(&self, topic: &str, payload: Value, ttl: Duration) -> Result<(), CacheError>;
    /// Drop expired entries; returns how many were removed. Caches that
    /// expire on their own keep the default.
    fn purge_expired(&self) -> usize {
        0
    }
}

struct Entry {
    payload: Value,
    expires_at: Instant,
}

/// In-process [`TopicCache`]. Expired entries are dropped on read and by
/// [`TopicCache::purge_expired`], which the reaper calls on every sweep.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TopicCache for MemoryCache {
    async fn get(&self, topic: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        let hit = self.entries.get(topic).and_then(|e| {
            if e.expires_at > now {
                Some(e.payload.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            let _ = self.entries.remove_if(topic, |_, e| e.expires_at <= now);
        }
        Ok(hit)
    }

    async fn set(&self, topic: &str, payload: Value, ttl: Duration) -> Result<(), CacheError> {
        let _ = self.entries.insert(
            topic.to_owned(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn set_then_get() {
        let cache = MemoryCache::new();
        cache
            .set("NIFTY", json!({"ltp": 1}), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(cache.get("NIFTY").await.unwrap(), Some(json!({"ltp": 1})));
        assert_eq!(cache.get("BANKNIFTY").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("NIFTY", json!(1), Duration::from_secs(30))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get("NIFTY").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn later_set_overwrites() {
        let cache = MemoryCache::new();
        cache.set("X", json!(1), Duration::from_secs(5)).await.unwrap();
        cache.set("X", json!(2), Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("X").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_counts() {
        let cache = MemoryCache::new();
        cache.set("A", json!(1), Duration::from_secs(1)).await.unwrap();
        cache.set("B", json!(1), Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
