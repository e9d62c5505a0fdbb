//! Process-local cache backend on `moka`.

use super::{CacheBackend, CacheEntry, CacheError, Fingerprint};
use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded in-memory backend with least-recently-used eviction and an
/// optional maximum entry age.
pub struct MemoryCacheBackend {
    entries: Cache<Fingerprint, CacheEntry>,
    max_age: Option<Duration>,
    evictions: Arc<AtomicU64>,
}

impl MemoryCacheBackend {
    pub fn new(max_entries: usize, max_age: Option<Duration>) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let listener = {
            let evictions = Arc::clone(&evictions);
            move |_fingerprint: Arc<Fingerprint>, _entry: CacheEntry, cause: RemovalCause| {
                if cause.was_evicted() {
                    evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        };

        let mut builder = Cache::builder()
            .max_capacity(max_entries.max(1) as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(listener);
        if let Some(age) = max_age {
            builder = builder.time_to_live(age);
        }

        Self {
            entries: builder.build(),
            max_age,
            evictions,
        }
    }

    /// Live entry count after pending evictions are applied.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries written with an old `created_at` are stale even before the
    /// cache's own time-to-live elapses.
    fn is_stale(&self, entry: &CacheEntry) -> bool {
        self.max_age.is_some_and(|age| entry.is_older_than(age))
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry) = self.entries.get(fingerprint).await else {
            return Ok(None);
        };
        if self.is_stale(&entry) {
            self.entries.invalidate(fingerprint).await;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%fingerprint, "Cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        // Entries are immutable: a live entry for this fingerprint wins.
        if let Some(existing) = self.entries.get(fingerprint).await {
            if !self.is_stale(&existing) {
                return Ok(());
            }
            self.entries.invalidate(fingerprint).await;
        }
        self.entries
            .entry_by_ref(fingerprint)
            .or_insert(entry.clone())
            .await;
        Ok(())
    }

    fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Tier;
    use crate::upstream::InferenceResponse;
    use chrono::Utc;

    fn entry(text: &str) -> CacheEntry {
        CacheEntry::new(
            Tier::Cheap,
            "model",
            InferenceResponse {
                text: text.to_string(),
                input_tokens: 10,
                output_tokens: 5,
            },
            0.01,
        )
    }

    fn fp(n: u32) -> Fingerprint {
        Fingerprint::compute("sys", &format!("user {}", n), Tier::Cheap, "model")
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let backend = MemoryCacheBackend::new(10, None);
        backend.put(&fp(1), &entry("one")).await.unwrap();
        let got = backend.get(&fp(1)).await.unwrap().unwrap();
        assert_eq!(got.response.text, "one");
        assert!(backend.get(&fp(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_are_immutable() {
        let backend = MemoryCacheBackend::new(10, None);
        backend.put(&fp(1), &entry("first")).await.unwrap();
        backend.put(&fp(1), &entry("second")).await.unwrap();
        let got = backend.get(&fp(1)).await.unwrap().unwrap();
        assert_eq!(got.response.text, "first");
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts_and_counts() {
        let backend = MemoryCacheBackend::new(2, None);
        for n in 1..=3 {
            backend.put(&fp(n), &entry("value")).await.unwrap();
        }

        assert_eq!(backend.len().await, 2);
        assert_eq!(backend.evictions(), 1);
        assert!(backend.get(&fp(3)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_max_age_never_serves_stale_entry() {
        let backend = MemoryCacheBackend::new(10, Some(Duration::from_secs(60)));
        let mut stale = entry("old");
        stale.created_at = Utc::now() - chrono::Duration::seconds(120);
        backend.put(&fp(1), &stale).await.unwrap();

        assert!(backend.get(&fp(1)).await.unwrap().is_none());
        assert!(backend.is_empty().await);
        assert_eq!(backend.evictions(), 1);
    }

    #[tokio::test]
    async fn test_time_to_live_expires_entries() {
        let backend = MemoryCacheBackend::new(10, Some(Duration::from_millis(50)));
        backend.put(&fp(1), &entry("short-lived")).await.unwrap();
        assert!(backend.get(&fp(1)).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(backend.get(&fp(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_can_be_replaced() {
        let backend = MemoryCacheBackend::new(10, Some(Duration::from_secs(60)));
        let mut stale = entry("old");
        stale.created_at = Utc::now() - chrono::Duration::seconds(120);
        backend.put(&fp(1), &stale).await.unwrap();
        backend.put(&fp(1), &entry("fresh")).await.unwrap();

        let got = backend.get(&fp(1)).await.unwrap().unwrap();
        assert_eq!(got.response.text, "fresh");
    }
}
