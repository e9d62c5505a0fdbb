//! Request-level response cache keyed by content fingerprints.
//!
//! [`FingerprintCache`] sits in front of a [`CacheBackend`] and guarantees
//! at most one in-flight upstream call per fingerprint: concurrent callers
//! with the same fingerprint wait for the first caller's result and count
//! as (coalesced) hits. Backend failures degrade to misses and never fail
//! the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod sqlite;

pub use error::CacheError;
pub use fingerprint::Fingerprint;
pub use memory::MemoryCacheBackend;
pub use sqlite::SqliteCacheBackend;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::routing::Tier;
use crate::upstream::InferenceResponse;

/// A stored upstream response. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub tier: Tier,
    pub model: String,
    pub response: InferenceResponse,
    /// What the call cost when it was made (USD)
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(tier: Tier, model: &str, response: InferenceResponse, cost: f64) -> Self {
        Self {
            tier,
            model: model.to_string(),
            response,
            cost,
            created_at: Utc::now(),
        }
    }

    pub fn is_older_than(&self, age: Duration) -> bool {
        chrono::Duration::from_std(age)
            .map(|age| Utc::now() - self.created_at > age)
            .unwrap_or(false)
    }
}

/// Storage behind the fingerprint cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry. An existing live entry for the fingerprint is kept.
    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Entries dropped for space or age so far.
    fn evictions(&self) -> u64 {
        0
    }
}

/// Build the configured backend.
pub fn build_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, CacheError> {
    Ok(match config.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new(
            config.max_entries,
            config.max_age(),
        )),
        CacheBackendKind::Sqlite => Arc::new(SqliteCacheBackend::open(
            &config.path,
            config.max_entries,
            config.max_age(),
        )?),
    })
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome {
    /// Entry already stored
    Hit(CacheEntry),
    /// Waited on another caller's in-flight request
    Coalesced(CacheEntry),
    /// This caller fetched the entry upstream
    Miss(CacheEntry),
}

impl CacheOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            CacheOutcome::Hit(e) | CacheOutcome::Coalesced(e) | CacheOutcome::Miss(e) => e,
        }
    }

    pub fn into_entry(self) -> CacheEntry {
        match self {
            CacheOutcome::Hit(e) | CacheOutcome::Coalesced(e) | CacheOutcome::Miss(e) => e,
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheOutcome::Miss(_))
    }
}

/// Counters exposed by [`FingerprintCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub lookups: u64,
    /// Includes coalesced hits
    pub hits: u64,
    pub coalesced_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_failures: u64,
    /// Upstream spend avoided by hits (USD)
    pub savings: f64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

type InflightSlot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

/// Savings are accumulated in nanodollars so they fit an atomic.
const NANOS_PER_USD: f64 = 1e9;

/// Coalescing cache front-end shared by all concurrent runs.
pub struct FingerprintCache {
    backend: Arc<dyn CacheBackend>,
    inflight: DashMap<Fingerprint, InflightSlot>,
    lookups: AtomicU64,
    hits: AtomicU64,
    coalesced_hits: AtomicU64,
    misses: AtomicU64,
    write_failures: AtomicU64,
    savings_nanos: AtomicU64,
}

impl FingerprintCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            inflight: DashMap::new(),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            coalesced_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            savings_nanos: AtomicU64::new(0),
        }
    }

    /// In-memory cache with the given capacity and no age limit.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new(max_entries, None)))
    }

    /// Look up a stored entry, counting a hit or a miss.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        match self.probe(fingerprint).await {
            Some(entry) => {
                self.record_hit(&entry, false);
                Some(entry)
            }
            None => {
                self.record_miss();
                None
            }
        }
    }

    /// Store an entry. Failures are logged and counted, never returned.
    pub async fn store(&self, fingerprint: &Fingerprint, entry: &CacheEntry) {
        if let Err(e) = self.backend.put(fingerprint, entry).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%fingerprint, error = %e, "Cache write failed, continuing without caching");
        }
    }

    /// Return the cached entry or run `fetch` to produce it.
    ///
    /// At most one `fetch` runs per fingerprint at a time; concurrent callers
    /// wait for it and receive [`CacheOutcome::Coalesced`]. When `fetch`
    /// fails nothing is stored and a waiting caller takes its turn.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        fingerprint: &Fingerprint,
        fetch: F,
    ) -> Result<CacheOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, E>>,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.probe(fingerprint).await {
            self.record_hit(&entry, false);
            return Ok(CacheOutcome::Hit(entry));
        }

        let slot: InflightSlot = self
            .inflight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone();
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            let entry = entry.clone();
            self.record_hit(&entry, true);
            return Ok(CacheOutcome::Coalesced(entry));
        }

        // A previous holder may have finished and released its slot.
        if let Some(entry) = self.probe(fingerprint).await {
            self.record_hit(&entry, true);
            return Ok(CacheOutcome::Coalesced(entry));
        }

        self.record_miss();
        let result = fetch().await;

        let outcome = match result {
            Ok(entry) => {
                self.store(fingerprint, &entry).await;
                *guard = Some(entry.clone());
                Ok(CacheOutcome::Miss(entry))
            }
            Err(e) => Err(e),
        };

        drop(guard);
        self.inflight
            .remove_if(fingerprint, |_, current| Arc::ptr_eq(current, &slot));
        outcome
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            coalesced_hits: self.coalesced_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.backend.evictions(),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            savings: self.savings_nanos.load(Ordering::Relaxed) as f64 / NANOS_PER_USD,
        }
    }

    /// Backend read with storage failures treated as absent.
    async fn probe(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match self.backend.get(fingerprint).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(%fingerprint, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    fn record_hit(&self, entry: &CacheEntry, coalesced: bool) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.coalesced_hits.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = (entry.cost.max(0.0) * NANOS_PER_USD).round() as u64;
        self.savings_nanos.fetch_add(nanos, Ordering::Relaxed);
        metrics::counter!(
            "tierflow_cache_lookups_total",
            "result" => if coalesced { "coalesced" } else { "hit" },
        )
        .increment(1);
        tracing::debug!(tier = %entry.tier, coalesced, "Cache hit");
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tierflow_cache_lookups_total", "result" => "miss").increment(1);
    }
}
