//! SQLite-backed cache shared by every process pointing at the same file.

use super::{CacheBackend, CacheEntry, CacheError, Fingerprint};
use crate::routing::Tier;
use crate::upstream::InferenceResponse;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct SqliteCacheBackend {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    max_entries: usize,
    max_age: Option<Duration>,
    evictions: Arc<AtomicU64>,
}

impl SqliteCacheBackend {
    pub fn open(
        path: impl AsRef<Path>,
        max_entries: usize,
        max_age: Option<Duration>,
    ) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS fingerprint_cache (\
               fingerprint TEXT PRIMARY KEY,\
               tier TEXT NOT NULL,\
               model TEXT NOT NULL,\
               response_text TEXT NOT NULL,\
               input_tokens INTEGER NOT NULL,\
               output_tokens INTEGER NOT NULL,\
               cost REAL NOT NULL,\
               created_at INTEGER NOT NULL,\
               last_used_at INTEGER NOT NULL,\
               hit_count INTEGER NOT NULL DEFAULT 0\
             );\
             CREATE INDEX IF NOT EXISTS idx_fingerprint_cache_last_used \
               ON fingerprint_cache(last_used_at);",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            max_entries: max_entries.max(1),
            max_age,
            evictions: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError>,
    {
        let guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&guard)
    }

    fn cutoff_millis(&self) -> Option<i64> {
        self.max_age
            .map(|age| Utc::now().timestamp_millis() - age.as_millis() as i64)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let key = fingerprint.as_str().to_string();
        let backend = self.clone();
        tokio::task::spawn_blocking(move || {
            backend.with_conn(|conn| {
                let row = conn
                    .query_row(
                        "SELECT tier, model, response_text, input_tokens, output_tokens, cost, created_at \
                         FROM fingerprint_cache WHERE fingerprint = ?1",
                        params![key],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i64>(4)?,
                                row.get::<_, f64>(5)?,
                                row.get::<_, i64>(6)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((tier, model, text, input_tokens, output_tokens, cost, created_at)) = row
                else {
                    return Ok(None);
                };

                if backend.cutoff_millis().is_some_and(|cutoff| created_at < cutoff) {
                    conn.execute(
                        "DELETE FROM fingerprint_cache WHERE fingerprint = ?1",
                        params![key],
                    )?;
                    backend.evictions.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }

                let tier: Tier = tier.parse().map_err(CacheError::Serde)?;
                conn.execute(
                    "UPDATE fingerprint_cache \
                     SET hit_count = hit_count + 1, last_used_at = ?1 \
                     WHERE fingerprint = ?2",
                    params![Utc::now().timestamp_millis(), key],
                )?;

                Ok(Some(CacheEntry {
                    tier,
                    model,
                    response: InferenceResponse {
                        text,
                        input_tokens: input_tokens.max(0) as u32,
                        output_tokens: output_tokens.max(0) as u32,
                    },
                    cost,
                    created_at: from_millis(created_at),
                }))
            })
        })
        .await
        .map_err(|e| CacheError::Join(e.to_string()))?
    }

    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = fingerprint.as_str().to_string();
        let entry = entry.clone();
        let backend = self.clone();
        tokio::task::spawn_blocking(move || {
            backend.with_conn(|conn| {
                let now = Utc::now().timestamp_millis();
                if let Some(cutoff) = backend.cutoff_millis() {
                    let removed = conn.execute(
                        "DELETE FROM fingerprint_cache WHERE created_at < ?1",
                        params![cutoff],
                    )?;
                    backend
                        .evictions
                        .fetch_add(removed as u64, Ordering::Relaxed);
                }

                // Entries are immutable: first writer wins.
                conn.execute(
                    "INSERT OR IGNORE INTO fingerprint_cache (\
                        fingerprint, tier, model, response_text, input_tokens, output_tokens,\
                        cost, created_at, last_used_at\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        key,
                        entry.tier.as_str(),
                        entry.model,
                        entry.response.text,
                        entry.response.input_tokens as i64,
                        entry.response.output_tokens as i64,
                        entry.cost,
                        entry.created_at.timestamp_millis(),
                        now,
                    ],
                )?;

                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM fingerprint_cache", [], |row| {
                        row.get(0)
                    })?;
                let keep = backend.max_entries as i64;
                if count > keep {
                    let removed = conn.execute(
                        "DELETE FROM fingerprint_cache WHERE fingerprint IN (\
                            SELECT fingerprint FROM fingerprint_cache \
                            ORDER BY last_used_at DESC, rowid DESC LIMIT -1 OFFSET ?1\
                         )",
                        params![keep],
                    )?;
                    backend
                        .evictions
                        .fetch_add(removed as u64, Ordering::Relaxed);
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| CacheError::Join(e.to_string()))?
    }

    fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
