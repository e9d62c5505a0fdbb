//! SQLite implementation of [`HistoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::legacy::{self, ImportSummary};
use super::schema;
use super::{
    AggregateStats, GroupStats, HistoryStore, PersistenceError, RunFilter, RunRecord, TierStats,
};
use crate::config::HistoryConfig;
use crate::quality::QualitySample;
use crate::routing::Tier;
use crate::workflow::{StageOutcome, WorkflowRun};

const RUN_COLUMNS: &str = "run_id, workflow_name, provider, success, started_at, completed_at, \
     duration_ms, total_cost, baseline_cost, savings, savings_percent, cache_savings, cache_hits, \
     accounting_anomaly, error";

/// History store backed by one SQLite file in WAL mode.
///
/// Multiple processes may open the same file; writers serialize on
/// SQLite's lock and wait up to the configured busy timeout.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    recent_runs: usize,
}

impl SqliteHistoryStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        Self::init(conn, path, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"), Duration::from_secs(5))
    }

    pub fn from_config(config: &HistoryConfig) -> Result<Self, PersistenceError> {
        Ok(
            Self::open(&config.path, Duration::from_millis(config.busy_timeout_ms))?
                .with_recent_runs(config.recent_runs),
        )
    }

    fn init(
        mut conn: Connection,
        path: PathBuf,
        busy_timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;",
        )?;
        schema::migrate(&mut conn)?;

        tracing::debug!(path = %path.display(), "Opened history store");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            recent_runs: 10,
        })
    }

    /// Number of runs included in [`AggregateStats::recent_runs`].
    pub fn with_recent_runs(mut self, recent_runs: usize) -> Self {
        self.recent_runs = recent_runs;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<R, PersistenceError>,
    {
        let mut guard = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        f(&mut guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<R, PersistenceError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| PersistenceError::Join(e.to_string()))?
    }

    /// Import runs from the legacy flat JSON history file.
    ///
    /// Accepts a top-level array of runs or an object with a `runs` array.
    /// Runs whose id already exists are skipped, so importing twice is safe.
    /// The whole import is one transaction.
    pub async fn import_legacy_json(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ImportSummary, PersistenceError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let runs = legacy::parse(&bytes)?;

        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut summary = ImportSummary::default();
            for run in &runs {
                if run_exists(&tx, &run.run_id)? {
                    summary.skipped += 1;
                    continue;
                }
                insert_run(&tx, run)?;
                summary.imported += 1;
            }
            tx.commit()?;
            Ok(summary)
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn record_run(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        let run = run.clone();
        let run_id = run.run_id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            insert_run(&tx, &run)?;
            tx.commit()?;
            Ok(())
        })
        .await
        .inspect_err(|e| tracing::error!(run_id = %run_id, error = %e, "Failed to record run"))
    }

    async fn query_runs(
        &self,
        filter: &RunFilter,
        limit: usize,
    ) -> Result<Vec<RunRecord>, PersistenceError> {
        let filter = filter.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let runs = load_runs(&tx, &filter, limit)?;
            tx.commit()?;
            Ok(runs)
        })
        .await
    }

    async fn get_stats(&self) -> Result<AggregateStats, PersistenceError> {
        let recent = self.recent_runs;
        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let (total_runs, successful_runs, total_cost, total_savings, total_cache_savings) = tx
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(success), 0), COALESCE(SUM(total_cost), 0), \
                     COALESCE(SUM(savings), 0), COALESCE(SUM(cache_savings), 0) FROM runs",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, f64>(3)?,
                            row.get::<_, f64>(4)?,
                        ))
                    },
                )?;

            let stats = AggregateStats {
                total_runs: total_runs as u64,
                successful_runs: successful_runs as u64,
                total_cost,
                total_savings,
                total_cache_savings,
                by_workflow: group_stats(&tx, "workflow_name")?,
                by_provider: group_stats(&tx, "provider")?,
                by_tier: tier_stats(&tx)?,
                recent_runs: load_runs(&tx, &RunFilter::default(), recent)?,
            };
            tx.commit()?;
            Ok(stats)
        })
        .await
    }

    async fn quality_samples(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<QualitySample>, PersistenceError> {
        let since = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.workflow_name, s.stage_name, s.tier, s.quality_score, r.completed_at \
                 FROM stages s JOIN runs r ON r.run_id = s.run_id \
                 WHERE s.skipped = 0 AND s.quality_score IS NOT NULL AND r.completed_at >= ?1 \
                 ORDER BY r.completed_at ASC, s.id ASC",
            )?;
            let samples = stmt
                .query_map(params![since], |row| {
                    Ok(QualitySample {
                        workflow: row.get(0)?,
                        stage: row.get(1)?,
                        tier: tier_column(row, 2)?,
                        score: row.get(3)?,
                        recorded_at: from_millis(row.get(4)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(samples)
        })
        .await
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn tier_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Tier> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn optional_tier_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Tier>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
        }),
    }
}

fn run_exists(conn: &Connection, run_id: &str) -> Result<bool, PersistenceError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM runs WHERE run_id = ?1",
            params![run_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn insert_run(conn: &Connection, run: &WorkflowRun) -> Result<(), PersistenceError> {
    let report = &run.cost;
    conn.execute(
        &format!(
            "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            RUN_COLUMNS
        ),
        params![
            run.run_id,
            run.workflow_name,
            run.provider,
            run.success,
            run.started_at.timestamp_millis(),
            run.completed_at.timestamp_millis(),
            run.duration_ms as i64,
            report.total_cost,
            report.baseline_cost,
            report.savings,
            report.savings_percent,
            report.cache_savings,
            report.cache_hits,
            report.accounting_anomaly,
            run.error,
        ],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO stages (run_id, position, stage_name, tier, model, skipped, skip_reason, \
         cost, duration_ms, input_tokens, output_tokens, quality_score, cache_hit, cache_savings, \
         fell_back_from) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )?;
    for (position, stage) in run.stages.iter().enumerate() {
        stmt.execute(params![
            run.run_id,
            position as i64,
            stage.name,
            stage.tier.as_str(),
            stage.model,
            stage.skipped,
            stage.skip_reason,
            stage.cost,
            stage.duration_ms as i64,
            stage.input_tokens,
            stage.output_tokens,
            stage.quality_score,
            stage.cache_hit,
            stage.cache_savings,
            stage.fell_back_from.map(Tier::as_str),
        ])?;
    }
    Ok(())
}

fn load_runs(
    conn: &Connection,
    filter: &RunFilter,
    limit: usize,
) -> Result<Vec<RunRecord>, PersistenceError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(workflow) = &filter.workflow_name {
        values.push(Value::Text(workflow.clone()));
        clauses.push(format!("workflow_name = ?{}", values.len()));
    }
    if let Some(provider) = &filter.provider {
        values.push(Value::Text(provider.clone()));
        clauses.push(format!("provider = ?{}", values.len()));
    }
    if let Some(since) = filter.since {
        values.push(Value::Integer(since.timestamp_millis()));
        clauses.push(format!("started_at >= ?{}", values.len()));
    }
    if filter.success_only {
        clauses.push("success = 1".to_string());
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    let sql = format!(
        "SELECT {} FROM runs {} ORDER BY started_at DESC, rowid DESC LIMIT ?{}",
        RUN_COLUMNS,
        where_clause,
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut runs = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                workflow_name: row.get(1)?,
                provider: row.get(2)?,
                success: row.get(3)?,
                started_at: from_millis(row.get(4)?),
                completed_at: from_millis(row.get(5)?),
                duration_ms: row.get::<_, i64>(6)?.max(0) as u64,
                total_cost: row.get(7)?,
                baseline_cost: row.get(8)?,
                savings: row.get(9)?,
                savings_percent: row.get(10)?,
                cache_savings: row.get(11)?,
                cache_hits: row.get(12)?,
                accounting_anomaly: row.get(13)?,
                error: row.get(14)?,
                stages: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for run in &mut runs {
        run.stages = load_stages(conn, &run.run_id)?;
    }
    Ok(runs)
}

fn load_stages(conn: &Connection, run_id: &str) -> Result<Vec<StageOutcome>, PersistenceError> {
    let mut stmt = conn.prepare_cached(
        "SELECT stage_name, tier, model, skipped, skip_reason, cost, duration_ms, input_tokens, \
         output_tokens, quality_score, cache_hit, cache_savings, fell_back_from \
         FROM stages WHERE run_id = ?1 ORDER BY position ASC",
    )?;
    let stages = stmt
        .query_map(params![run_id], |row| {
            Ok(StageOutcome {
                name: row.get(0)?,
                tier: tier_column(row, 1)?,
                model: row.get(2)?,
                skipped: row.get(3)?,
                skip_reason: row.get(4)?,
                cost: row.get(5)?,
                duration_ms: row.get::<_, i64>(6)?.max(0) as u64,
                input_tokens: row.get(7)?,
                output_tokens: row.get(8)?,
                quality_score: row.get(9)?,
                cache_hit: row.get(10)?,
                cache_savings: row.get(11)?,
                fell_back_from: optional_tier_column(row, 12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stages)
}

/// `column` is one of a fixed set of indexed run columns.
fn group_stats(conn: &Connection, column: &str) -> Result<Vec<GroupStats>, PersistenceError> {
    let sql = format!(
        "SELECT {col}, COUNT(*), COALESCE(SUM(success), 0), COALESCE(SUM(total_cost), 0), \
         COALESCE(SUM(savings), 0), COALESCE(AVG(duration_ms), 0) \
         FROM runs GROUP BY {col} ORDER BY {col}",
        col = column
    );
    let mut stmt = conn.prepare(&sql)?;
    let groups = stmt
        .query_map([], |row| {
            Ok(GroupStats {
                key: row.get(0)?,
                runs: row.get::<_, i64>(1)? as u64,
                successes: row.get::<_, i64>(2)? as u64,
                total_cost: row.get(3)?,
                total_savings: row.get(4)?,
                avg_duration_ms: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

fn tier_stats(conn: &Connection) -> Result<Vec<TierStats>, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT tier, COUNT(*), COALESCE(SUM(cost), 0), COALESCE(SUM(cache_hit), 0), \
         AVG(quality_score) FROM stages WHERE skipped = 0 GROUP BY tier",
    )?;
    let mut tiers = stmt
        .query_map([], |row| {
            Ok(TierStats {
                tier: tier_column(row, 0)?,
                stages: row.get::<_, i64>(1)? as u64,
                total_cost: row.get(2)?,
                cache_hits: row.get::<_, i64>(3)? as u64,
                avg_quality: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    tiers.sort_by_key(|t| t.tier);
    Ok(tiers)
}
