//! Schema creation and forward-only migrations keyed on `PRAGMA user_version`.

use rusqlite::Connection;

use super::PersistenceError;

/// Each entry upgrades the schema by one version; index + 1 is the version
/// it produces. Never edit a shipped entry, append a new one.
const MIGRATIONS: &[&str] = &[
    // v1: runs and their stages
    "CREATE TABLE IF NOT EXISTS runs (\
       run_id TEXT PRIMARY KEY,\
       workflow_name TEXT NOT NULL,\
       provider TEXT NOT NULL,\
       success INTEGER NOT NULL,\
       started_at INTEGER NOT NULL,\
       completed_at INTEGER NOT NULL,\
       duration_ms INTEGER NOT NULL,\
       total_cost REAL NOT NULL DEFAULT 0,\
       baseline_cost REAL NOT NULL DEFAULT 0,\
       savings REAL NOT NULL DEFAULT 0,\
       savings_percent REAL NOT NULL DEFAULT 0,\
       error TEXT\
     );\
     CREATE TABLE IF NOT EXISTS stages (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,\
       position INTEGER NOT NULL,\
       stage_name TEXT NOT NULL,\
       tier TEXT NOT NULL,\
       skipped INTEGER NOT NULL DEFAULT 0,\
       skip_reason TEXT,\
       cost REAL NOT NULL DEFAULT 0,\
       duration_ms INTEGER NOT NULL DEFAULT 0,\
       input_tokens INTEGER NOT NULL DEFAULT 0,\
       output_tokens INTEGER NOT NULL DEFAULT 0\
     );\
     CREATE INDEX IF NOT EXISTS idx_runs_workflow_name ON runs(workflow_name);\
     CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);\
     CREATE INDEX IF NOT EXISTS idx_runs_provider ON runs(provider);\
     CREATE INDEX IF NOT EXISTS idx_stages_run_id ON stages(run_id);",
    // v2: cache and quality columns
    "ALTER TABLE runs ADD COLUMN cache_savings REAL NOT NULL DEFAULT 0;\
     ALTER TABLE runs ADD COLUMN cache_hits INTEGER NOT NULL DEFAULT 0;\
     ALTER TABLE runs ADD COLUMN accounting_anomaly INTEGER NOT NULL DEFAULT 0;\
     ALTER TABLE stages ADD COLUMN model TEXT;\
     ALTER TABLE stages ADD COLUMN quality_score REAL;\
     ALTER TABLE stages ADD COLUMN cache_hit INTEGER NOT NULL DEFAULT 0;\
     ALTER TABLE stages ADD COLUMN cache_savings REAL NOT NULL DEFAULT 0;\
     ALTER TABLE stages ADD COLUMN fell_back_from TEXT;\
     CREATE INDEX IF NOT EXISTS idx_stages_tier ON stages(tier);",
];

pub const CURRENT_VERSION: i64 = MIGRATIONS.len() as i64;

pub fn user_version(conn: &Connection) -> Result<i64, PersistenceError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database up to [`CURRENT_VERSION`].
///
/// Each step runs in its own immediate transaction so concurrent openers
/// cannot apply the same step twice.
pub fn migrate(conn: &mut Connection) -> Result<(), PersistenceError> {
    loop {
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let version = user_version(&tx)?;
        if version > CURRENT_VERSION {
            return Err(PersistenceError::InvalidRecord(format!(
                "database schema version {} is newer than supported version {}",
                version, CURRENT_VERSION
            )));
        }
        if version == CURRENT_VERSION {
            return Ok(());
        }

        tx.execute_batch(MIGRATIONS[version as usize])?;
        tx.pragma_update(None, "user_version", version + 1)?;
        tx.commit()?;
        tracing::debug!(version = version + 1, "Applied history schema migration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), CURRENT_VERSION);

        // Idempotent
        migrate(&mut conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migrate_from_v1() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO runs (run_id, workflow_name, provider, success, started_at, completed_at, duration_ms) \
             VALUES ('old', 'audit', 'openai', 1, 0, 0, 0)",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        let hits: i64 = conn
            .query_row("SELECT cache_hits FROM runs WHERE run_id = 'old'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();
        assert!(matches!(
            migrate(&mut conn),
            Err(PersistenceError::InvalidRecord(_))
        ));
    }
}
