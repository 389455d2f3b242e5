//! Versioned schema for the SQLite backend.
//!
//! The applied version is kept in `PRAGMA user_version`; each migration runs
//! in its own transaction together with the version bump.

use crate::error::{Result, StorageError};
use rusqlite::Connection;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_metrics",
        sql: "
CREATE TABLE IF NOT EXISTS metrics (
    id TEXT NOT NULL CHECK (length(id) > 0),
    kind TEXT NOT NULL CHECK (kind IN ('gauge', 'counter')),
    delta INTEGER,
    value REAL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (id, kind)
);
",
    },
    Migration {
        name: "index_metrics_kind",
        sql: "CREATE INDEX IF NOT EXISTS idx_metrics_kind ON metrics(kind);",
    },
];

/// Schema version after all known migrations.
pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Applies pending migrations and returns how many ran.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    let current = current_version(conn)?;
    if current > latest_version() {
        return Err(StorageError::Migration(format!(
            "database schema version {current} is newer than supported version {}",
            latest_version()
        )));
    }

    let mut applied = 0;
    for (index, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            StorageError::Migration(format!("{} (version {version}): {e}", migration.name))
        })?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(migration = migration.name, version, "Applied migration");
        applied += 1;
    }
    Ok(applied)
}
