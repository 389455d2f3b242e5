use crate::error::{Result, StorageError};
use crate::migration;
use crate::{
    CounterRepository, GaugeRepository, HealthCheck, MetricRepository, TxScope, UnitOfWork,
};
use chrono::Utc;
use metrika_common::{Metric, MetricError, MetricKind, MetricValue};
use rusqlite::types::FromSql;
use rusqlite::{params, Connection, OptionalExtension};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// A single SQLite connection shared by repositories and the unit of work.
///
/// Calls with [`TxScope::Detached`] take the connection lock themselves, so
/// they must not be made from inside [`SqliteUnitOfWork::with_tx`]; use the
/// scope handed to the closure instead.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Opens (or creates) the database file and runs pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let applied = migration::run_migrations(&mut conn)?;
        if applied > 0 {
            tracing::info!(applied, "Database schema up to date");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_conn<R>(
        &self,
        scope: &TxScope<'_>,
        f: impl FnOnce(&Connection) -> Result<R>,
    ) -> Result<R> {
        match scope {
            TxScope::Sqlite(tx) => f(tx),
            TxScope::Detached => {
                let conn = self.lock();
                f(&conn)
            }
        }
    }
}

impl HealthCheck for SqliteDatabase {
    fn ping(&self) -> Result<()> {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Repository over the `metrics` table for one kind.
pub struct SqliteRepository<T> {
    db: Arc<SqliteDatabase>,
    _kind: PhantomData<fn() -> T>,
}

pub type SqliteGaugeRepository = SqliteRepository<f64>;
pub type SqliteCounterRepository = SqliteRepository<i64>;

impl<T: MetricValue> SqliteRepository<T> {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self {
            db,
            _kind: PhantomData,
        }
    }

    /// Column holding this kind's value.
    fn column() -> &'static str {
        match T::KIND {
            MetricKind::Gauge => "value",
            MetricKind::Counter => "delta",
        }
    }

    fn no_rows(id: &str) -> StorageError {
        StorageError::NoRowsAffected {
            kind: T::KIND,
            id: id.to_string(),
        }
    }
}

impl<T: MetricValue + FromSql> MetricRepository<T> for SqliteRepository<T> {
    fn get(&self, scope: &TxScope<'_>, id: &str) -> Result<Metric<T>> {
        let sql = format!(
            "SELECT {} FROM metrics WHERE id = ?1 AND kind = ?2",
            Self::column()
        );
        let value: Option<T> = self.db.with_conn(scope, |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            Ok(stmt
                .query_row(params![id, T::KIND.as_str()], |row| row.get(0))
                .optional()?)
        })?;
        value
            .map(|value| Metric::new(id, value))
            .ok_or_else(|| StorageError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })
    }

    fn list(&self, scope: &TxScope<'_>) -> Result<Vec<Metric<T>>> {
        let sql = format!(
            "SELECT id, {} FROM metrics WHERE kind = ?1 ORDER BY id",
            Self::column()
        );
        self.db.with_conn(scope, |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![T::KIND.as_str()], |row| {
                Ok(Metric::new(row.get::<_, String>(0)?, row.get::<_, T>(1)?))
            })?;
            let mut metrics = Vec::new();
            for row in rows {
                metrics.push(row?);
            }
            Ok(metrics)
        })
    }
}

impl GaugeRepository for SqliteRepository<f64> {
    fn set(&self, scope: &TxScope<'_>, metric: &Metric<f64>) -> Result<()> {
        let changed = self.db.with_conn(scope, |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO metrics (id, kind, value, updated_at) VALUES (?1, 'gauge', ?2, ?3)
                 ON CONFLICT(id, kind) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )?;
            Ok(stmt.execute(params![
                &metric.id,
                metric.value,
                Utc::now().timestamp_millis()
            ])?)
        })?;
        if changed == 0 {
            return Err(Self::no_rows(&metric.id));
        }
        Ok(())
    }
}

impl CounterRepository for SqliteRepository<i64> {
    /// The conflict update only applies while the sum stays an integer;
    /// SQLite would otherwise store the overflowed sum as a REAL.
    fn update(&self, scope: &TxScope<'_>, metric: &Metric<i64>) -> Result<Metric<i64>> {
        self.db.with_conn(scope, |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO metrics (id, kind, delta, updated_at) VALUES (?1, 'counter', ?2, ?3)
                 ON CONFLICT(id, kind) DO UPDATE SET delta = metrics.delta + excluded.delta, updated_at = excluded.updated_at
                 WHERE typeof(metrics.delta + excluded.delta) = 'integer'
                 RETURNING delta",
            )?;
            let total: Option<i64> = stmt
                .query_row(
                    params![&metric.id, metric.value, Utc::now().timestamp_millis()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(total) = total {
                return Ok(Metric::new(metric.id.clone(), total));
            }

            let stored: Option<i64> = conn
                .prepare_cached("SELECT delta FROM metrics WHERE id = ?1 AND kind = 'counter'")?
                .query_row(params![&metric.id], |row| row.get(0))
                .optional()?;
            match stored {
                Some(stored) => Err(MetricError::CounterOverflow {
                    stored,
                    delta: metric.value,
                }
                .into()),
                None => Err(Self::no_rows(&metric.id)),
            }
        })
    }
}

/// Runs batches in one SQLite transaction.
pub struct SqliteUnitOfWork {
    db: Arc<SqliteDatabase>,
}

impl SqliteUnitOfWork {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self { db }
    }
}

impl UnitOfWork for SqliteUnitOfWork {
    fn with_tx(&self, f: &mut dyn FnMut(&TxScope<'_>) -> Result<()>) -> Result<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&TxScope::Sqlite(&tx))));
        match outcome {
            Ok(Ok(())) => {
                tx.commit()?;
                Ok(())
            }
            Ok(Err(e)) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
            Err(payload) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(error = %rollback, "Rollback after panic failed");
                }
                drop(conn);
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Builds the gauge and counter repositories, unit of work and health check
/// over one database.
pub struct SqliteBackend {
    pub gauges: Arc<SqliteGaugeRepository>,
    pub counters: Arc<SqliteCounterRepository>,
    pub uow: Arc<SqliteUnitOfWork>,
    pub db: Arc<SqliteDatabase>,
}

impl SqliteBackend {
    pub fn new(db: SqliteDatabase) -> Self {
        let db = Arc::new(db);
        Self {
            gauges: Arc::new(SqliteRepository::new(Arc::clone(&db))),
            counters: Arc::new(SqliteRepository::new(Arc::clone(&db))),
            uow: Arc::new(SqliteUnitOfWork::new(Arc::clone(&db))),
            db,
        }
    }
}

