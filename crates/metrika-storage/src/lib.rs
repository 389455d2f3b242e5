//! Current-value metric storage for the metrika server.
//!
//! Gauges and counters are kept behind one repository contract with two
//! backends: [`memory::InMemoryRepository`] (a locked map, made durable by the
//! [`dumper::FileDumper`]) and [`sqlite::SqliteRepository`] (SQL upserts with
//! transactional batches through [`sqlite::SqliteUnitOfWork`]).

pub mod dumper;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;


use error::Result;
use metrika_common::{Metric, MetricValue, MetricsDto};
use std::collections::HashMap;

/// Point-in-time mapping `id -> metric` for one kind.
pub type StorageState<T> = HashMap<String, Metric<T>>;

/// Transaction carrier passed explicitly to every repository call.
///
/// `Detached` means "no surrounding transaction": the backend uses its own
/// connection or lock for the single call.
pub enum TxScope<'a> {
    Detached,
    Sqlite(&'a rusqlite::Transaction<'a>),
}

/// Read side of a repository, shared by both metric kinds.
///
/// Implementations must be `Send + Sync`: HTTP handlers and the dumper task
/// access the same repository concurrently.
pub trait MetricRepository<T: MetricValue>: Send + Sync {
    /// Returns the metric with `id`, or [`error::StorageError::NotFound`].
    fn get(&self, scope: &TxScope<'_>, id: &str) -> Result<Metric<T>>;

    /// All metrics of this kind, in no particular order.
    fn list(&self, scope: &TxScope<'_>) -> Result<Vec<Metric<T>>>;

    /// Same as [`list`](Self::list) in wire form; used by the dumper.
    fn get_metrics(&self, scope: &TxScope<'_>) -> Result<Vec<MetricsDto>> {
        Ok(self.list(scope)?.iter().map(Metric::to_dto).collect())
    }
}

/// Gauge storage: last write wins.
pub trait GaugeRepository: MetricRepository<f64> {
    fn set(&self, scope: &TxScope<'_>, metric: &Metric<f64>) -> Result<()>;
}

/// Counter storage: writes add their delta to the stored value.
pub trait CounterRepository: MetricRepository<i64> {
    /// Inserts the metric if absent, otherwise adds `metric.value` to it.
    /// Returns the accumulated metric.
    ///
    /// Concurrent updates of the same id never lose a delta.
    fn update(&self, scope: &TxScope<'_>, metric: &Metric<i64>) -> Result<Metric<i64>>;
}

/// Backend reachability check behind `GET /ping`.
pub trait HealthCheck: Send + Sync {
    fn ping(&self) -> Result<()>;
}

/// Transactional boundary around several repository writes.
pub trait UnitOfWork: Send + Sync {
    /// Runs `f` inside a transaction when the backend has one.
    ///
    /// Commits when `f` returns `Ok`, rolls back on `Err`, and rolls back
    /// before resuming a panic raised by `f`. Without a transactional
    /// backend, `f` runs with [`TxScope::Detached`] and nothing is undone.
    fn with_tx(&self, f: &mut dyn FnMut(&TxScope<'_>) -> Result<()>) -> Result<()>;
}

/// Unit of work for backends without transactions.
pub struct NoopUnitOfWork;

impl UnitOfWork for NoopUnitOfWork {
    fn with_tx(&self, f: &mut dyn FnMut(&TxScope<'_>) -> Result<()>) -> Result<()> {
        f(&TxScope::Detached)
    }
}
