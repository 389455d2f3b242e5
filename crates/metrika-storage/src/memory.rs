use crate::error::{Result, StorageError};
use crate::{
    CounterRepository, GaugeRepository, HealthCheck, MetricRepository, StorageState, TxScope,
};
use metrika_common::{Metric, MetricValue};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Map-backed repository for one metric kind.
///
/// Reads share a read lock; writes, including the read-modify-write of a
/// counter update, run under the write lock. Transaction scopes are ignored.
pub struct InMemoryRepository<T: MetricValue> {
    metrics: RwLock<StorageState<T>>,
}

pub type InMemoryGaugeRepository = InMemoryRepository<f64>;
pub type InMemoryCounterRepository = InMemoryRepository<i64>;

impl<T: MetricValue> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::from_state(StorageState::new())
    }

    /// Starts from a restored snapshot.
    pub fn from_state(state: StorageState<T>) -> Self {
        Self {
            metrics: RwLock::new(state),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StorageState<T>> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StorageState<T>> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merges `metric` into the stored value under the write lock.
    fn upsert(&self, metric: &Metric<T>) -> Result<Metric<T>> {
        let mut metrics = self.write();
        let value = match metrics.get(&metric.id) {
            Some(stored) => T::merge(stored.value, metric.value)?,
            None => metric.value,
        };
        let merged = Metric::new(metric.id.clone(), value);
        metrics.insert(metric.id.clone(), merged.clone());
        Ok(merged)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<T: MetricValue> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MetricValue> MetricRepository<T> for InMemoryRepository<T> {
    fn get(&self, _scope: &TxScope<'_>, id: &str) -> Result<Metric<T>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })
    }

    fn list(&self, _scope: &TxScope<'_>) -> Result<Vec<Metric<T>>> {
        Ok(self.read().values().cloned().collect())
    }
}

impl GaugeRepository for InMemoryRepository<f64> {
    fn set(&self, _scope: &TxScope<'_>, metric: &Metric<f64>) -> Result<()> {
        self.upsert(metric).map(|_| ())
    }
}

impl CounterRepository for InMemoryRepository<i64> {
    fn update(&self, _scope: &TxScope<'_>, metric: &Metric<i64>) -> Result<Metric<i64>> {
        self.upsert(metric)
    }
}

/// The in-memory backend is always reachable.
pub struct InMemoryHealth;

impl HealthCheck for InMemoryHealth {
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}
