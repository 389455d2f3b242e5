//! Validation and dispatch of metric writes and reads.
//!
//! The service is synchronous; HTTP handlers call it from blocking tasks.

use metrika_common::{
    Metric, MetricError, MetricKind, MetricValue, MetricsDto, Payload, WireMetric,
};
use metrika_storage::error::StorageError;
use metrika_storage::{CounterRepository, GaugeRepository, TxScope, UnitOfWork};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Client input could not be turned into a metric.
    #[error(transparent)]
    Validation(#[from] MetricError),

    #[error("{kind} metric {id:?} not found")]
    NotFound { kind: MetricKind, id: String },

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => ServiceError::NotFound { kind, id },
            StorageError::Metric(e) => ServiceError::Validation(e),
            other => ServiceError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

pub struct MetricService {
    gauges: Arc<dyn GaugeRepository>,
    counters: Arc<dyn CounterRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl MetricService {
    pub fn new(
        gauges: Arc<dyn GaugeRepository>,
        counters: Arc<dyn CounterRepository>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            gauges,
            counters,
            uow,
        }
    }

    pub fn gauges(&self) -> Arc<dyn GaugeRepository> {
        Arc::clone(&self.gauges)
    }

    pub fn counters(&self) -> Arc<dyn CounterRepository> {
        Arc::clone(&self.counters)
    }

    /// Routes one validated metric to its repository and returns the stored
    /// state: the gauge as written, or the accumulated counter.
    fn apply(&self, scope: &TxScope<'_>, dto: &MetricsDto) -> std::result::Result<MetricsDto, StorageError> {
        if dto.id.is_empty() {
            return Err(MetricError::MissingId.into());
        }
        match dto.payload {
            Payload::Gauge(value) => {
                let metric = Metric::new(dto.id.clone(), value);
                self.gauges.set(scope, &metric)?;
                Ok(metric.to_dto())
            }
            Payload::Counter(delta) => {
                let stored = self.counters.update(scope, &Metric::new(dto.id.clone(), delta))?;
                Ok(stored.to_dto())
            }
        }
    }

    pub fn update_metric(&self, dto: &MetricsDto) -> Result<MetricsDto> {
        Ok(self.apply(&TxScope::Detached, dto)?)
    }

    /// Path-style update: `kind`, `id` and the value all arrive as text.
    pub fn update_metric_raw(&self, kind: &str, id: &str, raw: &str) -> Result<MetricsDto> {
        if id.is_empty() {
            return Err(MetricError::MissingId.into());
        }
        let payload = match kind.parse::<MetricKind>()? {
            MetricKind::Gauge => Payload::Gauge(f64::parse_raw(raw)?),
            MetricKind::Counter => Payload::Counter(i64::parse_raw(raw)?),
        };
        self.update_metric(&MetricsDto {
            id: id.to_string(),
            payload,
        })
    }

    /// Validates and applies a batch inside one unit of work.
    ///
    /// The first failing item aborts the batch. With a transactional backend
    /// nothing from the batch remains; otherwise items before the failure
    /// stay applied. Returns the number of metrics written.
    pub fn update_metrics_batch(&self, batch: Vec<WireMetric>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        self.uow.with_tx(&mut |scope| {
            for wire in &batch {
                let dto = MetricsDto::try_from(wire.clone())?;
                self.apply(scope, &dto)?;
            }
            Ok(())
        })?;
        Ok(count)
    }

    pub fn get_metric(&self, kind: &str, id: &str) -> Result<MetricsDto> {
        if id.is_empty() {
            return Err(MetricError::MissingId.into());
        }
        let scope = TxScope::Detached;
        let dto = match kind.parse::<MetricKind>()? {
            MetricKind::Gauge => self.gauges.get(&scope, id)?.to_dto(),
            MetricKind::Counter => self.counters.get(&scope, id)?.to_dto(),
        };
        Ok(dto)
    }

    /// Every stored metric, gauges first, each kind sorted by id.
    pub fn list_metrics(&self) -> Result<Vec<MetricsDto>> {
        let scope = TxScope::Detached;
        let mut gauges = self.gauges.get_metrics(&scope)?;
        gauges.sort_by(|a, b| a.id.cmp(&b.id));
        let mut counters = self.counters.get_metrics(&scope)?;
        counters.sort_by(|a, b| a.id.cmp(&b.id));
        gauges.extend(counters);
        Ok(gauges)
    }
}
