use crate::audit::AuditSink;
use crate::service::MetricService;
use metrika_common::secure::Signer;
use metrika_storage::dumper::FileDumper;
use metrika_storage::memory::{InMemoryCounterRepository, InMemoryGaugeRepository, InMemoryHealth};
use metrika_storage::sqlite::SqliteBackend;
use metrika_storage::{
    CounterRepository, GaugeRepository, HealthCheck, NoopUnitOfWork, StorageState, UnitOfWork,
};
use std::sync::Arc;

/// Repositories, unit of work and health check of one backend.
pub struct Storage {
    pub gauges: Arc<dyn GaugeRepository>,
    pub counters: Arc<dyn CounterRepository>,
    pub uow: Arc<dyn UnitOfWork>,
    pub health: Arc<dyn HealthCheck>,
    pub backend: &'static str,
}

impl Storage {
    pub fn in_memory(gauges: StorageState<f64>, counters: StorageState<i64>) -> Self {
        Self {
            gauges: Arc::new(InMemoryGaugeRepository::from_state(gauges)),
            counters: Arc::new(InMemoryCounterRepository::from_state(counters)),
            uow: Arc::new(NoopUnitOfWork),
            health: Arc::new(InMemoryHealth),
            backend: "memory",
        }
    }

    pub fn sqlite(backend: SqliteBackend) -> Self {
        Self {
            gauges: backend.gauges,
            counters: backend.counters,
            uow: backend.uow,
            health: backend.db,
            backend: "sqlite",
        }
    }
}

/// Dump after every successful write.
#[derive(Clone)]
pub struct SyncDump {
    pub dumper: Arc<FileDumper>,
    pub fail_on_error: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MetricService>,
    pub health: Arc<dyn HealthCheck>,
    pub signer: Option<Signer>,
    pub sync_dump: Option<SyncDump>,
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        Self {
            service: Arc::new(MetricService::new(
                storage.gauges,
                storage.counters,
                storage.uow,
            )),
            health: storage.health,
            signer: None,
            sync_dump: None,
            audit: None,
        }
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_sync_dump(mut self, dumper: Arc<FileDumper>, fail_on_error: bool) -> Self {
        self.sync_dump = Some(SyncDump {
            dumper,
            fail_on_error,
        });
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }
}
