//! Snapshot file for the in-memory backend.
//!
//! The file is a JSON array of metric DTOs, gauges first. It is rewritten
//! whole on every dump through a sibling temporary file and a rename, so a
//! crash mid-dump leaves the previous snapshot intact.

use crate::error::Result;
use crate::{CounterRepository, GaugeRepository, StorageState, TxScope};
use metrika_common::{Metric, MetricsDto, Payload};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// When dumps happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// A background timer dumps every interval.
    Periodic(Duration),
    /// Every successful write request dumps before responding.
    Synchronous,
}

impl DumpMode {
    /// `secs <= 0` selects synchronous dumps.
    pub fn from_interval_secs(secs: i64) -> Self {
        if secs <= 0 {
            DumpMode::Synchronous
        } else {
            DumpMode::Periodic(Duration::from_secs(secs.unsigned_abs()))
        }
    }
}

pub struct FileDumper {
    path: PathBuf,
    // held from the snapshot read through the rename
    write_lock: Mutex<()>,
}

impl FileDumper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Writes both repositories to the snapshot file. Returns the number of
    /// metrics written.
    ///
    /// The snapshot is read under the same lock as the rename, so the file
    /// never goes back to an older state than a dump that already returned.
    pub fn dump(&self, gauges: &dyn GaugeRepository, counters: &dyn CounterRepository) -> Result<usize> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut entries = gauges.get_metrics(&TxScope::Detached)?;
        entries.extend(counters.get_metrics(&TxScope::Detached)?);
        let body = serde_json::to_vec_pretty(&entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        std::fs::write(&temp, &body)?;
        std::fs::rename(&temp, &self.path)?;

        tracing::debug!(path = %self.path.display(), count = entries.len(), "Metrics dumped");
        Ok(entries.len())
    }

    /// Reads the snapshot at this dumper's path.
    pub fn restore(&self) -> Result<(StorageState<f64>, StorageState<i64>)> {
        restore(&self.path)
    }
}

/// Reads a snapshot file into per-kind states.
///
/// A missing or blank file is "no prior state", not an error.
pub fn restore(path: &Path) -> Result<(StorageState<f64>, StorageState<i64>)> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok((StorageState::new(), StorageState::new()))
        }
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok((StorageState::new(), StorageState::new()));
    }

    let entries: Vec<MetricsDto> = serde_json::from_str(&content)?;
    let mut gauges = StorageState::new();
    let mut counters = StorageState::new();
    for entry in entries {
        match entry.payload {
            Payload::Gauge(value) => {
                gauges.insert(entry.id.clone(), Metric::new(entry.id, value));
            }
            Payload::Counter(delta) => {
                counters.insert(entry.id.clone(), Metric::new(entry.id, delta));
            }
        }
    }
    tracing::info!(
        path = %path.display(),
        gauges = gauges.len(),
        counters = counters.len(),
        "Metrics restored"
    );
    Ok((gauges, counters))
}

/// Dumps every `every` until cancelled. Failed dumps are logged and the
/// loop keeps going; a dump already running when cancellation arrives
/// completes.
pub fn spawn_periodic(
    dumper: Arc<FileDumper>,
    gauges: Arc<dyn GaugeRepository>,
    counters: Arc<dyn CounterRepository>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let every = every.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Dump loop stopped");
                    break;
                }
                _ = tick.tick() => {
                    let dumper = Arc::clone(&dumper);
                    let gauges = Arc::clone(&gauges);
                    let counters = Arc::clone(&counters);
                    let result = tokio::task::spawn_blocking(move || {
                        dumper.dump(gauges.as_ref(), counters.as_ref())
                    })
                    .await;
                    match result {
                        Ok(Ok(count)) => tracing::debug!(count, "Periodic dump done"),
                        Ok(Err(e)) => tracing::error!(error = %e, "Periodic dump failed"),
                        Err(e) => tracing::error!(error = %e, "Periodic dump aborted"),
                    }
                }
            }
        }
    })
}
