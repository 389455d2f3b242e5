use crate::Sampler;
use metrika_common::MetricsDto;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Id of the counter incremented once per completed poll cycle.
pub const POLL_COUNT: &str = "PollCount";

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("sampling loop already started")]
    AlreadyStarted,
}

#[derive(Default)]
struct MetricSet {
    gauges: BTreeMap<String, f64>,
    poll_count: i64,
}

/// Owns the agent's metric set and refreshes it from the samplers.
pub struct Collector {
    samplers: Mutex<Vec<Box<dyn Sampler>>>,
    metrics: Mutex<MetricSet>,
    poll_interval: Duration,
    started: AtomicBool,
}

impl Collector {
    pub fn new(samplers: Vec<Box<dyn Sampler>>, poll_interval: Duration) -> Self {
        Self {
            samplers: Mutex::new(samplers),
            metrics: Mutex::new(MetricSet::default()),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            started: AtomicBool::new(false),
        }
    }

    fn lock_metrics(&self) -> MutexGuard<'_, MetricSet> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one poll cycle and returns the number of readings merged.
    ///
    /// Samplers run without the metric-set lock held; only the merge takes
    /// it. `PollCount` advances by one even when samplers fail.
    pub fn sample_once(&self) -> usize {
        let mut readings = Vec::new();
        {
            let mut samplers = self
                .samplers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for sampler in samplers.iter_mut() {
                match sampler.sample() {
                    Ok(values) => readings.extend(values),
                    Err(e) => {
                        tracing::warn!(sampler = sampler.name(), error = %e, "Sampling failed")
                    }
                }
            }
        }

        let merged = readings.len();
        let mut metrics = self.lock_metrics();
        for (id, value) in readings {
            metrics.gauges.insert(id, value);
        }
        metrics.poll_count += 1;
        tracing::debug!(count = merged, poll_count = metrics.poll_count, "Sampled metrics");
        merged
    }

    /// Starts the periodic sampling loop and returns its handle.
    ///
    /// The loop exits when `cancel` fires. Only one loop may run per
    /// collector.
    pub fn collect(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, CollectorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyStarted);
        }

        let collector = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut tick = interval(collector.poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Sampling loop stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        let cycle = Arc::clone(&collector);
                        if let Err(e) = tokio::task::spawn_blocking(move || cycle.sample_once()).await {
                            tracing::error!(error = %e, "Sampling cycle aborted");
                        }
                    }
                }
            }
        }))
    }

    /// Copy of all current metrics: gauges by name, then `PollCount`.
    pub fn snapshot(&self) -> Vec<MetricsDto> {
        let metrics = self.lock_metrics();
        let mut snapshot: Vec<MetricsDto> = metrics
            .gauges
            .iter()
            .map(|(id, value)| MetricsDto::gauge(id.clone(), *value))
            .collect();
        snapshot.push(MetricsDto::counter(POLL_COUNT, metrics.poll_count));
        snapshot
    }

    pub fn poll_count(&self) -> i64 {
        self.lock_metrics().poll_count
    }
}
