use crate::config::AgentConfig;
use crate::pipeline::DeliveryPipeline;
use crate::transport::HttpTransport;
use anyhow::Result;
use metrika_collector::Collector;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Wires a collector to a delivery pipeline on a reporting timer.
pub struct Agent {
    collector: Arc<Collector>,
    pipeline: DeliveryPipeline,
    report_interval: Duration,
    shutdown_grace: Duration,
}

/// Running agent tasks. Dropping the handle leaves them running.
pub struct AgentHandle {
    cancel: CancellationToken,
    sampling: JoinHandle<()>,
    reporting: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl Agent {
    pub fn new(
        collector: Arc<Collector>,
        pipeline: DeliveryPipeline,
        report_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            collector,
            pipeline,
            report_interval: report_interval.max(Duration::from_millis(1)),
            shutdown_grace,
        }
    }

    /// Builds an agent with the default samplers and an HTTP transport.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let collector = Arc::new(Collector::new(
            metrika_collector::default_samplers(),
            config.poll_interval(),
        ));
        let transport = HttpTransport::new(config.updates_url(), config.request_timeout())?;
        let pipeline = DeliveryPipeline::from_config(config, Arc::new(transport));
        Ok(Self::new(
            collector,
            pipeline,
            config.report_interval(),
            config.shutdown_grace(),
        ))
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Starts the sampling and reporting loops.
    pub fn start(self, cancel: CancellationToken) -> Result<AgentHandle> {
        let sampling = self.collector.collect(cancel.child_token())?;

        let reporting_cancel = cancel.child_token();
        let Agent {
            collector,
            pipeline,
            report_interval,
            shutdown_grace,
        } = self;
        let reporting = tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + report_interval, report_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = reporting_cancel.cancelled() => {
                        tracing::debug!("Reporting loop stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        report_once(&collector, &pipeline, &reporting_cancel).await;
                    }
                }
            }
        });

        Ok(AgentHandle {
            cancel,
            sampling,
            reporting,
            shutdown_grace,
        })
    }
}

/// Delivers one snapshot; failures are logged, never propagated.
pub async fn report_once(
    collector: &Collector,
    pipeline: &DeliveryPipeline,
    cancel: &CancellationToken,
) {
    let snapshot = collector.snapshot();
    match pipeline.deliver(snapshot, cancel).await {
        Ok(report) => tracing::info!(
            batches = report.batches,
            metrics = report.metrics,
            "Metrics reported"
        ),
        Err(e) => tracing::warn!(error = %e, "Metrics report incomplete"),
    }
}

impl AgentHandle {
    /// Cancels both loops and waits for the reporting loop up to the grace
    /// period. A loop still running after that is abandoned.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Err(e) = self.sampling.await {
            tracing::warn!(error = %e, "Sampling loop ended abnormally");
        }

        match tokio::time::timeout(self.shutdown_grace, self.reporting).await {
            Ok(Ok(())) => tracing::info!("Reporting loop stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Reporting loop ended abnormally"),
            Err(_) => tracing::warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Reporting loop did not stop within grace period, abandoning it"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::retry::RetryPolicy;
    use crate::transport::{EncodedBatch, Transport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _batch: &EncodedBatch) -> Result<u16, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(200)
        }
    }

    fn agent(transport: Arc<CountingTransport>, grace: Duration) -> Agent {
        let collector = Arc::new(Collector::new(vec![], Duration::from_millis(5)));
        let pipeline = DeliveryPipeline::new(transport)
            .with_retry(RetryPolicy::new(0, Duration::from_millis(1)));
        Agent::new(collector, pipeline, Duration::from_millis(10), grace)
    }

    #[tokio::test]
    async fn reports_periodically_until_shutdown() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let agent = agent(transport.clone(), Duration::from_secs(1));
        let collector = Arc::clone(agent.collector());
        let handle = agent.start(CancellationToken::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;

        let calls = transport.calls.load(Ordering::SeqCst);
        assert!(calls >= 1, "expected at least one report, got {calls}");
        assert!(collector.poll_count() >= 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_grace_period() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(30),
        });
        let agent = agent(transport.clone(), Duration::from_millis(20));
        let handle = agent.start(CancellationToken::new()).unwrap();

        // let a delivery get stuck in flight
        tokio::time::sleep(Duration::from_millis(40)).await;
        let started = Instant::now();
        handle.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
