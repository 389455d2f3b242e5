//! Turns a collector snapshot into batches and delivers them.
//!
//! The snapshot is cut into `batch_size` chunks in order. A fixed pool of
//! `rate_limit` workers drains a shared queue of chunks; each worker sends
//! its chunks one at a time, so at most `rate_limit` requests are in flight.
//! A failed batch does not stop the others. Once cancelled, workers take no
//! further batches; whatever is left in the queue is reported as not sent.

use crate::config::AgentConfig;
use crate::error::DeliveryError;
use crate::retry::{retry_with_linear_backoff, RetryPolicy};
use crate::transport::{EncodedBatch, Transport};
use metrika_common::codec::Compression;
use metrika_common::secure::Signer;
use metrika_common::MetricsDto;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Summary of a fully successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batches: usize,
    pub metrics: usize,
}

#[derive(Clone)]
pub struct DeliveryPipeline {
    transport: Arc<dyn Transport>,
    signer: Option<Signer>,
    compression: Compression,
    batch_size: usize,
    rate_limit: usize,
    retry: RetryPolicy,
}

/// Batches shared by the workers of one delivery.
struct BatchQueue {
    pending: Mutex<VecDeque<(usize, Vec<MetricsDto>)>>,
    /// Set once a batch's outcome has been recorded by its worker.
    settled: Vec<AtomicBool>,
}

impl BatchQueue {
    fn new(pending: VecDeque<(usize, Vec<MetricsDto>)>) -> Self {
        let settled = (0..pending.len()).map(|_| AtomicBool::new(false)).collect();
        Self {
            pending: Mutex::new(pending),
            settled,
        }
    }

    fn pop(&self) -> Option<(usize, Vec<MetricsDto>)> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn settle(&self, index: usize) {
        self.settled[index].store(true, Ordering::SeqCst);
    }

    /// Indexes never taken by a worker.
    fn drain(&self) -> Vec<usize> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .map(|(index, _)| index)
            .collect()
    }
}

impl DeliveryPipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            signer: None,
            compression: Compression::None,
            batch_size: 3,
            rate_limit: 1,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(transport)
            .with_compression(config.compression)
            .with_signer(Signer::from_key(config.secret_key.as_deref()))
            .with_batch_size(config.batch_size)
            .with_rate_limit(config.rate_limit)
            .with_retry(config.retry_policy())
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Metrics per batch; clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Concurrent senders; clamped to at least 1.
    pub fn with_rate_limit(mut self, rate_limit: usize) -> Self {
        self.rate_limit = rate_limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Serializes, compresses and signs one batch.
    pub fn encode(&self, batch: &[MetricsDto]) -> Result<EncodedBatch, DeliveryError> {
        let json = serde_json::to_vec(batch).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let body = self
            .compression
            .encode(&json)
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let signature = match &self.signer {
            Some(signer) => Some(
                signer
                    .sign(&body)
                    .map_err(|e| DeliveryError::Encode(e.to_string()))?,
            ),
            None => None,
        };
        Ok(EncodedBatch {
            body,
            compression: self.compression,
            signature,
            metrics: batch.len(),
        })
    }

    /// Sends one batch under the retry policy.
    pub async fn send_batch(
        &self,
        batch: &[MetricsDto],
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let encoded = self.encode(batch)?;
        let transport = &self.transport;
        let encoded = &encoded;
        retry_with_linear_backoff(self.retry, cancel, |attempt| async move {
            tracing::debug!(attempt, metrics = encoded.metrics, "Sending batch");
            let status = transport.send(encoded).await?;
            match DeliveryError::from_status(status) {
                None => Ok(()),
                Some(e) => Err(e),
            }
        })
        .await
        .map_err(DeliveryError::from)
    }

    /// Delivers a whole snapshot.
    ///
    /// Succeeds only if every batch was accepted. Batches that succeeded
    /// before a failure stay delivered.
    pub async fn deliver(
        &self,
        snapshot: Vec<MetricsDto>,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, DeliveryError> {
        let metrics = snapshot.len();
        let queue: VecDeque<(usize, Vec<MetricsDto>)> = snapshot
            .chunks(self.batch_size)
            .map(<[MetricsDto]>::to_vec)
            .enumerate()
            .collect();
        let total = queue.len();
        if total == 0 {
            return Ok(DeliveryReport {
                batches: 0,
                metrics: 0,
            });
        }

        let queue = Arc::new(BatchQueue::new(queue));
        let workers = self.rate_limit.min(total);
        let mut set = JoinSet::new();
        for worker in 0..workers {
            let pipeline = self.clone();
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            set.spawn(async move { pipeline.run_worker(worker, queue, cancel).await });
        }

        let mut failures: Vec<(usize, DeliveryError)> = Vec::new();
        let mut panics = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_failures) => failures.extend(worker_failures),
                Err(e) => panics.push(e.to_string()),
            }
        }

        let not_sent = queue.drain();
        if !not_sent.is_empty() {
            tracing::info!(count = not_sent.len(), "Delivery cancelled, batches left unsent");
        }
        failures.extend(not_sent.into_iter().map(|index| (index, DeliveryError::NotSent)));
        // a batch taken but never settled belongs to a worker that died
        let mut panics = panics.into_iter();
        for (index, settled) in queue.settled.iter().enumerate() {
            let lost = !settled.load(Ordering::SeqCst)
                && !failures.iter().any(|(failed, _)| *failed == index);
            if lost {
                let reason = panics.next().unwrap_or_else(|| "worker exited".to_string());
                failures.push((index, DeliveryError::Worker(reason)));
            }
        }

        if failures.is_empty() {
            return Ok(DeliveryReport {
                batches: total,
                metrics,
            });
        }

        failures.sort_by_key(|(index, _)| *index);
        let failed = failures.len();
        let (first_index, first) = failures.swap_remove(0);
        Err(DeliveryError::Incomplete {
            failed,
            total,
            first_index,
            first: Box::new(first),
        })
    }

    async fn run_worker(
        &self,
        worker: usize,
        queue: Arc<BatchQueue>,
        cancel: CancellationToken,
    ) -> Vec<(usize, DeliveryError)> {
        let mut failures = Vec::new();
        while !cancel.is_cancelled() {
            let Some((index, batch)) = queue.pop() else {
                break;
            };
            match self.send_batch(&batch, &cancel).await {
                Ok(()) => {
                    tracing::debug!(worker, batch = index, count = batch.len(), "Batch delivered")
                }
                Err(e) => {
                    tracing::warn!(worker, batch = index, error = %e, "Batch delivery failed");
                    failures.push((index, e));
                }
            }
            queue.settle(index);
        }
        failures
    }
}
