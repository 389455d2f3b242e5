//! Metric sampling for the metrika agent.
//!
//! Each [`Sampler`] reads one category of runtime or system figures (memory,
//! CPU, load, random jitter). The [`Collector`] runs all samplers on a fixed
//! interval, keeps the latest values and hands out consistent snapshots for
//! delivery.

pub mod collector;
pub mod cpu;
pub mod load;
pub mod memory;
pub mod random;

pub use collector::{Collector, CollectorError, POLL_COUNT};

use anyhow::Result;

/// A source of gauge readings on the agent host.
///
/// Samplers are registered with the [`Collector`] and called once per poll
/// cycle. A failing sampler does not abort the cycle; its gauges keep their
/// previous values.
pub trait Sampler: Send + Sync {
    /// Sampler name (e.g. `"cpu"`), used in logs.
    fn name(&self) -> &str;

    /// Reads the current values as `(metric id, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn sample(&mut self) -> Result<Vec<(String, f64)>>;
}

/// The samplers every agent runs by default.
pub fn default_samplers() -> Vec<Box<dyn Sampler>> {
    vec![
        Box::new(memory::RuntimeSampler::new()),
        Box::new(cpu::CpuSampler::new()),
        Box::new(load::LoadSampler::new()),
        Box::new(random::RandomSampler),
    ]
}
