use crate::Sampler;
use anyhow::Result;
use rand::Rng;

/// Jitter gauge `RandomValue`, uniform in `[1, 100]`.
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn name(&self) -> &str {
        "random"
    }

    fn sample(&mut self) -> Result<Vec<(String, f64)>> {
        let value: u32 = rand::thread_rng().gen_range(1..=100);
        Ok(vec![("RandomValue".to_string(), f64::from(value))])
    }
}
