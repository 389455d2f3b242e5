use crate::Sampler;
use anyhow::Result;
use sysinfo::System;

pub struct LoadSampler;

impl LoadSampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for LoadSampler {
    fn name(&self) -> &str {
        "load"
    }

    fn sample(&mut self) -> Result<Vec<(String, f64)>> {
        let load_avg = System::load_average();
        Ok(vec![
            ("LoadAverage1".to_string(), load_avg.one),
            ("LoadAverage5".to_string(), load_avg.five),
            ("LoadAverage15".to_string(), load_avg.fifteen),
            ("Uptime".to_string(), System::uptime() as f64),
        ])
    }
}
