use crate::Sampler;
use anyhow::{bail, Result};
use sysinfo::System;

pub struct CpuSampler {
    system: System,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuSampler {
    fn name(&self) -> &str {
        "cpu"
    }

    fn sample(&mut self) -> Result<Vec<(String, f64)>> {
        self.system.refresh_cpu_all();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            bail!("no CPUs reported by the host");
        }

        let mut readings = Vec::with_capacity(cpus.len() + 1);
        readings.push((
            "CPUutilization".to_string(),
            self.system.global_cpu_usage() as f64,
        ));
        for (i, cpu) in cpus.iter().enumerate() {
            readings.push((format!("CPUutilization{i}"), cpu.cpu_usage() as f64));
        }
        Ok(readings)
    }
}
