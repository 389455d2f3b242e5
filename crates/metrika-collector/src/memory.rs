use crate::Sampler;
use anyhow::{anyhow, bail, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Agent process memory plus host memory and swap figures, in bytes.
///
/// The process figures use the runtime gauge names (`Alloc`, `HeapAlloc`,
/// `HeapInuse`, `Sys`): resident size for the heap gauges and virtual size
/// for `Sys`.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn process_readings(&mut self) -> Result<Vec<(String, f64)>> {
        let pid = self
            .pid
            .ok_or_else(|| anyhow!("current process id is unavailable"))?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| anyhow!("process {pid} not found"))?;

        let resident = process.memory() as f64;
        Ok(vec![
            ("Alloc".to_string(), resident),
            ("HeapAlloc".to_string(), resident),
            ("HeapInuse".to_string(), resident),
            ("Sys".to_string(), process.virtual_memory() as f64),
        ])
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &str {
        "memory"
    }

    fn sample(&mut self) -> Result<Vec<(String, f64)>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            bail!("host reported zero total memory");
        }

        let mut readings = self.process_readings()?;
        readings.extend([
            ("TotalMemory".to_string(), total as f64),
            ("FreeMemory".to_string(), self.system.free_memory() as f64),
            ("UsedMemory".to_string(), self.system.used_memory() as f64),
            (
                "AvailableMemory".to_string(),
                self.system.available_memory() as f64,
            ),
            ("TotalSwap".to_string(), self.system.total_swap() as f64),
            ("UsedSwap".to_string(), self.system.used_swap() as f64),
            ("FreeSwap".to_string(), self.system.free_swap() as f64),
        ]);
        Ok(readings)
    }
}
