use crate::Sampler;
use anyhow::Result;
use sysinfo::System;
use telemon_common::types::Metric;

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

    /// One `CPUutilization{N}` gauge per core, numbered from 1.
    fn sample(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_cpu_all();
        let points = self
            .system
            .cpus()
            .iter()
            .enumerate()
            .map(|(i, cpu)| Metric::gauge(format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64))
            .collect();
        Ok(points)
    }
}
