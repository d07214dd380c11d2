use crate::Sampler;
use anyhow::Result;
use sysinfo::System;
use telemon_common::types::Metric;

pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for MemorySampler {
    fn name(&self) -> &str {
        "memory"
    }

    fn sample(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let free = self.system.free_memory();
        if total == 0 {
            anyhow::bail!("host reported zero total memory");
        }

        Ok(vec![
            Metric::gauge("TotalMemory", total as f64),
            Metric::gauge("FreeMemory", free as f64),
        ])
    }
}
