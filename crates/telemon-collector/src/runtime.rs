use crate::Sampler;
use anyhow::Result;
use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};
use telemon_common::types::Metric;

/// Samples the agent's own process plus the `RandomValue` gauge.
pub struct RuntimeSampler {
    system: System,
    pid: Pid,
}

impl RuntimeSampler {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(Self {
            system: System::new(),
            pid,
        })
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &str {
        "runtime"
    }

    fn sample(&mut self) -> Result<Vec<Metric>> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow::anyhow!("process {} not found", self.pid))?;

        let resident = process.memory() as f64;
        let random: f64 = rand::thread_rng().gen();

        Ok(vec![
            Metric::gauge("Alloc", resident),
            Metric::gauge("HeapInuse", resident),
            Metric::gauge("Sys", process.virtual_memory() as f64),
            Metric::gauge("ProcessCPU", process.cpu_usage() as f64),
            Metric::gauge("RandomValue", random),
        ])
    }
}
