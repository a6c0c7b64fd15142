//! Sources of captured samples
//!
//! A [`Sampler`] produces the named values of one capture. The agent adds
//! `PollCount` and `RandomValue` on top of whatever the sampler returns.

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{trace, warn};

use crate::metric::MetricRecord;

/// Producer of named numeric samples
pub trait Sampler: Send {
    fn sample(&mut self) -> Vec<MetricRecord>;
}

impl<F> Sampler for F
where
    F: FnMut() -> Vec<MetricRecord> + Send,
{
    fn sample(&mut self) -> Vec<MetricRecord> {
        self()
    }
}

/// System and process gauges read through `sysinfo`
///
/// CPU usage is computed against the previous refresh, so the first capture
/// reports 0 for every core.
pub struct SystemSampler {
    sys: System,
    pid: Option<Pid>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| warn!("process metrics unavailable: {e}"))
            .ok();

        let mut sys = System::new();
        sys.refresh_cpu_usage();

        Self { sys, pid }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self) -> Vec<MetricRecord> {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let mut records = vec![
            MetricRecord::gauge("TotalMemory", self.sys.total_memory() as f64),
            MetricRecord::gauge("FreeMemory", self.sys.free_memory() as f64),
            MetricRecord::gauge("UsedMemory", self.sys.used_memory() as f64),
            MetricRecord::gauge("TotalSwap", self.sys.total_swap() as f64),
            MetricRecord::gauge("UsedSwap", self.sys.used_swap() as f64),
        ];

        if let Some(pid) = self.pid {
            self.sys
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), false);

            if let Some(process) = self.sys.process(pid) {
                records.push(MetricRecord::gauge("ProcessMemory", process.memory() as f64));
                records.push(MetricRecord::gauge(
                    "ProcessVirtualMemory",
                    process.virtual_memory() as f64,
                ));
                records.push(MetricRecord::gauge(
                    "ProcessCpuUsage",
                    process.cpu_usage() as f64,
                ));
            }
        }

        records.extend(
            self.sys
                .cpus()
                .iter()
                .enumerate()
                .map(|(i, cpu)| MetricRecord::gauge(format!("CPUUtilization{i}"), cpu.cpu_usage() as f64)),
        );

        trace!("sampled {} system metrics", records.len());
        records
    }
}
