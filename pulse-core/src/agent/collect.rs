//! Collection stage: metric sources and their polling tasks.
//!
//! Each source runs in its own task on its own timer and pushes DTOs into a bounded
//! queue. The queue closes when the task observes cancellation.

use crate::error::{PulseError, Result};
use crate::types::Metrics;
use std::time::Duration;
use sysinfo::{CpuExt, Pid, Process, ProcessExt, System, SystemExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of every collection queue.
pub const QUEUE_CAPACITY: usize = 20;

/// Observation-cycle counter emitted once per runtime tick.
pub const POLL_COUNT: &str = "PollCount";
/// Random gauge emitted once per runtime tick.
pub const RANDOM_VALUE: &str = "RandomValue";

/// A sampled set of gauges.
pub trait MetricSource: Send + 'static {
    fn name(&self) -> &'static str;

    /// Read the current values. A failure skips this tick only.
    fn sample(&mut self) -> Result<Vec<Metrics>>;
}

fn unavailable(what: &str) -> PulseError {
    PulseError::InvalidMetric { reason: format!("{} unavailable on this host", what) }
}

/// CPU percentages are only meaningful between two refreshes; anything else reads as idle.
fn percent(usage: f32) -> f64 {
    if usage.is_finite() {
        f64::from(usage).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Point-in-time statistics of one process.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessStats {
    /// Bytes.
    pub resident_memory: u64,
    /// Bytes.
    pub virtual_memory: u64,
    /// Percent of one core since the previous refresh.
    pub cpu_usage: f32,
    pub read_bytes: u64,
    pub written_bytes: u64,
    /// Seconds.
    pub run_time: u64,
}

impl ProcessStats {
    pub fn of(process: &Process) -> Self {
        let disk = process.disk_usage();
        Self {
            resident_memory: process.memory(),
            virtual_memory: process.virtual_memory(),
            cpu_usage: process.cpu_usage(),
            read_bytes: disk.total_read_bytes,
            written_bytes: disk.total_written_bytes,
            run_time: process.run_time(),
        }
    }

    pub fn to_metrics(&self) -> Vec<Metrics> {
        vec![
            Metrics::gauge("ResidentMemory", self.resident_memory as f64),
            Metrics::gauge("VirtualMemory", self.virtual_memory as f64),
            Metrics::gauge("ProcessCPUUsage", percent(self.cpu_usage)),
            Metrics::gauge("DiskReadBytes", self.read_bytes as f64),
            Metrics::gauge("DiskWrittenBytes", self.written_bytes as f64),
            Metrics::gauge("RunTimeSeconds", self.run_time as f64),
        ]
    }
}

/// `TotalMemory` and `FreeMemory` gauges; a zero total means the host reported nothing.
pub fn memory_metrics(total: u64, free: u64) -> Result<Vec<Metrics>> {
    if total == 0 {
        return Err(unavailable("memory statistics"));
    }
    Ok(vec![Metrics::gauge("TotalMemory", total as f64), Metrics::gauge("FreeMemory", free as f64)])
}

/// Statistics of the agent process itself.
pub struct RuntimeSource {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeSource {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            warn!("Cannot determine own pid, runtime statistics disabled");
        }
        Self { system: System::new(), pid }
    }
}

impl Default for RuntimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for RuntimeSource {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn sample(&mut self) -> Result<Vec<Metrics>> {
        let pid = self.pid.ok_or_else(|| unavailable("own pid"))?;
        if !self.system.refresh_process(pid) {
            return Err(unavailable("process statistics"));
        }
        let process = self.system.process(pid).ok_or_else(|| unavailable("process entry"))?;
        Ok(ProcessStats::of(process).to_metrics())
    }
}

/// Host memory totals.
pub struct HostMemorySource {
    system: System,
}

impl HostMemorySource {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for HostMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for HostMemorySource {
    fn name(&self) -> &'static str {
        "host_memory"
    }

    fn sample(&mut self) -> Result<Vec<Metrics>> {
        self.system.refresh_memory();
        memory_metrics(self.system.total_memory(), self.system.free_memory())
    }
}

/// Host CPU utilization across all cores, busy percentage since the previous sample.
pub struct HostCpuSource {
    system: System,
}

impl HostCpuSource {
    /// Takes the baseline the first sample is measured against.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }
}

impl Default for HostCpuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for HostCpuSource {
    fn name(&self) -> &'static str {
        "host_cpu"
    }

    fn sample(&mut self) -> Result<Vec<Metrics>> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(unavailable("cpu statistics"));
        }
        let usage = percent(self.system.global_cpu_info().cpu_usage());
        Ok(vec![Metrics::gauge("CPUutilization1", usage)])
    }
}

/// Spawn a polling task for `source` and return its queue.
///
/// With `cycle_metrics` set, every tick also emits `PollCount` (delta 1) and a random
/// `RandomValue` gauge, whether or not the source could be read.
pub fn spawn_collector<S: MetricSource>(
    mut source: S,
    period: Duration,
    cycle_metrics: bool,
    token: CancellationToken,
) -> mpsc::Receiver<Metrics> {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut batch = source.sample().unwrap_or_else(|e| {
                warn!(source = source.name(), error = %e, "Skipping sample");
                Vec::new()
            });
            if cycle_metrics {
                batch.push(Metrics::counter(POLL_COUNT, 1));
                batch.push(Metrics::gauge(RANDOM_VALUE, rand::random::<f64>()));
            }

            for metric in batch {
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = tx.send(metric) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        debug!(source = source.name(), "Collector stopped");
    });

    rx
}
