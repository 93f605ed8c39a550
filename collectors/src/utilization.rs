//! Host CPU utilization sampled from `/proc/stat`

use std::collections::BTreeMap;

use ::fb_procfs as procfs;
use async_trait::async_trait;

use mantis_core::process::supervise_sampled;
use mantis_core::{
    device_metric_key, Collector, CollectorContext, Device, MantisResult, TestRun, TestRunEnv,
    UnifiedRecord,
};

use crate::common::apply_outcome;

/// Metric key of the whole-host utilization
pub const TOTAL_UTILIZATION: &str = "cpu_utilization";

/// Busy share of the time between two `/proc/stat` snapshots, in percent
///
/// Returns `None` when either snapshot lacks a field.
pub fn cpu_utilization(curr: &procfs::CpuStat, prev: &procfs::CpuStat) -> Option<f64> {
    match (curr, prev) {
        (
            procfs::CpuStat {
                user_usec: Some(curr_user),
                nice_usec: Some(curr_nice),
                system_usec: Some(curr_system),
                idle_usec: Some(curr_idle),
                iowait_usec: Some(curr_iowait),
                irq_usec: Some(curr_irq),
                softirq_usec: Some(curr_softirq),
                stolen_usec: Some(curr_stolen),
                ..
            },
            procfs::CpuStat {
                user_usec: Some(prev_user),
                nice_usec: Some(prev_nice),
                system_usec: Some(prev_system),
                idle_usec: Some(prev_idle),
                iowait_usec: Some(prev_iowait),
                irq_usec: Some(prev_irq),
                softirq_usec: Some(prev_softirq),
                stolen_usec: Some(prev_stolen),
                ..
            },
        ) => {
            let idle_usec = curr_idle.saturating_sub(*prev_idle);
            let iowait_usec = curr_iowait.saturating_sub(*prev_iowait);
            let busy_usec = curr_user.saturating_sub(*prev_user)
                + curr_nice.saturating_sub(*prev_nice)
                + curr_system.saturating_sub(*prev_system)
                + curr_irq.saturating_sub(*prev_irq)
                + curr_softirq.saturating_sub(*prev_softirq)
                + curr_stolen.saturating_sub(*prev_stolen);

            let total_usec = idle_usec + iowait_usec + busy_usec;
            if total_usec == 0 {
                return Some(0.0);
            }
            Some(((busy_usec as f64) / (total_usec as f64)).clamp(0.0, 1.0) * 100.0)
        }
        _ => None,
    }
}

/// Rolling `/proc/stat` reader
struct CpuSampler {
    reader: procfs::ProcReader,
    prev_total: Option<procfs::CpuStat>,
    prev_cpus: BTreeMap<u32, procfs::CpuStat>,
    read_errors: usize,
}

impl CpuSampler {
    fn new() -> Self {
        let mut sampler = Self {
            reader: procfs::ProcReader::new(),
            prev_total: None,
            prev_cpus: BTreeMap::new(),
            read_errors: 0,
        };
        // baseline for the first interval
        sampler.take(None);
        sampler
    }

    /// Read a snapshot and, given a record, append the utilization since the previous one
    fn take(&mut self, sample: Option<(&mut UnifiedRecord, f64)>) {
        let stat = match self.reader.read_stat() {
            Ok(stat) => stat,
            Err(e) => {
                self.read_errors += 1;
                tracing::debug!(error = %e, "Failed to read /proc/stat");
                return;
            }
        };

        if let Some((record, elapsed)) = sample {
            if let (Some(curr), Some(prev)) = (&stat.total_cpu, &self.prev_total) {
                record.push_sample(TOTAL_UTILIZATION, elapsed, cpu_utilization(curr, prev));
            }
            if let Some(cpus) = &stat.cpus_map {
                for (cpu, curr) in cpus {
                    if let Some(prev) = self.prev_cpus.get(cpu) {
                        let key = device_metric_key(Device::Cpu, cpu, "utilization");
                        record.push_sample(&key, elapsed, cpu_utilization(curr, prev));
                    }
                }
            }
        }

        self.prev_total = stat.total_cpu;
        self.prev_cpus = stat.cpus_map.unwrap_or_default();
    }
}

/// Samples host CPU utilization while the benchmark runs
#[derive(Debug)]
pub struct UtilizationCollector {
    context: CollectorContext,
}

impl UtilizationCollector {
    /// Collector name
    pub const NAME: &'static str = "UtilizationCollector";

    /// Bind to a context
    pub fn new(context: CollectorContext) -> Self {
        Self { context }
    }

    /// Factory registered for the `utilization` mode
    pub fn build(context: CollectorContext) -> MantisResult<Box<dyn Collector>> {
        Ok(Box::new(Self::new(context)))
    }
}

impl Collector for UtilizationCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn context(&self) -> &CollectorContext {
        &self.context
    }

    fn setup(&self) -> MantisResult<Vec<Box<dyn TestRun>>> {
        Ok(vec![Box::new(UtilizationRun {
            context: self.context.clone(),
        })])
    }
}

struct UtilizationRun {
    context: CollectorContext,
}

#[async_trait]
impl TestRun for UtilizationRun {
    fn name(&self) -> &str {
        "CpuUtilization"
    }

    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord {
        let mut record = self
            .context
            .record(self.name())
            .with_timescale(self.context.config.timescale_ms)
            .with_units("time, pct");
        let command = self.context.benchmark.run_command();

        let mut sampler = CpuSampler::new();
        let outcome = supervise_sampled(
            &command,
            env.limits.timeout,
            Some(self.context.timescale()),
            |_, elapsed| sampler.take(Some((&mut record, elapsed))),
        )
        .await;
        // closing sample so short runs still report one interval
        sampler.take(Some((&mut record, outcome.elapsed_secs())));

        if sampler.read_errors > 0 {
            tracing::warn!(run = %self.name(), errors = sampler.read_errors, "Some /proc/stat reads failed");
        }
        if !apply_outcome(&mut record, &outcome, "benchmark") {
            record.clear_metrics();
        }
        record
    }
}
