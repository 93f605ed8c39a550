//! NVIDIA GPU monitoring
//!
//! Two kinds of test run share this collector:
//!
//! - over-time queries, which sample `nvidia-smi --query-gpu` at the
//!   configured timescale while the benchmark runs;
//! - `gpu_trace`, which profiles the benchmark under `nsys` and folds every
//!   summary table `nsys stats` exports into one record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;

use mantis_core::process::{run_helper, supervise, MonitorProcess};
use mantis_core::{
    device_metric_key, Collector, CollectorContext, Device, MantisError, MantisResult, RunCommand,
    Series, TestRun, TestRunEnv, TransientFile, UnifiedRecord,
};

use crate::common::{apply_outcome, parse_value, run_beside};

/// Timestamp format of `nvidia-smi --format=csv`
const SMI_TIMESTAMP: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// `nsys stats` report suffixes and the metric key each is stored under
const SUMMARY_REPORTS: [(&str, &str); 14] = [
    ("cudaapisum", "cuda_api_summary"),
    ("dx12gpumarkersum", "dx12_gpu_marker_summary"),
    ("dx11pixsum", "dx11_pix_summary"),
    ("gpukernsum", "gpu_kernel_summary"),
    ("gpumemsizesum", "gpu_mem_size_summary"),
    ("gpumemtimesum", "gpu_mem_time_summary"),
    ("khrdebuggpusum", "khr_debug_gpu_summary"),
    ("khrdebugsum", "khr_debug_summary"),
    ("nvtxsum", "nvtx_summary"),
    ("openmpevtsum", "openmp_summary"),
    ("osrtsum", "os_runtime_summary"),
    ("pixsum", "pix_summary"),
    ("vulkangpumarkersum", "vulkan_gpu_marker_summary"),
    ("vulkanmarkerssum", "vulkan_marker_summary"),
];

/// What an NVIDIA test run measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NvidiaMode {
    /// Board power draw
    PowerTime,
    /// GPU and memory utilization
    UtilizationTime,
    /// Total, used and free framebuffer memory
    MemoryBasicTime,
    /// GPU and memory temperature
    TemperatureTime,
    /// Current clocks
    ClocksTime,
    /// `nsys` trace summaries
    GpuTrace,
}

impl NvidiaMode {
    /// Mode key as written in the configuration
    pub fn id(&self) -> &'static str {
        match self {
            NvidiaMode::PowerTime => "power_time",
            NvidiaMode::UtilizationTime => "utilization_time",
            NvidiaMode::MemoryBasicTime => "memory_basic_time",
            NvidiaMode::TemperatureTime => "temperature_time",
            NvidiaMode::ClocksTime => "clocks_time",
            NvidiaMode::GpuTrace => "gpu_trace",
        }
    }

    /// Test-run and record name
    pub fn run_name(&self) -> &'static str {
        match self {
            NvidiaMode::PowerTime => "NvidiaPowerTime",
            NvidiaMode::UtilizationTime => "NvidiaUtilizationTime",
            NvidiaMode::MemoryBasicTime => "NvidiaMemoryBasicTime",
            NvidiaMode::TemperatureTime => "NvidiaTemperatureTime",
            NvidiaMode::ClocksTime => "NvidiaClocksTime",
            NvidiaMode::GpuTrace => "NvidiaGPUTrace",
        }
    }

    /// `nvidia-smi` query fields, empty for the trace mode
    pub fn query_fields(&self) -> &'static [&'static str] {
        match self {
            NvidiaMode::PowerTime => &["power.draw"],
            NvidiaMode::UtilizationTime => &["utilization.gpu", "utilization.memory"],
            NvidiaMode::MemoryBasicTime => &["memory.total", "memory.used", "memory.free"],
            NvidiaMode::TemperatureTime => &["temperature.gpu", "temperature.memory"],
            NvidiaMode::ClocksTime => &[
                "clocks.current.graphics",
                "clocks.current.sm",
                "clocks.current.memory",
                "clocks.current.video",
            ],
            NvidiaMode::GpuTrace => &[],
        }
    }

    /// Units written to the record
    pub fn units(&self) -> &'static str {
        match self {
            NvidiaMode::PowerTime => "time, W",
            NvidiaMode::UtilizationTime => "time, pct",
            NvidiaMode::MemoryBasicTime => "time, MiB",
            NvidiaMode::TemperatureTime => "time, C",
            NvidiaMode::ClocksTime => "time, MHz",
            NvidiaMode::GpuTrace => "summary statistics",
        }
    }
}

impl std::fmt::Display for NvidiaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Options of the `nvidia` collection mode
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NvidiaOptions {
    /// Test runs to perform, in order
    pub modes: Vec<NvidiaMode>,
}

/// Parse `nvidia-smi --query-gpu=timestamp,index,<fields> --format=csv,noheader,nounits`
///
/// Timestamps become seconds since the first sample. Values the tool could
/// not read (`[N/A]`, `[Not Supported]`) are kept as `None`.
pub fn parse_smi_output(text: &str, fields: &[&str]) -> MantisResult<Vec<(String, f64, Option<f64>)>> {
    let mut samples = Vec::new();
    let mut start: Option<NaiveDateTime> = None;

    for (number, line) in text.lines().enumerate() {
        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        if columns.len() < 2 + fields.len() {
            if !line.trim().is_empty() {
                tracing::debug!(line = number + 1, "Skipping short nvidia-smi line");
            }
            continue;
        }

        let timestamp = NaiveDateTime::parse_from_str(columns[0], SMI_TIMESTAMP).map_err(|e| {
            MantisError::parse(format!(
                "nvidia-smi line {}: bad timestamp {:?}: {e}",
                number + 1,
                columns[0]
            ))
        })?;
        let start = *start.get_or_insert(timestamp);
        let elapsed = (timestamp - start).num_milliseconds() as f64 / 1000.0;
        let index = columns[1];

        for (field, raw) in fields.iter().zip(&columns[2..]) {
            samples.push((
                device_metric_key(Device::Gpu, index, field),
                elapsed,
                parse_value(raw),
            ));
        }
    }
    Ok(samples)
}

/// Parse one `nsys stats --format csv` summary table
pub fn parse_summary_csv(text: &str) -> MantisResult<Vec<BTreeMap<String, String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .deserialize::<BTreeMap<String, String>>()
        .map(|row| row.map_err(|e| MantisError::csv(e.to_string())))
        .collect()
}

/// Collects GPU metrics with `nvidia-smi` and `nsys`
#[derive(Debug)]
pub struct NvidiaCollector {
    context: CollectorContext,
    modes: Vec<NvidiaMode>,
}

impl NvidiaCollector {
    /// Collector name
    pub const NAME: &'static str = "NvidiaCollector";

    /// Bind to a context, reading the `nvidia` mode options
    pub fn new(context: CollectorContext) -> MantisResult<Self> {
        let options: NvidiaOptions = context.config.mode_options("nvidia")?;
        if options.modes.is_empty() {
            return Err(MantisError::config("nvidia: no modes configured"));
        }
        Ok(Self {
            context,
            modes: options.modes,
        })
    }

    /// Factory registered for the `nvidia` mode
    pub fn build(context: CollectorContext) -> MantisResult<Box<dyn Collector>> {
        Ok(Box::new(Self::new(context)?))
    }
}

impl Collector for NvidiaCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn context(&self) -> &CollectorContext {
        &self.context
    }

    fn setup(&self) -> MantisResult<Vec<Box<dyn TestRun>>> {
        Ok(self
            .modes
            .iter()
            .map(|&mode| -> Box<dyn TestRun> {
                let output = self.context.transient_path(&format!("nvidia_{mode}"));
                match mode {
                    NvidiaMode::GpuTrace => Box::new(NsysRun {
                        base: output,
                        context: self.context.clone(),
                    }),
                    _ => Box::new(SmiRun {
                        mode,
                        output,
                        context: self.context.clone(),
                    }),
                }
            })
            .collect())
    }
}

/// Samples `nvidia-smi` beside the benchmark
struct SmiRun {
    mode: NvidiaMode,
    output: PathBuf,
    context: CollectorContext,
}

impl SmiRun {
    fn smi_args(&self) -> Vec<String> {
        vec![
            format!("--query-gpu=timestamp,index,{}", self.mode.query_fields().join(",")),
            format!("--loop-ms={}", self.context.config.timescale_ms),
            "--format=csv,noheader,nounits".to_string(),
        ]
    }
}

#[async_trait]
impl TestRun for SmiRun {
    fn name(&self) -> &str {
        self.mode.run_name()
    }

    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord {
        let mut record = self
            .context
            .record(self.name())
            .with_timescale(self.context.config.timescale_ms)
            .with_units(self.mode.units());
        let output = env.transient(self.output.clone());

        let monitor = output
            .create()
            .and_then(|file| MonitorProcess::spawn("nvidia-smi", self.smi_args(), Some(file)));
        let command = self.context.benchmark.run_command();
        if !run_beside(monitor, &command, env.limits.timeout, &mut record).await {
            return record;
        }

        match output
            .read_to_string()
            .and_then(|text| parse_smi_output(&text, self.mode.query_fields()))
        {
            Ok(samples) => {
                for (key, time, value) in samples {
                    record.push_sample(&key, time, value);
                }
            }
            Err(e) => {
                tracing::warn!(run = %self.name(), error = %e, "Failed to parse nvidia-smi output");
                record.clear_metrics();
                record.mark_failed(e.to_string());
            }
        }
        record
    }
}

/// Profiles the benchmark under `nsys`
struct NsysRun {
    base: PathBuf,
    context: CollectorContext,
}

impl NsysRun {
    fn profile_command(&self) -> RunCommand {
        self.context.benchmark.run_command().wrapped(
            "nsys",
            [
                "profile".to_string(),
                "--force-overwrite=true".to_string(),
                "--gpu-metrics-device=all".to_string(),
                "-o".to_string(),
                self.base.display().to_string(),
            ],
        )
    }

    fn stats_command(&self, report: &TransientFile) -> RunCommand {
        RunCommand::program(
            "nsys",
            [
                "stats".to_string(),
                "--format".to_string(),
                "csv".to_string(),
                "-o".to_string(),
                self.base.display().to_string(),
                report.path().display().to_string(),
            ],
        )
        .with_cwd(self.context.benchmark.run_command().cwd)
    }
}

#[async_trait]
impl TestRun for NsysRun {
    fn name(&self) -> &str {
        NvidiaMode::GpuTrace.run_name()
    }

    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord {
        let mut record = self
            .context
            .record(self.name())
            .with_timescale(self.context.config.timescale_ms)
            .with_units(NvidiaMode::GpuTrace.units());

        let base = env.transient(self.base.clone());
        let reports = [base.sibling(".nsys-rep"), base.sibling(".qdrep")];
        let _sqlite = base.sibling(".sqlite");
        let summaries: Vec<(&str, TransientFile)> = SUMMARY_REPORTS
            .iter()
            .map(|(suffix, key)| (*key, base.sibling(&format!("_{suffix}.csv"))))
            .collect();

        let outcome = supervise(&self.profile_command(), env.limits.timeout).await;
        if !apply_outcome(&mut record, &outcome, "nsys profile") {
            return record;
        }

        let Some(report) = reports.iter().find(|r| r.exists()) else {
            tracing::warn!(run = %self.name(), base = %self.base.display(), "nsys produced no report");
            record.mark_failed("nsys produced no report");
            return record;
        };
        if let Err(e) = run_helper(&self.stats_command(report), env.limits.timeout, "nsys stats").await {
            tracing::warn!(run = %self.name(), error = %e, "nsys stats failed");
            record.mark_failed(e.to_string());
            return record;
        }

        for (key, file) in &summaries {
            if !file.exists() {
                continue;
            }
            match file.read_to_string().and_then(|text| parse_summary_csv(&text)) {
                Ok(rows) if rows.is_empty() => {}
                Ok(rows) => record.insert_metric(*key, Series::Summary(rows)),
                Err(e) => {
                    tracing::warn!(run = %self.name(), summary = key, error = %e, "Failed to parse nsys summary");
                    record.mark_failed(format!("{key}: {e}"));
                }
            }
        }
        tracing::debug!(run = %self.name(), summaries = record.measurements().len(), "Collected nsys summaries");
        record
    }
}
