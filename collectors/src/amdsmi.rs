//! AMD GPU monitoring with `amd-smi monitor`

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use mantis_core::process::MonitorProcess;
use mantis_core::{
    device_metric_key, Collector, CollectorContext, Device, MantisError, MantisResult, TestRun,
    TestRunEnv, UnifiedRecord,
};

use crate::common::{parse_value, run_beside};

/// Columns of `amd-smi monitor --csv` kept as metrics
pub const MEASUREMENTS: [&str; 14] = [
    "power_usage",
    "hotspot_temperature",
    "memory_temperature",
    "gfx",
    "gfx_clock",
    "mem",
    "mem_clock",
    "encoder",
    "decoder",
    "vclock",
    "dclock",
    "vram_used",
    "vram_total",
    "pcie_bw",
];

/// Parse the CSV file written by `amd-smi monitor --csv --file`
///
/// Rows carry a `gpu` index and an epoch `timestamp` in seconds; timestamps
/// become seconds since the first row. `N/A` cells are skipped.
pub fn parse_amdsmi_output(text: &str) -> MantisResult<Vec<(String, f64, Option<f64>)>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut samples = Vec::new();
    let mut start: Option<i64> = None;

    for row in reader.deserialize::<BTreeMap<String, String>>() {
        let row = row.map_err(|e| MantisError::csv(e.to_string()))?;
        let (Some(timestamp), Some(gpu)) = (row.get("timestamp"), row.get("gpu")) else {
            return Err(MantisError::parse("amd-smi row without timestamp or gpu column"));
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| MantisError::parse(format!("amd-smi: bad timestamp {timestamp:?}")))?;
        let start = *start.get_or_insert(timestamp);

        for measurement in MEASUREMENTS {
            match row.get(measurement).map(String::as_str) {
                None | Some("N/A") | Some("") => {}
                Some(raw) => samples.push((
                    device_metric_key(Device::Gpu, gpu, measurement),
                    (timestamp - start) as f64,
                    parse_value(raw),
                )),
            }
        }
    }
    Ok(samples)
}

/// Collects AMD GPU metrics
#[derive(Debug)]
pub struct AmdSmiCollector {
    context: CollectorContext,
}

impl AmdSmiCollector {
    /// Collector name
    pub const NAME: &'static str = "AmdSMICollector";

    /// Bind to a context
    pub fn new(context: CollectorContext) -> Self {
        Self { context }
    }

    /// Factory registered for the `amdsmi` mode
    pub fn build(context: CollectorContext) -> MantisResult<Box<dyn Collector>> {
        Ok(Box::new(Self::new(context)))
    }
}

impl Collector for AmdSmiCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn context(&self) -> &CollectorContext {
        &self.context
    }

    fn setup(&self) -> MantisResult<Vec<Box<dyn TestRun>>> {
        Ok(vec![Box::new(AmdSmiRun {
            output: self.context.transient_path("amdsmi"),
            context: self.context.clone(),
        })])
    }
}

struct AmdSmiRun {
    output: PathBuf,
    context: CollectorContext,
}

impl AmdSmiRun {
    const NAME: &'static str = "AmdSMIOverTime";

    fn monitor_args(&self) -> Vec<String> {
        // amd-smi only takes whole seconds
        let watch = (self.context.config.timescale_ms / 1000).max(1);
        let mut args = vec!["monitor".to_string(), format!("-w{watch}"), "--csv".to_string()];
        args.extend(
            [
                "--gfx",
                "--mem",
                "--encoder",
                "--decoder",
                "--temperature",
                "--power-usage",
                "--pcie",
                "-v",
                "--file",
            ]
            .iter()
            .map(|a| a.to_string()),
        );
        args.push(self.output.display().to_string());
        args
    }
}

#[async_trait]
impl TestRun for AmdSmiRun {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord {
        let mut record = self
            .context
            .record(Self::NAME)
            .with_timescale(self.context.config.timescale_ms)
            .with_units("time, device units");
        let output = env.transient(self.output.clone());

        let monitor = MonitorProcess::spawn("amd-smi", self.monitor_args(), None);
        let command = self.context.benchmark.run_command();
        if !run_beside(monitor, &command, env.limits.timeout, &mut record).await {
            return record;
        }

        match output.read_to_string().and_then(|text| parse_amdsmi_output(&text)) {
            Ok(samples) => {
                for (key, time, value) in samples {
                    record.push_sample(&key, time, value);
                }
            }
            Err(e) => {
                tracing::warn!(run = Self::NAME, error = %e, "Failed to parse amd-smi output");
                record.clear_metrics();
                record.mark_failed(e.to_string());
            }
        }
        record
    }
}
