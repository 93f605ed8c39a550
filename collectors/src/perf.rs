//! `perf stat` interval counters
//!
//! The configured counters are split into chunks of at most `pmu_count`
//! events, since the PMU can only count that many at once without
//! multiplexing. Each chunk becomes one test run that wraps the benchmark in
//! `perf stat -x , -a -e <chunk> -I <timescale>` and reads back the CSV
//! interval output.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use mantis_core::process::supervise;
use mantis_core::{
    Collector, CollectorContext, MantisError, MantisResult, RunCommand, Series, TestRun,
    TestRunEnv, UnifiedRecord,
};

use crate::common::{apply_outcome, parse_value};

/// Events counted when neither the configuration nor the mode names any
pub fn default_counters() -> Vec<String> {
    [
        "instructions",
        "cycles",
        "cache-references",
        "cache-misses",
        "branch-instructions",
        "branch-misses",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// Counter families picked for a generated configuration, by accepted spelling
const GENERATED_COUNTERS: [&[&str]; 5] = [
    &["instructions"],
    &["cycles", "cpu-cycles"],
    &["LLC-stores"],
    &["page-faults"],
    &["major-faults"],
];

/// Pick counters for a generated configuration out of the ones perf offers
///
/// Matching ignores case; the spelling perf reported is kept.
pub fn select_counters<'a>(available: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let folded: Vec<(String, &str)> = available
        .into_iter()
        .map(|counter| (counter.to_lowercase(), counter))
        .collect();
    GENERATED_COUNTERS
        .iter()
        .filter_map(|spellings| {
            spellings.iter().find_map(|wanted| {
                let wanted = wanted.to_lowercase();
                folded
                    .iter()
                    .find(|(name, _)| *name == wanted)
                    .map(|(_, counter)| counter.to_string())
            })
        })
        .collect()
}

/// Events this host's perf can count, from `perf list --raw-dump`
pub async fn available_counters() -> MantisResult<Vec<String>> {
    let output = tokio::process::Command::new("perf")
        .args(["list", "--raw-dump", "hw", "sw", "cache", "tracepoint", "pmu", "sdt"])
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| MantisError::process(format!("failed to run perf list: {e}")))?;
    if !output.status.success() {
        return Err(MantisError::process(format!(
            "perf list exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .map(str::to_string)
        .collect())
}

fn default_pmu_count() -> usize {
    4
}

/// Options of the `perf` collection mode
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerfOptions {
    /// Hardware counters usable at once
    pub pmu_count: usize,
    /// Counters, used when the top-level `perf_counters` is empty
    pub counters: Vec<String>,
}

impl Default for PerfOptions {
    fn default() -> Self {
        Self {
            pmu_count: default_pmu_count(),
            counters: Vec::new(),
        }
    }
}

/// One parsed line of `perf stat -x ,` interval output
#[derive(Debug, Clone, PartialEq)]
pub struct PerfSample {
    /// Seconds since perf started
    pub time: f64,
    /// Counter value, `None` when perf could not count it
    pub value: Option<f64>,
    /// Event name
    pub event: String,
}

/// Parse `perf stat -I -x ,` output
///
/// Lines are `time,value,unit,event,...`. Comment lines and blank lines are
/// skipped; a value perf could not read is kept as `None`.
pub fn parse_perf_output(text: &str) -> MantisResult<Vec<PerfSample>> {
    let mut samples = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 4 {
            tracing::debug!(line = number + 1, "Skipping short perf line");
            continue;
        }
        let time = fields[0].trim().parse::<f64>().map_err(|_| {
            MantisError::parse(format!(
                "perf output line {}: bad timestamp {:?}",
                number + 1,
                fields[0]
            ))
        })?;
        samples.push(PerfSample {
            time,
            value: parse_value(fields[1]),
            event: fields[3].trim().to_string(),
        });
    }
    Ok(samples)
}

/// Collects hardware counters with `perf stat`
#[derive(Debug)]
pub struct PerfCollector {
    context: CollectorContext,
    counters: Vec<String>,
    pmu_count: usize,
}

impl PerfCollector {
    /// Collector name, also the prefix of the test-run names
    pub const NAME: &'static str = "PerfCollector";

    /// Bind to a context, reading the `perf` mode options
    pub fn new(context: CollectorContext) -> MantisResult<Self> {
        let options: PerfOptions = context.config.mode_options("perf")?;
        if options.pmu_count == 0 {
            return Err(MantisError::config("perf: pmu_count must be at least 1"));
        }
        let counters = if !context.config.perf_counters.is_empty() {
            context.config.perf_counters.clone()
        } else if !options.counters.is_empty() {
            options.counters
        } else {
            default_counters()
        };
        Ok(Self {
            context,
            counters,
            pmu_count: options.pmu_count,
        })
    }

    /// Factory registered for the `perf` mode
    pub fn build(context: CollectorContext) -> MantisResult<Box<dyn Collector>> {
        Ok(Box::new(Self::new(context)?))
    }
}

impl Collector for PerfCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn context(&self) -> &CollectorContext {
        &self.context
    }

    fn setup(&self) -> MantisResult<Vec<Box<dyn TestRun>>> {
        Ok(self
            .counters
            .chunks(self.pmu_count)
            .enumerate()
            .map(|(i, counters)| {
                Box::new(PerfRun {
                    name: format!("{}_{i}", Self::NAME),
                    counters: counters.to_vec(),
                    output: self.context.transient_path(&format!("perfrun_{i}")),
                    context: self.context.clone(),
                }) as Box<dyn TestRun>
            })
            .collect())
    }
}

struct PerfRun {
    name: String,
    counters: Vec<String>,
    output: PathBuf,
    context: CollectorContext,
}

impl PerfRun {
    fn command(&self) -> RunCommand {
        let output = self.output.display().to_string();
        self.context.benchmark.run_command().wrapped(
            "perf",
            [
                "stat".to_string(),
                "-x".to_string(),
                ",".to_string(),
                "-a".to_string(),
                "-e".to_string(),
                self.counters.join(","),
                "-I".to_string(),
                self.context.config.timescale_ms.to_string(),
                "-o".to_string(),
                output,
                "--".to_string(),
            ],
        )
    }
}

#[async_trait]
impl TestRun for PerfRun {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord {
        let mut record = self
            .context
            .record(&self.name)
            .with_timescale(self.context.config.timescale_ms)
            .with_units("count per timescale milliseconds");
        let output = env.transient(self.output.clone());
        let command = self.command();
        tracing::debug!(run = %self.name, command = %command, "Starting perf");

        let outcome = supervise(&command, env.limits.timeout).await;
        if !apply_outcome(&mut record, &outcome, "perf") {
            tracing::warn!(run = %self.name, counters = ?self.counters, "Check that all configured counters are valid");
            return record;
        }

        match output.read_to_string().and_then(|text| parse_perf_output(&text)) {
            Ok(samples) => {
                for counter in &self.counters {
                    record.insert_metric(counter.clone(), Series::TimeSeries(Vec::new()));
                }
                for sample in samples {
                    record.push_sample(&sample.event, sample.time, sample.value);
                }
            }
            Err(e) => {
                tracing::warn!(run = %self.name, error = %e, "Failed to read perf output");
                record.clear_metrics();
                record.mark_failed(e.to_string());
            }
        }
        record
    }
}
