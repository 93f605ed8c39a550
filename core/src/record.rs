//! The unified data record every collector populates
//!
//! A record has a fixed set of reserved fields plus an explicit map of
//! dynamic metrics. When serialized the metrics are flattened next to the
//! reserved fields, one key per metric, so a table of records reads like one
//! wide row per test run.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MantisError, MantisResult};

/// Group name used for benchmarks that run on their own
pub const SOLO_SET: &str = "solo";

/// Prefix given to metrics that would shadow a reserved column
pub const RESERVED_METRIC_PREFIX: &str = "metric_";

/// Key a metric is stored under
///
/// A metric named like a reserved column (say a tool reporting `duration`)
/// is stored as `metric_duration` so the flattened row keeps one key per
/// column.
pub fn metric_key(key: &str) -> Cow<'_, str> {
    if RESERVED_COLUMNS.contains(&key) {
        Cow::Owned(format!("{RESERVED_METRIC_PREFIX}{key}"))
    } else {
        Cow::Borrowed(key)
    }
}

/// Reserved column names, in output order
pub const RESERVED_COLUMNS: [&str; 9] = [
    "benchmark_name",
    "benchmark_set",
    "collector_name",
    "iteration",
    "timescale",
    "units",
    "measurements",
    "duration",
    "error",
];

/// One `[timestamp, value]` pair of a time series
///
/// The timestamp is seconds since the start of the monitored span. A value
/// the tool reported but that could not be read (e.g. `<not counted>`) is
/// kept as `None` so the sample still marks the point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample(pub f64, pub Option<f64>);

/// Values recorded under one metric key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Series {
    /// A single summary value
    Scalar(f64),
    /// Ordered `[timestamp, value]` samples
    TimeSeries(Vec<Sample>),
    /// Tabular summary, one string map per row
    Summary(Vec<BTreeMap<String, String>>),
}

impl Series {
    /// Number of entries held
    pub fn len(&self) -> usize {
        match self {
            Series::Scalar(_) => 1,
            Series::TimeSeries(samples) => samples.len(),
            Series::Summary(rows) => rows.len(),
        }
    }

    /// Whether the series holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Units of the values in a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Units {
    /// One description for every metric
    Single(String),
    /// One description per measured quantity
    Multiple(Vec<String>),
}

impl Default for Units {
    fn default() -> Self {
        Units::Single(String::new())
    }
}

impl From<&str> for Units {
    fn from(value: &str) -> Self {
        Units::Single(value.to_string())
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Single(unit) => f.write_str(unit),
            Units::Multiple(units) => f.write_str(&units.join(", ")),
        }
    }
}

/// Device class used in per-device metric keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// A GPU, keyed as `gpu_{index}_{metric}`
    Gpu,
    /// A CPU core, keyed as `cpu_{index}_{metric}`
    Cpu,
}

/// Build the metric key for one device and metric
pub fn device_metric_key(device: Device, index: impl fmt::Display, metric: &str) -> String {
    let prefix = match device {
        Device::Gpu => "gpu",
        Device::Cpu => "cpu",
    };
    format!("{prefix}_{index}_{metric}")
}

/// A unified data record (one row of the unified table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    /// Name of the benchmark instance measured
    pub benchmark_name: String,

    /// Co-running set the benchmark belonged to
    #[serde(default = "default_set")]
    pub benchmark_set: String,

    /// Name of the collector (or test run) that produced the record
    pub collector_name: String,

    /// Iteration index
    pub iteration: usize,

    /// Sampling interval in milliseconds, absent for non-time-series data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u64>,

    /// Units of the values
    #[serde(default)]
    pub units: Units,

    /// Metric keys present in this record
    #[serde(default)]
    measurements: Vec<String>,

    /// Wall-clock seconds of the monitored span, 0 until set
    #[serde(default)]
    pub duration: f64,

    /// Set when the step failed, timed out or a hook failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Dynamic metrics keyed by metric name
    #[serde(flatten)]
    metrics: BTreeMap<String, Series>,
}

fn default_set() -> String {
    SOLO_SET.to_string()
}

impl UnifiedRecord {
    /// Create an empty record with its identifying fields
    pub fn new(
        benchmark_name: impl Into<String>,
        benchmark_set: impl Into<String>,
        collector_name: impl Into<String>,
        iteration: usize,
    ) -> Self {
        Self {
            benchmark_name: benchmark_name.into(),
            benchmark_set: benchmark_set.into(),
            collector_name: collector_name.into(),
            iteration,
            timescale: None,
            units: Units::default(),
            measurements: Vec::new(),
            duration: 0.0,
            error: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Set the sampling interval
    pub fn with_timescale(mut self, timescale_ms: u64) -> Self {
        self.timescale = Some(timescale_ms);
        self
    }

    /// Set the units
    pub fn with_units(mut self, units: impl Into<Units>) -> Self {
        self.units = units.into();
        self
    }

    /// Metric keys present, in insertion order
    pub fn measurements(&self) -> &[String] {
        &self.measurements
    }

    /// All metrics
    pub fn metrics(&self) -> &BTreeMap<String, Series> {
        &self.metrics
    }

    /// Look up one metric
    pub fn metric(&self, key: &str) -> Option<&Series> {
        self.metrics.get(metric_key(key).as_ref())
    }

    /// Whether the record is flagged as failed or incomplete
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Flag the record as failed, keeping whatever data it holds
    ///
    /// A second failure is appended to the first message.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{previous}; {message}"),
            None => message,
        });
    }

    /// Store a whole series under a metric key, replacing any previous one
    pub fn insert_metric(&mut self, key: impl Into<String>, series: Series) {
        let key = key.into();
        let key = metric_key(&key).into_owned();
        self.declare(&key);
        self.metrics.insert(key, series);
    }

    /// Append one sample to a time series, creating it on first use
    pub fn push_sample(&mut self, key: &str, timestamp: f64, value: Option<f64>) {
        let key = metric_key(key);
        let key = key.as_ref();
        self.declare(key);
        let series = self
            .metrics
            .entry(key.to_string())
            .or_insert_with(|| Series::TimeSeries(Vec::new()));
        match series {
            Series::TimeSeries(samples) => samples.push(Sample(timestamp, value)),
            other => {
                tracing::warn!(key, "Replacing non time-series metric with samples");
                *other = Series::TimeSeries(vec![Sample(timestamp, value)]);
            }
        }
    }

    /// Drop every metric, e.g. after a failed parse
    pub fn clear_metrics(&mut self) {
        self.metrics.clear();
        self.measurements.clear();
    }

    fn declare(&mut self, key: &str) {
        if !self.measurements.iter().any(|m| m == key) {
            self.measurements.push(key.to_string());
        }
    }

    /// Check the record invariants
    ///
    /// Identity fields must be set, the duration must be a non-negative
    /// number, `measurements` must list exactly the metric keys present, and
    /// no metric may be named like a reserved column.
    pub fn validate(&self) -> MantisResult<()> {
        if self.benchmark_name.is_empty() {
            return Err(MantisError::parse("record without benchmark_name"));
        }
        if self.collector_name.is_empty() {
            return Err(MantisError::parse("record without collector_name"));
        }
        if !(self.duration.is_finite() && self.duration >= 0.0) {
            return Err(MantisError::parse(format!(
                "record {}/{} has invalid duration {}",
                self.benchmark_name, self.collector_name, self.duration
            )));
        }
        if self.measurements.len() != self.metrics.len()
            || self.measurements.iter().any(|m| !self.metrics.contains_key(m))
        {
            return Err(MantisError::parse(format!(
                "record {}/{} declares {:?} but holds {:?}",
                self.benchmark_name,
                self.collector_name,
                self.measurements,
                self.metrics.keys().collect::<Vec<_>>()
            )));
        }
        if let Some(key) = self.metrics.keys().find(|k| RESERVED_COLUMNS.contains(&k.as_str())) {
            return Err(MantisError::parse(format!(
                "record {}/{} has a metric shadowing the reserved column {key}",
                self.benchmark_name, self.collector_name
            )));
        }
        Ok(())
    }
}
