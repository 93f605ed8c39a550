//! Run configuration types
//!
//! The configuration is a YAML document. Unknown top-level keys are ignored so
//! that older configuration files (which carried e.g. a `log` flag) still load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MantisError, MantisResult};

/// Registry key used when a benchmark fragment carries no `type`
pub const DEFAULT_BENCHMARK_TYPE: &str = "generic_benchmark";

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Name of this test; prefixes output and transient file names
    pub test_name: String,

    /// Number of times every group is run under every collector mode
    pub iterations: usize,

    /// Sampling interval handed to time-series collectors, in milliseconds
    #[serde(rename = "time_count")]
    pub timescale_ms: u64,

    /// Collector modes keyed by registry name, each with its own options
    #[serde(default)]
    pub collection_modes: BTreeMap<String, serde_yaml::Value>,

    /// Configured benchmark fragments
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkConfig>,

    /// Optional co-running sets, each a list of benchmark names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_matrix: Option<Vec<Vec<String>>>,

    /// Formatters the final table is handed to
    #[serde(default)]
    pub formatter_modes: Vec<String>,

    /// Counters requested from perf
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub perf_counters: Vec<String>,

    /// Per-step timeout in seconds; a lagging child process is killed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout: Option<f64>,

    /// Directory formatters write into (defaults to the working directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Directory for transient tool output (defaults to the system temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

/// One configured benchmark fragment
///
/// Only `name` and `type` are interpreted here; every other key is handed to
/// the benchmark factory untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkConfig {
    /// Benchmark name, used to resolve matrix entries
    pub name: String,

    /// Benchmark registry key
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Type-specific arguments
    #[serde(flatten)]
    pub arguments: serde_yaml::Mapping,
}

impl BenchmarkConfig {
    /// Create a fragment with the given name and type
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
            arguments: serde_yaml::Mapping::new(),
        }
    }

    /// Add a type-specific argument
    pub fn with_argument(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.arguments
            .insert(serde_yaml::Value::from(key), value.into());
        self
    }

    /// Registry key, falling back to the generic pass-through benchmark
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(DEFAULT_BENCHMARK_TYPE)
    }

    /// Deserialize the whole fragment (name included) into a typed argument struct
    pub fn parse<T: DeserializeOwned>(&self) -> MantisResult<T> {
        let mut mapping = self.arguments.clone();
        mapping.insert("name".into(), self.name.clone().into());
        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping)).map_err(|e| {
            MantisError::config(format!("benchmark {}: {}", self.name, e))
        })
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            test_name: "GENERATEDDEFAULT".to_string(),
            iterations: 1,
            timescale_ms: 1000,
            collection_modes: BTreeMap::new(),
            benchmarks: Vec::new(),
            benchmark_matrix: None,
            formatter_modes: vec!["CSV".to_string()],
            perf_counters: Vec::new(),
            step_timeout: None,
            output_dir: None,
            scratch_dir: None,
        }
    }
}

impl Configuration {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// A missing file, malformed YAML or an invalid value are all fatal.
    pub fn load(path: impl AsRef<Path>) -> MantisResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MantisError::ConfigNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        tracing::info!(path = %path.display(), test_name = %config.test_name, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a configuration from YAML text
    pub fn from_yaml(contents: &str) -> MantisResult<Self> {
        let config: Configuration = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> MantisResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write this configuration to a YAML file
    pub fn dump(&self, path: impl AsRef<Path>) -> MantisResult<()> {
        std::fs::write(path.as_ref(), self.to_yaml()?)?;
        tracing::info!(path = %path.as_ref().display(), "Wrote configuration");
        Ok(())
    }

    /// Set the test name
    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = name.into();
        self
    }

    /// Set the iteration count
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Add a collector mode with its options
    pub fn with_mode(mut self, mode: &str, options: serde_yaml::Value) -> Self {
        self.collection_modes.insert(mode.to_string(), options);
        self
    }

    /// Add a benchmark fragment
    pub fn with_benchmark(mut self, benchmark: BenchmarkConfig) -> Self {
        self.benchmarks.push(benchmark);
        self
    }

    /// Set the benchmark matrix
    pub fn with_matrix(mut self, matrix: Vec<Vec<String>>) -> Self {
        self.benchmark_matrix = Some(matrix);
        self
    }

    /// Set the per-step timeout
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout.as_secs_f64());
        self
    }

    /// Set the transient file directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Per-step timeout as a duration
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout.map(Duration::from_secs_f64)
    }

    /// Directory for transient per-run files
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Base path (without extension) handed to formatters
    pub fn output_base(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.join(&self.test_name),
            None => PathBuf::from(&self.test_name),
        }
    }

    /// Deserialize the options of one collector mode
    ///
    /// A mode configured with no options (`perf:` or `perf: {}`) yields the
    /// option type's default.
    pub fn mode_options<T: DeserializeOwned + Default>(&self, mode: &str) -> MantisResult<T> {
        match self.collection_modes.get(mode) {
            None | Some(serde_yaml::Value::Null) => Ok(T::default()),
            Some(value) => serde_yaml::from_value(value.clone())
                .map_err(|e| MantisError::config(format!("collection mode {mode}: {e}"))),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> MantisResult<()> {
        if self.test_name.trim().is_empty() {
            return Err(MantisError::missing_config("test_name"));
        }

        if self.timescale_ms == 0 {
            return Err(MantisError::config("time_count must be at least 1 ms"));
        }

        if let Some(timeout) = self.step_timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(MantisError::config("step_timeout must be positive"));
            }
        }

        for benchmark in &self.benchmarks {
            if benchmark.name.trim().is_empty() {
                return Err(MantisError::config("benchmark with an empty name"));
            }
        }

        if let Some(matrix) = &self.benchmark_matrix {
            for set in matrix {
                if set.is_empty() {
                    return Err(MantisError::config("benchmark_matrix contains an empty set"));
                }
                for name in set {
                    let matches = self.benchmarks.iter().filter(|b| &b.name == name).count();
                    if matches != 1 {
                        return Err(MantisError::AmbiguousBenchmark {
                            name: name.clone(),
                            matches,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
test_name: sample
iterations: 3
time_count: 500
log: true
collection_modes:
  ttc:
  perf:
    pmu_count: 4
benchmarks:
  - name: A
    cmd: sleep 1
  - name: B
    type: TestBench
    waittimes: [1, 2]
benchmark_matrix:
  - [A, B]
formatter_modes: [CSV, JSON]
perf_counters: [instructions, cycles]
step_timeout: 30
"#;

    #[derive(Debug, Default, Deserialize)]
    struct PerfOptions {
        pmu_count: usize,
    }

    #[test]
    fn test_parse_sample() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.test_name, "sample");
        assert_eq!(config.iterations, 3);
        assert_eq!(config.timescale_ms, 500);
        assert_eq!(config.collection_modes.len(), 2);
        assert_eq!(config.benchmarks.len(), 2);
        assert_eq!(config.benchmarks[0].kind(), DEFAULT_BENCHMARK_TYPE);
        assert_eq!(config.benchmarks[1].kind(), "TestBench");
        assert_eq!(
            config.benchmark_matrix,
            Some(vec![vec!["A".to_string(), "B".to_string()]])
        );
        assert_eq!(config.formatter_modes, vec!["CSV", "JSON"]);
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_mode_options() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        let perf: PerfOptions = config.mode_options("perf").unwrap();
        assert_eq!(perf.pmu_count, 4);

        // `ttc:` with no value falls back to defaults
        let ttc: PerfOptions = config.mode_options("ttc").unwrap();
        assert_eq!(ttc.pmu_count, 0);
    }

    #[test]
    fn test_fragment_arguments_flattened() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        let fragment = &config.benchmarks[0];
        assert_eq!(
            fragment.arguments.get("cmd"),
            Some(&serde_yaml::Value::from("sleep 1"))
        );
        assert!(fragment.arguments.get("name").is_none());
    }

    #[test]
    fn test_validation_matrix_unknown_name() {
        let config = Configuration::default()
            .with_benchmark(BenchmarkConfig::new("A", "generic_benchmark"))
            .with_matrix(vec![vec!["A".into(), "C".into()]]);

        match config.validate() {
            Err(MantisError::AmbiguousBenchmark { name, matches }) => {
                assert_eq!(name, "C");
                assert_eq!(matches, 0);
            }
            other => panic!("expected ambiguous benchmark error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_matrix_duplicate_name() {
        let config = Configuration::default()
            .with_benchmark(BenchmarkConfig::new("A", "generic_benchmark"))
            .with_benchmark(BenchmarkConfig::new("A", "TestBench"))
            .with_matrix(vec![vec!["A".into()]]);

        assert!(matches!(
            config.validate(),
            Err(MantisError::AmbiguousBenchmark { matches: 2, .. })
        ));
    }

    #[test]
    fn test_validation_zero_timescale() {
        let config = Configuration {
            timescale_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bad_timeout() {
        let config = Configuration {
            step_timeout: Some(-1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Configuration::load("/nonexistent/mantis.yaml").unwrap_err();
        assert!(matches!(err, MantisError::ConfigNotFound(_)));
        assert!(err.is_config());
    }

    #[test]
    fn test_dump_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Configuration::default()
            .with_test_name("dumped")
            .with_iterations(2)
            .with_benchmark(
                BenchmarkConfig::new("sleeper", "generic_benchmark").with_argument("cmd", "sleep 0"),
            );
        config.dump(&path).unwrap();

        let loaded = Configuration::load(&path).unwrap();
        assert_eq!(loaded.test_name, "dumped");
        assert_eq!(loaded.iterations, 2);
        assert_eq!(loaded.benchmarks, config.benchmarks);
    }

    #[test]
    fn test_output_base() {
        let mut config = Configuration::default().with_test_name("run1");
        assert_eq!(config.output_base(), PathBuf::from("run1"));
        config.output_dir = Some(PathBuf::from("/tmp/out"));
        assert_eq!(config.output_base(), PathBuf::from("/tmp/out/run1"));
    }
}
