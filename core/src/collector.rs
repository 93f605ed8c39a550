//! Collector and test-run contracts
//!
//! A collector adapts one monitoring tool to one benchmark for one iteration.
//! Its `setup` only plans work: it returns the test runs, each of which
//! launches processes when (and only when) it is run. The lockstep driver
//! turns the plan into a resumable producer, see [`crate::lockstep`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::benchmark::Benchmark;
use crate::config::Configuration;
use crate::error::MantisResult;
use crate::record::UnifiedRecord;
use crate::transient::{TransientFile, TransientKey};

/// Everything a collector is bound to
#[derive(Clone)]
pub struct CollectorContext {
    /// Shared run configuration
    pub config: Arc<Configuration>,
    /// Iteration index
    pub iteration: usize,
    /// Benchmark the collector monitors
    pub benchmark: Arc<dyn Benchmark>,
    /// Name of the co-running set
    pub benchmark_set: String,
}

impl CollectorContext {
    /// Create a context
    pub fn new(
        config: Arc<Configuration>,
        iteration: usize,
        benchmark: Arc<dyn Benchmark>,
        benchmark_set: impl Into<String>,
    ) -> Self {
        Self {
            config,
            iteration,
            benchmark,
            benchmark_set: benchmark_set.into(),
        }
    }

    /// Name of the monitored benchmark
    pub fn benchmark_name(&self) -> &str {
        self.benchmark.name()
    }

    /// Sampling interval from the configuration
    pub fn timescale(&self) -> Duration {
        Duration::from_millis(self.config.timescale_ms)
    }

    /// An empty record carrying this context's identity
    pub fn record(&self, collector_name: &str) -> UnifiedRecord {
        UnifiedRecord::new(
            self.benchmark.name(),
            self.benchmark_set.clone(),
            collector_name,
            self.iteration,
        )
    }

    /// Key for a transient file of the given tool
    pub fn transient_key(&self, tool: &str) -> TransientKey {
        TransientKey {
            test_name: self.config.test_name.clone(),
            iteration: self.iteration,
            benchmark: self.benchmark.name().to_string(),
            benchmark_set: self.benchmark_set.clone(),
            tool: tool.to_string(),
        }
    }

    /// Path a tool should write its transient output to
    ///
    /// The file itself is guarded by [`TestRunEnv::transient`] at run time.
    pub fn transient_path(&self, tool: &str) -> PathBuf {
        self.config
            .scratch_dir()
            .join(self.transient_key(tool).file_name())
    }
}

impl std::fmt::Debug for CollectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorContext")
            .field("test_name", &self.config.test_name)
            .field("iteration", &self.iteration)
            .field("benchmark", &self.benchmark.name())
            .field("benchmark_set", &self.benchmark_set)
            .finish()
    }
}

/// Limits applied to one step
#[derive(Debug, Clone, Copy, Default)]
pub struct StepLimits {
    /// Kill the benchmark if it runs longer than this
    pub timeout: Option<Duration>,
}

/// Runtime helpers handed to a test run
#[derive(Debug, Clone, Copy)]
pub struct TestRunEnv {
    /// Step limits
    pub limits: StepLimits,
}

impl TestRunEnv {
    /// Guard a transient file so it is deleted when the step ends
    pub fn transient(&self, path: PathBuf) -> TransientFile {
        TransientFile::at(path)
    }
}

/// One monitored execution
///
/// `run` never fails: a tool or benchmark failure is logged and reported
/// through the returned record's `error` flag, with whatever data was
/// gathered kept and `duration` set to the elapsed time.
#[async_trait]
pub trait TestRun: Send + Sync {
    /// Test-run name, used as the record's collector name
    fn name(&self) -> &str;

    /// Launch the tool and the benchmark, wait, parse, clean up
    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord;
}

/// A monitoring-tool adapter bound to one benchmark and iteration
pub trait Collector: Send {
    /// Collector name
    fn name(&self) -> &str;

    /// The binding this collector was built for
    fn context(&self) -> &CollectorContext;

    /// Plan the test runs
    ///
    /// Must be idempotent and must not launch any process or touch the
    /// filesystem.
    fn setup(&self) -> MantisResult<Vec<Box<dyn TestRun>>>;
}

/// Factory building a collector for one context
pub type CollectorFactory =
    Arc<dyn Fn(CollectorContext) -> MantisResult<Box<dyn Collector>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::RunCommand;

    struct Named(&'static str);

    impl Benchmark for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn run_command(&self) -> RunCommand {
            RunCommand::shell("true")
        }
    }

    #[test]
    fn test_context_record_identity() {
        let config = Arc::new(Configuration::default().with_test_name("t"));
        let context = CollectorContext::new(config, 4, Arc::new(Named("bench")), "bench:other");

        let record = context.record("TTCCollector");
        assert_eq!(record.benchmark_name, "bench");
        assert_eq!(record.benchmark_set, "bench:other");
        assert_eq!(record.collector_name, "TTCCollector");
        assert_eq!(record.iteration, 4);
    }

    #[test]
    fn test_transient_path_is_per_context() {
        let config = Arc::new(
            Configuration::default()
                .with_test_name("t")
                .with_scratch_dir("/scratch"),
        );
        let a = CollectorContext::new(Arc::clone(&config), 0, Arc::new(Named("a")), "a:b");
        let b = CollectorContext::new(Arc::clone(&config), 0, Arc::new(Named("b")), "a:b");

        assert_eq!(
            a.transient_path("smi"),
            PathBuf::from("/scratch/t-iteration_0-benchmark_a-set_a:b-smi")
        );
        assert_ne!(a.transient_path("smi"), b.transient_path("smi"));
    }
}
