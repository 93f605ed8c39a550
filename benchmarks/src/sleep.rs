//! `TestBench`: sleeps for configured times
//!
//! Useful to exercise a collector setup without a real workload.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use mantis_core::{Benchmark, BenchmarkConfig, MantisError, MantisResult, RunCommand};

/// Configuration of a `TestBench`
#[derive(Debug, Clone, Deserialize)]
pub struct SleepArgs {
    /// Seconds to sleep, one instance per entry
    pub waittimes: Vec<f64>,
}

/// A benchmark that sleeps
#[derive(Debug, Clone)]
pub struct SleepBenchmark {
    name: String,
    seconds: f64,
}

impl SleepBenchmark {
    /// Create a bench sleeping for `seconds`
    pub fn new(seconds: f64) -> Self {
        Self {
            name: format!("TestBench_time{seconds}s"),
            seconds,
        }
    }

    /// Factory registered as `TestBench`
    pub fn generate(config: &BenchmarkConfig) -> MantisResult<Vec<Arc<dyn Benchmark>>> {
        let args: SleepArgs = config.parse()?;
        args.waittimes
            .into_iter()
            .map(|seconds| {
                if !(seconds.is_finite() && seconds >= 0.0) {
                    return Err(MantisError::config(format!(
                        "benchmark {}: invalid wait time {seconds}",
                        config.name
                    )));
                }
                Ok(Arc::new(Self::new(seconds)) as Arc<dyn Benchmark>)
            })
            .collect()
    }
}

#[async_trait]
impl Benchmark for SleepBenchmark {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_command(&self) -> RunCommand {
        RunCommand::program("sleep", [self.seconds.to_string()])
    }

    async fn before_all(&self) -> MantisResult<()> {
        tracing::info!(benchmark = %self.name, "Preparing test bench configuration");
        Ok(())
    }

    async fn before_each(&self) -> MantisResult<()> {
        tracing::info!(benchmark = %self.name, seconds = self.seconds, "Running test bench");
        Ok(())
    }

    async fn after_each(&self) -> MantisResult<()> {
        tracing::debug!(benchmark = %self.name, "Test bench run finished");
        Ok(())
    }

    async fn after_all(&self) -> MantisResult<()> {
        tracing::info!(benchmark = %self.name, "Test bench configuration finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_instance_per_waittime() {
        let config: BenchmarkConfig =
            serde_yaml::from_str("{name: tb, type: TestBench, waittimes: [1, 0.5]}").unwrap();
        let benchmarks = SleepBenchmark::generate(&config).unwrap();

        let names: Vec<_> = benchmarks.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["TestBench_time1s", "TestBench_time0.5s"]);
        assert_eq!(benchmarks[1].run_command().argv(), vec!["sleep", "0.5"]);
    }

    #[test]
    fn test_negative_waittime() {
        let config: BenchmarkConfig =
            serde_yaml::from_str("{name: tb, type: TestBench, waittimes: [-1]}").unwrap();
        assert!(SleepBenchmark::generate(&config).err().unwrap().is_config());
    }
}
