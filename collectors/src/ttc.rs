//! Wall-clock time-to-completion

use async_trait::async_trait;

use mantis_core::process::supervise;
use mantis_core::{Collector, CollectorContext, MantisResult, Series, TestRun, TestRunEnv, UnifiedRecord};

use crate::common::apply_outcome;

/// Metric key of the measured wall-clock time
pub const TIME_TO_COMPLETION: &str = "time_to_completion";

/// Measures unimpeded time-to-completion of a benchmark
#[derive(Debug)]
pub struct TtcCollector {
    context: CollectorContext,
}

impl TtcCollector {
    /// Collector and record name
    pub const NAME: &'static str = "TTCCollector";

    /// Bind to a context
    pub fn new(context: CollectorContext) -> Self {
        Self { context }
    }

    /// Factory registered for the `ttc` mode
    pub fn build(context: CollectorContext) -> MantisResult<Box<dyn Collector>> {
        Ok(Box::new(Self::new(context)))
    }
}

impl Collector for TtcCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn context(&self) -> &CollectorContext {
        &self.context
    }

    fn setup(&self) -> MantisResult<Vec<Box<dyn TestRun>>> {
        Ok(vec![Box::new(TtcRun {
            context: self.context.clone(),
        })])
    }
}

struct TtcRun {
    context: CollectorContext,
}

#[async_trait]
impl TestRun for TtcRun {
    fn name(&self) -> &str {
        TtcCollector::NAME
    }

    async fn run(&self, env: &TestRunEnv) -> UnifiedRecord {
        let mut record = self.context.record(self.name()).with_units("s");
        let command = self.context.benchmark.run_command();
        tracing::debug!(benchmark = %self.context.benchmark_name(), command = %command, "Timing benchmark");

        let outcome = supervise(&command, env.limits.timeout).await;
        if apply_outcome(&mut record, &outcome, "benchmark") {
            record.insert_metric(TIME_TO_COMPLETION, Series::Scalar(outcome.elapsed_secs()));
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::common::testing::context;
    use mantis_core::{Configuration, StepLimits};

    fn env(timeout: Option<Duration>) -> TestRunEnv {
        TestRunEnv {
            limits: StepLimits { timeout },
        }
    }

    #[test]
    fn test_setup_is_one_run() {
        let collector = TtcCollector::new(context(Configuration::default(), "true"));
        let runs = collector.setup().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].name(), "TTCCollector");
        // idempotent
        assert_eq!(collector.setup().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_measures_elapsed_time() {
        let collector = TtcCollector::new(context(Configuration::default(), "sleep 0.2"));
        let run = collector.setup().unwrap().remove(0);
        let record = run.run(&env(None)).await;

        assert!(!record.is_failed());
        assert_eq!(record.measurements(), &[TIME_TO_COMPLETION]);
        match record.metric(TIME_TO_COMPLETION) {
            Some(Series::Scalar(seconds)) => {
                assert!(*seconds >= 0.2);
                assert!(*seconds < 5.0);
            }
            other => panic!("unexpected metric {other:?}"),
        }
        assert!(record.validate().is_ok());
    }

    #[tokio::test]
    async fn test_failure_keeps_duration_without_metrics() {
        let collector = TtcCollector::new(context(Configuration::default(), "sleep 0.1; exit 4"));
        let record = collector.setup().unwrap()[0].run(&env(None)).await;

        assert!(record.metrics().is_empty());
        assert!(record.duration >= 0.1);
        assert_eq!(record.error.as_deref(), Some("benchmark exited with status 4"));
    }

    #[tokio::test]
    async fn test_timeout_is_flagged() {
        let collector = TtcCollector::new(context(Configuration::default(), "sleep 10"));
        let record = collector.setup().unwrap()[0]
            .run(&env(Some(Duration::from_millis(200))))
            .await;

        assert!(record.error.as_deref().unwrap().contains("timed out"));
        assert!(record.duration < 5.0);
    }

    /// Pids whose command line is exactly `argv`; zombies have none
    fn running(argv: &[&str]) -> Vec<u32> {
        let wanted: String = argv.iter().map(|arg| format!("{arg}\0")).collect();
        std::fs::read_dir("/proc")
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
                    .filter(|pid| {
                        std::fs::read(format!("/proc/{pid}/cmdline"))
                            .map_or(false, |cmdline| cmdline == wanted.as_bytes())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_workload_behind() {
        let collector = TtcCollector::new(context(
            Configuration::default(),
            "sleep 0.01; sleep 31.517; true",
        ));
        let record = collector.setup().unwrap()[0]
            .run(&env(Some(Duration::from_millis(300))))
            .await;
        assert!(record.error.as_deref().unwrap().contains("timed out"));

        let mut survivors = running(&["sleep", "31.517"]);
        for _ in 0..50 {
            if survivors.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            survivors = running(&["sleep", "31.517"]);
        }
        assert!(survivors.is_empty(), "workload outlived the step: {survivors:?}");
    }
}
