//! Pieces shared by the tool adapters

use std::time::Duration;

use mantis_core::process::{supervise, MonitorProcess, ProcessOutcome};
use mantis_core::{MantisResult, RunCommand, UnifiedRecord};

/// Copy a benchmark outcome into its record
///
/// Sets `duration` to the elapsed time and flags the record when the
/// benchmark did not succeed. Returns whether the output is worth parsing.
pub(crate) fn apply_outcome(record: &mut UnifiedRecord, outcome: &ProcessOutcome, what: &str) -> bool {
    record.duration = outcome.elapsed_secs();
    match outcome.failure(what) {
        None => true,
        Some(failure) => {
            tracing::warn!(
                benchmark = %record.benchmark_name,
                collector = %record.collector_name,
                failure = %failure,
                "Skipping parse of failed run"
            );
            record.mark_failed(failure);
            false
        }
    }
}

/// Run a benchmark while a monitoring tool samples the system beside it
///
/// A tool that fails to start does not stop the benchmark; the record is
/// flagged and the caller skips parsing. Returns whether both the tool and
/// the benchmark succeeded.
pub(crate) async fn run_beside(
    monitor: MantisResult<MonitorProcess>,
    command: &RunCommand,
    timeout: Option<Duration>,
    record: &mut UnifiedRecord,
) -> bool {
    let monitor = match monitor {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            tracing::warn!(collector = %record.collector_name, error = %e, "Monitoring tool did not start");
            record.mark_failed(e.to_string());
            None
        }
    };

    let outcome = supervise(command, timeout).await;

    let mut tool_ok = monitor.is_some();
    if let Some(mut monitor) = monitor {
        if let Some(early) = monitor.exited_early() {
            tracing::warn!(collector = %record.collector_name, reason = %early, "Monitoring tool failed");
            record.mark_failed(early);
            tool_ok = false;
        }
        if let Err(e) = monitor.stop().await {
            tracing::warn!(collector = %record.collector_name, error = %e, "Monitoring tool did not stop cleanly");
        }
    }

    apply_outcome(record, &outcome, "benchmark") && tool_ok
}

/// Parse a tool value, `None` for placeholders like `N/A` or `<not counted>`
pub(crate) fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use mantis_core::{Benchmark, CollectorContext, Configuration, RunCommand};

    pub struct ShellBench {
        pub name: &'static str,
        pub cmd: &'static str,
    }

    impl Benchmark for ShellBench {
        fn name(&self) -> &str {
            self.name
        }

        fn run_command(&self) -> RunCommand {
            RunCommand::shell(self.cmd)
        }
    }

    pub fn context(config: Configuration, cmd: &'static str) -> CollectorContext {
        CollectorContext::new(
            Arc::new(config),
            0,
            Arc::new(ShellBench { name: "bench", cmd }),
            "solo",
        )
    }
}
