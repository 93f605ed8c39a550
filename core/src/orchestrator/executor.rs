//! Orchestrator execution logic

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::benchmark::{Benchmark, BenchmarkGroup};
use crate::channel::ChannelConfig;
use crate::collector::{CollectorContext, StepLimits};
use crate::config::Configuration;
use crate::error::MantisResult;
use crate::lockstep::{LockstepDriver, ProducerPlan};
use crate::registry::Registries;
use crate::table::UnifiedTable;

use super::aggregator::{aggregate_group_reports, GroupReport, RunSummary};
use super::groups::expand_groups;

/// Everything a finished (or interrupted) run produced
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// The unified table
    pub table: UnifiedTable,
    /// Aggregated statistics
    pub summary: RunSummary,
    /// Per-group reports
    pub groups: Vec<GroupReport>,
}

/// Orchestrator manages the run lifecycle
///
/// Responsible for expanding benchmark groups, running lifecycle hooks,
/// driving collectors through the lockstep barrier, and collecting the
/// unified table.
pub struct Orchestrator {
    /// Run configuration (shared with every collector)
    pub(crate) config: Arc<Configuration>,

    /// Plugin registries
    pub(crate) registries: Arc<Registries>,

    /// Lockstep channel configuration
    pub(crate) channel_config: ChannelConfig,

    /// Shutdown signal sender
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` for a more ergonomic construction.
    pub fn new(
        config: Arc<Configuration>,
        registries: Arc<Registries>,
        channel_config: ChannelConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registries,
            channel_config,
            shutdown_tx,
        }
    }

    /// Trigger a graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get the run configuration
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Collection modes that have a registered collector
    fn active_modes(&self) -> Vec<&str> {
        self.config
            .collection_modes
            .keys()
            .map(String::as_str)
            .filter(|mode| self.registries.collectors.resolve(mode).is_some())
            .collect()
    }

    /// Run the whole configuration
    ///
    /// Configuration problems are reported before any process is launched.
    /// After that, failures are isolated to the step, producer or group they
    /// occur in and surface as flagged records.
    pub async fn run(&self) -> MantisResult<RunOutcome> {
        let start = Instant::now();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let modes = self.active_modes();
        let groups = self.plan(&modes)?;

        tracing::info!(
            test_name = %self.config.test_name,
            groups = groups.len(),
            iterations = self.config.iterations,
            modes = ?modes,
            step_timeout = ?self.config.step_timeout(),
            "Starting run"
        );

        let driver = LockstepDriver::new(
            self.channel_config.clone(),
            StepLimits {
                timeout: self.config.step_timeout(),
            },
        );
        let mut table = UnifiedTable::new();
        let mut reports = Vec::with_capacity(groups.len());

        for group in &groups {
            if shutdown_requested(&mut shutdown_rx) {
                tracing::info!(group = %group.name, "Shutdown requested, skipping remaining groups");
                break;
            }
            let report = self
                .run_group(group, &modes, &driver, &mut table, &mut shutdown_rx)
                .await;
            let interrupted = report.interrupted;
            reports.push(report);
            if interrupted {
                break;
            }
        }

        let elapsed = start.elapsed();
        let summary = aggregate_group_reports(&reports, elapsed);
        tracing::info!(
            elapsed_secs = elapsed.as_secs_f64(),
            records = summary.total_records,
            failures = summary.total_failures,
            skipped_groups = summary.skipped_groups,
            interrupted = summary.interrupted,
            "Run completed"
        );

        Ok(RunOutcome {
            table,
            summary,
            groups: reports,
        })
    }

    /// Expand the benchmark groups and preflight every known mode
    ///
    /// Launches nothing. `run` starts with the same checks.
    pub fn check(&self) -> MantisResult<Vec<BenchmarkGroup>> {
        self.plan(&self.active_modes())
    }

    fn plan(&self, modes: &[&str]) -> MantisResult<Vec<BenchmarkGroup>> {
        let groups = expand_groups(&self.config, &self.registries)?;
        self.preflight(&groups, modes)?;
        Ok(groups)
    }

    /// Check every mode against the first benchmark of each group
    ///
    /// Collector construction and `setup` launch nothing, so this surfaces
    /// bad collector options before any hook or benchmark runs.
    fn preflight(&self, groups: &[BenchmarkGroup], modes: &[&str]) -> MantisResult<()> {
        std::fs::create_dir_all(self.config.scratch_dir())?;

        for group in groups {
            let Some(benchmark) = group.benchmarks.first() else {
                continue;
            };
            for mode in modes {
                let context = CollectorContext::new(
                    Arc::clone(&self.config),
                    0,
                    Arc::clone(benchmark),
                    group.name.clone(),
                );
                let planned = self
                    .registries
                    .build_collector(mode, context)
                    .and_then(|collector| match collector {
                        Some(collector) => collector.setup().map(|runs| runs.len()),
                        None => Ok(0),
                    });
                match planned {
                    Ok(runs) => {
                        tracing::debug!(group = %group.name, mode, runs, "Preflight passed");
                    }
                    Err(e) if e.is_config() => return Err(e),
                    Err(e) => {
                        tracing::warn!(group = %group.name, mode, error = %e, "Preflight failed, continuing");
                    }
                }
            }
        }
        Ok(())
    }

    /// Hooks, iterations and modes of one group
    async fn run_group(
        &self,
        group: &BenchmarkGroup,
        modes: &[&str],
        driver: &LockstepDriver,
        table: &mut UnifiedTable,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> GroupReport {
        let start = Instant::now();
        let mut report = GroupReport::new(
            group.name.clone(),
            group
                .benchmark_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );

        let (prepared, failure) = before_all(group).await;
        match failure {
            Some(message) => {
                tracing::error!(group = %group.name, error = %message, "Skipping group");
                report.skipped = Some(message);
            }
            None => {
                'iterations: for iteration in 0..self.config.iterations {
                    for mode in modes {
                        if shutdown_requested(shutdown_rx) {
                            report.interrupted = true;
                            break 'iterations;
                        }

                        let plans = self.plan_mode(group, iteration, mode);
                        if plans.is_empty() {
                            continue;
                        }
                        tracing::info!(
                            group = %group.name,
                            iteration,
                            mode,
                            collectors = plans.len(),
                            "Collecting"
                        );

                        let set = driver.drive(plans, table, shutdown_rx).await;
                        report.absorb(&set);
                        if set.interrupted {
                            break 'iterations;
                        }
                    }
                }
            }
        }

        after_all(&group.name, &prepared).await;
        report.elapsed = start.elapsed();
        report
    }

    /// One collector per benchmark of the group for a mode and iteration
    fn plan_mode(&self, group: &BenchmarkGroup, iteration: usize, mode: &str) -> Vec<ProducerPlan> {
        let mut plans = Vec::with_capacity(group.benchmarks.len());
        for benchmark in &group.benchmarks {
            let context = CollectorContext::new(
                Arc::clone(&self.config),
                iteration,
                Arc::clone(benchmark),
                group.name.clone(),
            );
            let plan = self
                .registries
                .build_collector(mode, context)
                .and_then(|collector| match collector {
                    Some(collector) => ProducerPlan::from_collector(collector.as_ref()).map(Some),
                    None => Ok(None),
                });
            match plan {
                Ok(Some(plan)) => plans.push(plan),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    benchmark = benchmark.name(),
                    mode,
                    iteration,
                    error = %e,
                    "Could not set up collector, skipping"
                ),
            }
        }
        plans
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C abandons the running round, skips the remaining iterations and
    /// still returns the partial table.
    pub async fn run_with_signal_handling(&self) -> MantisResult<RunOutcome> {
        let shutdown_tx = self.shutdown_tx.clone();

        // Spawn signal handler task
        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                    let _ = shutdown_tx.send(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run().await;

        // Abort signal handler if still running
        signal_handle.abort();

        result
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("registries", &self.registries)
            .finish()
    }
}

/// Run `before_all` for each instance, stopping at the first failure
///
/// Returns the instances that are ready (and so need `after_all`), plus the
/// failure message if the group has to be skipped.
async fn before_all(group: &BenchmarkGroup) -> (Vec<Arc<dyn Benchmark>>, Option<String>) {
    let mut prepared = Vec::with_capacity(group.benchmarks.len());
    for benchmark in &group.benchmarks {
        if let Err(e) = benchmark.before_all().await {
            return (prepared, Some(e.to_string()));
        }
        prepared.push(Arc::clone(benchmark));
    }
    (prepared, None)
}

async fn after_all(group: &str, prepared: &[Arc<dyn Benchmark>]) {
    for benchmark in prepared {
        if let Err(e) = benchmark.after_all().await {
            tracing::warn!(group, benchmark = benchmark.name(), error = %e, "after_all failed");
        }
    }
}

/// Non-blocking check for a pending shutdown signal
fn shutdown_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    matches!(
        shutdown_rx.try_recv(),
        Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_))
    )
}
