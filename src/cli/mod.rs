//! CLI argument parsing and command dispatch

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mantis_core::process::tool_available;
use mantis_core::{
    BenchmarkConfig, Configuration, Formatter, OrchestratorBuilder, Registries, RunOutcome,
    UnifiedTable,
};

/// Monitoring suite for program performance profiling
#[derive(Parser, Debug)]
#[command(name = "mantis-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every benchmark under every configured collection mode
    Run {
        /// Path to configuration file
        config: PathBuf,

        /// Kill a benchmark step after this many seconds
        #[arg(long)]
        step_timeout: Option<f64>,

        /// Directory for the output tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Validate a configuration file without running anything
    Validate {
        /// Path to configuration file
        config: PathBuf,
    },
    /// Write a default configuration
    Init {
        /// Where to write it
        #[arg(default_value = "config.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// List the registered benchmark types, collectors and formatters
    List,
}

/// Set up the global subscriber
///
/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
pub fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Registries holding every built-in benchmark type, collector and formatter
pub fn build_registries() -> Result<Registries> {
    let mut registries = Registries::new();
    mantis_benchmarks::register_all(&mut registries.benchmarks)?;
    mantis_collectors::register_all(&mut registries.collectors)?;
    mantis_formatters::register_all(&mut registries.formatters)?;
    Ok(registries)
}

impl Cli {
    /// Dispatch the selected command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run {
                config,
                step_timeout,
                output_dir,
            } => run(&config, step_timeout, output_dir).await,
            Commands::Validate { config } => validate(&config),
            Commands::Init { path, force } => init(&path, force).await,
            Commands::List => list(),
        }
    }
}

async fn run(path: &Path, step_timeout: Option<f64>, output_dir: Option<PathBuf>) -> Result<()> {
    let mut config = Configuration::load(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    if let Some(dir) = output_dir {
        config.output_dir = Some(dir);
    }

    let registries = Arc::new(build_registries()?);
    let mut builder = OrchestratorBuilder::new()
        .config(config)
        .registries(Arc::clone(&registries));
    if let Some(seconds) = step_timeout {
        if !(seconds.is_finite() && seconds > 0.0) {
            bail!("--step-timeout must be a positive number of seconds, got {seconds}");
        }
        builder = builder.step_timeout(Duration::from_secs_f64(seconds));
    }
    let orchestrator = builder.build()?;

    let outcome = orchestrator.run_with_signal_handling().await?;
    print_summary(&outcome);

    // partial tables are written too
    let config = orchestrator.config();
    let base = config.output_base();
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    save_all(&registries, &config.formatter_modes, &base, &outcome.table)?;
    Ok(())
}

/// Hand the table to every known formatter
///
/// A failing formatter does not stop the others; the failures are reported
/// together once every formatter had its turn.
fn save_all(
    registries: &Registries,
    modes: &[String],
    base: &Path,
    table: &UnifiedTable,
) -> Result<Vec<PathBuf>> {
    let mut saved = Vec::with_capacity(modes.len());
    let mut failed = Vec::new();
    for mode in modes {
        let Some(formatter) = registries.formatter(mode) else {
            continue;
        };
        match formatter.save(base, table) {
            Ok(path) => {
                tracing::info!(formatter = formatter.name(), path = %path.display(), rows = table.len(), "Saved results");
                println!("Saved {}", path.display());
                saved.push(path);
            }
            Err(e) => {
                tracing::error!(formatter = formatter.name(), error = %e, "Formatter failed");
                failed.push(format!("{}: {e}", formatter.name()));
            }
        }
    }
    if !failed.is_empty() {
        bail!("{} formatter(s) failed: {}", failed.len(), failed.join("; "));
    }
    Ok(saved)
}

fn print_summary(outcome: &RunOutcome) {
    let summary = &outcome.summary;
    println!(
        "\n{} groups ({} skipped), {} rounds, {} records, {} flagged, {:.1}s{}",
        summary.total_groups,
        summary.skipped_groups,
        summary.total_rounds,
        summary.total_records,
        summary.total_failures,
        summary.total_duration.as_secs_f64(),
        if summary.interrupted { ", interrupted" } else { "" }
    );
    for group in &outcome.groups {
        match &group.skipped {
            Some(reason) => println!("  {:<30} skipped: {reason}", group.name),
            None => println!(
                "  {:<30} {} records, {} flagged, {:.1}s",
                group.name,
                group.records,
                group.failures,
                group.elapsed.as_secs_f64()
            ),
        }
    }
}

fn validate(path: &Path) -> Result<()> {
    let config = Configuration::load(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    let registries = Arc::new(build_registries()?);
    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .registries(Arc::clone(&registries))
        .build()?;
    let groups = orchestrator.check()?;

    println!("Configuration {} is valid", path.display());
    for group in &groups {
        println!("  group {:<30} {}", group.name, group.benchmark_names().join(", "));
    }
    let config = orchestrator.config();
    for mode in config.collection_modes.keys() {
        let known = registries.collectors.contains(mode);
        println!("  mode {mode:<31} {}", if known { "ok" } else { "unknown, skipped" });
    }
    for mode in &config.formatter_modes {
        let known = registries.formatters.contains(mode);
        println!("  formatter {mode:<26} {}", if known { "ok" } else { "unknown, skipped" });
    }
    Ok(())
}

/// Default configuration: the sleep test bench under `perf`
pub fn default_configuration(perf_counters: Vec<String>) -> Configuration {
    let mut perf = serde_yaml::Mapping::new();
    perf.insert("pmu_count".into(), 4u64.into());

    let mut config = Configuration::default()
        .with_benchmark(
            BenchmarkConfig::new("TestBench", "TestBench")
                .with_argument("waittimes", vec![1u64, 4, 8]),
        )
        .with_mode("perf", serde_yaml::Value::Mapping(perf));
    config.perf_counters = perf_counters;
    config
}

async fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    let counters = match mantis_collectors::perf::available_counters().await {
        Ok(available) => mantis_collectors::perf::select_counters(available.iter().map(String::as_str)),
        Err(e) => {
            tracing::warn!(error = %e, "Could not list perf counters, using built-in defaults");
            Vec::new()
        }
    };
    default_configuration(counters).dump(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn list() -> Result<()> {
    let registries = build_registries()?;

    println!("Benchmark types:");
    for name in registries.benchmarks.names() {
        println!("  {name}");
    }

    println!("Collectors:");
    for name in registries.collectors.names() {
        let tool = mantis_collectors::CollectorKind::from_name(name).and_then(|kind| kind.tool());
        match tool {
            Some(tool) if !tool_available(tool) => println!("  {name:<20} ({tool} not found)"),
            _ => println!("  {name}"),
        }
    }

    println!("Formatters:");
    for name in registries.formatters.names() {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mantis_core::{MantisError, MantisResult, Series, UnifiedRecord};

    #[test]
    fn test_build_registries() {
        let registries = build_registries().unwrap();
        assert!(registries.benchmarks.contains("generic_benchmark"));
        assert!(registries.collectors.contains("ttc"));
        assert!(registries.formatters.contains("CSV"));
    }

    #[test]
    fn test_default_configuration_round_trips() {
        let config = default_configuration(vec!["instructions".to_string()]);
        let yaml = config.to_yaml().unwrap();
        let back = Configuration::from_yaml(&yaml).unwrap();

        assert_eq!(back.test_name, "GENERATEDDEFAULT");
        assert_eq!(back.perf_counters, vec!["instructions"]);
        assert_eq!(back.benchmarks[0].kind(), "TestBench");

        let registries = build_registries().unwrap();
        let benchmarks = registries
            .generate_benchmarks(&back.benchmarks[0])
            .unwrap()
            .unwrap();
        assert_eq!(benchmarks.len(), 3);
    }

    struct BrokenFormatter;

    impl Formatter for BrokenFormatter {
        fn name(&self) -> &str {
            "BROKEN"
        }

        fn extension(&self) -> &str {
            "broken"
        }

        fn save(&self, _base: &Path, _table: &UnifiedTable) -> MantisResult<PathBuf> {
            Err(MantisError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only output",
            )))
        }

        fn open(&self, path: &Path) -> MantisResult<UnifiedTable> {
            Err(MantisError::ConfigNotFound(path.to_path_buf()))
        }
    }

    #[test]
    fn test_failing_formatter_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut registries = build_registries().unwrap();
        registries
            .formatters
            .register(
                "BROKEN",
                std::sync::Arc::new(|| Box::new(BrokenFormatter) as Box<dyn Formatter>),
            )
            .unwrap();

        let mut record = UnifiedRecord::new("nap", "solo", "TTCCollector", 0);
        record.insert_metric("time_to_completion", Series::Scalar(0.2));
        let table = UnifiedTable::from_records(vec![record]);
        let modes = vec!["BROKEN".to_string(), "CSV".to_string(), "JSON".to_string()];
        let base = dir.path().join("run");

        let err = save_all(&registries, &modes, &base, &table).unwrap_err();
        assert!(err.to_string().contains("BROKEN"));
        assert!(dir.path().join("run.csv").exists());
        assert!(dir.path().join("run.json").exists());
    }

    #[test]
    fn test_save_all_skips_unknown_formatters() {
        let dir = tempfile::tempdir().unwrap();
        let registries = build_registries().unwrap();
        let modes = vec!["PICKLE".to_string(), "CSV".to_string()];

        let base = dir.path().join("run");
        let saved = save_all(&registries, &modes, &base, &UnifiedTable::new()).unwrap();
        assert_eq!(saved, vec![dir.path().join("run.csv")]);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["mantis-monitor", "run", "config.yaml", "--step-timeout", "30"]);
        match cli.command {
            Commands::Run {
                config,
                step_timeout,
                output_dir,
            } => {
                assert_eq!(config, PathBuf::from("config.yaml"));
                assert_eq!(step_timeout, Some(30.0));
                assert!(output_dir.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
