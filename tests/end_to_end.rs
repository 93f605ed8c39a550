//! End-to-end runs through the built-in benchmarks, collectors and formatters

use std::sync::Arc;

use mantis_core::{
    BenchmarkConfig, Configuration, Formatter, OrchestratorBuilder, Registries, Series,
};
use mantis_formatters::CsvFormatter;

// ============================================================================
// Helpers
// ============================================================================

fn registries() -> Arc<Registries> {
    let mut registries = Registries::new();
    mantis_benchmarks::register_all(&mut registries.benchmarks).unwrap();
    mantis_collectors::register_all(&mut registries.collectors).unwrap();
    mantis_formatters::register_all(&mut registries.formatters).unwrap();
    Arc::new(registries)
}

fn shell_benchmark(name: &str, cmd: &str) -> BenchmarkConfig {
    BenchmarkConfig::new(name, "generic_benchmark").with_argument("cmd", cmd)
}

fn ttc_config(scratch: &std::path::Path) -> Configuration {
    Configuration::default()
        .with_test_name("e2e")
        .with_mode("ttc", serde_yaml::Value::Null)
        .with_scratch_dir(scratch)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_three_iterations_of_sleep() {
    let scratch = tempfile::tempdir().unwrap();
    let config = ttc_config(scratch.path())
        .with_iterations(3)
        .with_benchmark(shell_benchmark("nap", "sleep 0.2"));

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .registries(registries())
        .build()
        .unwrap();
    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.table.len(), 3);
    let iterations: Vec<_> = outcome.table.iter().map(|r| r.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2]);

    for record in outcome.table.iter() {
        assert_eq!(record.benchmark_name, "nap");
        assert_eq!(record.benchmark_set, "solo");
        assert_eq!(record.collector_name, "TTCCollector");
        assert!(!record.is_failed());
        assert!(record.duration >= 0.2 && record.duration < 5.0);
        match record.metric("time_to_completion") {
            Some(Series::Scalar(seconds)) => assert!(*seconds >= 0.2),
            other => panic!("unexpected metric {other:?}"),
        }
    }
    assert_eq!(outcome.summary.total_records, 3);
    assert_eq!(outcome.summary.total_failures, 0);

    // no transient output left behind
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_matrix_pair_shares_benchmark_set() {
    let scratch = tempfile::tempdir().unwrap();
    let config = ttc_config(scratch.path())
        .with_benchmark(shell_benchmark("A", "sleep 0.1"))
        .with_benchmark(shell_benchmark("B", "sleep 0.1"))
        .with_matrix(vec![vec!["A".to_string(), "B".to_string()]]);

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .registries(registries())
        .build()
        .unwrap();
    let outcome = orchestrator.run().await.unwrap();

    let rows: Vec<_> = outcome
        .table
        .iter()
        .map(|r| (r.benchmark_name.as_str(), r.benchmark_set.as_str()))
        .collect();
    assert_eq!(rows, vec![("A", "A:B"), ("B", "A:B")]);
    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].rounds, 1);
}

#[tokio::test]
async fn test_failing_benchmark_is_flagged_not_fatal() {
    let scratch = tempfile::tempdir().unwrap();
    let config = ttc_config(scratch.path())
        .with_iterations(2)
        .with_benchmark(shell_benchmark("broken", "exit 3"))
        .with_benchmark(shell_benchmark("fine", "true"));

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .registries(registries())
        .build()
        .unwrap();
    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.table.len(), 4);
    let broken: Vec<_> = outcome.table.for_benchmark("broken").collect();
    assert_eq!(broken.len(), 2);
    assert!(broken.iter().all(|r| r.is_failed() && r.metrics().is_empty()));
    assert!(outcome.table.for_benchmark("fine").all(|r| !r.is_failed()));
    assert_eq!(outcome.summary.total_failures, 2);
}

#[tokio::test]
async fn test_sweep_expands_to_solo_groups() {
    let scratch = tempfile::tempdir().unwrap();
    let sweep = BenchmarkConfig::new("s", "sweep")
        .with_argument("cmd", "sleep {t}")
        .with_argument(
            "parameters",
            serde_yaml::from_str::<serde_yaml::Value>("{t: [0, 0.1]}").unwrap(),
        );
    let config = ttc_config(scratch.path()).with_benchmark(sweep);

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .registries(registries())
        .build()
        .unwrap();
    let outcome = orchestrator.run().await.unwrap();

    let names: Vec<_> = outcome.table.iter().map(|r| r.benchmark_name.clone()).collect();
    assert_eq!(names, vec!["s-t_0", "s-t_0.1"]);
    assert_eq!(outcome.groups.len(), 2);
}

#[tokio::test]
async fn test_results_survive_csv() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let config = ttc_config(scratch.path())
        .with_iterations(2)
        .with_benchmark(shell_benchmark("nap", "sleep 0.05"));

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .registries(registries())
        .build()
        .unwrap();
    let outcome = orchestrator.run().await.unwrap();

    let path = CsvFormatter.save(&out.path().join("e2e"), &outcome.table).unwrap();
    let loaded = CsvFormatter.open(&path).unwrap();
    assert_eq!(loaded, outcome.table);
}
