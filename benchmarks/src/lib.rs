//! Built-in benchmark kinds
//!
//! This crate provides factories for the benchmark types that can be named
//! in a configuration's `type` key:
//!
//! - `generic_benchmark`: any command line (the default type)
//! - `sweep`: a command template expanded over parameter values
//! - `TestBench`: sleeps, for trying out collectors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod generic;
pub mod hooks;
pub mod sleep;
pub mod sweep;

use std::sync::Arc;

use mantis_core::{BenchmarkFactory, MantisResult, Registry, DEFAULT_BENCHMARK_TYPE};

pub use generic::{GenericArgs, GenericBenchmark};
pub use hooks::HookCommands;
pub use sleep::SleepBenchmark;
pub use sweep::SweepArgs;

/// Enumeration of built-in benchmark types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BenchmarkKind {
    /// A single command line
    Generic,
    /// Cross-product parameter sweep
    Sweep,
    /// Sleep test bench
    Sleep,
}

impl BenchmarkKind {
    /// Returns the registry name for this kind
    pub fn id(&self) -> &'static str {
        match self {
            BenchmarkKind::Generic => DEFAULT_BENCHMARK_TYPE,
            BenchmarkKind::Sweep => "sweep",
            BenchmarkKind::Sleep => "TestBench",
        }
    }

    /// Returns the factory for this kind
    pub fn factory(&self) -> BenchmarkFactory {
        match self {
            BenchmarkKind::Generic => Arc::new(GenericBenchmark::generate),
            BenchmarkKind::Sweep => Arc::new(sweep::generate),
            BenchmarkKind::Sleep => Arc::new(SleepBenchmark::generate),
        }
    }

    /// Returns all built-in kinds
    pub fn all() -> &'static [BenchmarkKind] {
        &[
            BenchmarkKind::Generic,
            BenchmarkKind::Sweep,
            BenchmarkKind::Sleep,
        ]
    }
}

impl std::fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Register every built-in benchmark type
pub fn register_all(registry: &mut Registry<BenchmarkFactory>) -> MantisResult<()> {
    for kind in BenchmarkKind::all() {
        registry.register(kind.id(), kind.factory())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mantis_core::{Benchmark, BenchmarkConfig, MantisError, Registries};

    #[test]
    fn test_register_all() {
        let mut registries = Registries::new();
        register_all(&mut registries.benchmarks).unwrap();
        assert_eq!(
            registries.benchmarks.names(),
            vec!["TestBench", "generic_benchmark", "sweep"]
        );
    }

    #[test]
    fn test_register_twice_collides() {
        let mut registries = Registries::new();
        register_all(&mut registries.benchmarks).unwrap();
        let err = register_all(&mut registries.benchmarks).unwrap_err();
        assert!(matches!(err, MantisError::NameCollision { .. }));
        assert_eq!(registries.benchmarks.len(), 3);
    }

    #[test]
    fn test_default_type_is_generic() {
        let mut registries = Registries::new();
        register_all(&mut registries.benchmarks).unwrap();

        let config: BenchmarkConfig = serde_yaml::from_str("{name: plain, cmd: sleep 0}").unwrap();
        let benchmarks = registries.generate_benchmarks(&config).unwrap().unwrap();
        assert_eq!(benchmarks[0].name(), "plain");
    }
}
