//! Name-to-factory registries
//!
//! Benchmarks, collectors and formatters are each looked up by the name used
//! in the configuration file. The three namespaces are independent and are
//! held together by [`Registries`], which the binary builds once at start-up
//! and hands to the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::benchmark::{Benchmark, BenchmarkFactory};
use crate::collector::{Collector, CollectorContext, CollectorFactory};
use crate::config::BenchmarkConfig;
use crate::error::{MantisError, MantisResult};
use crate::formatter::{Formatter, FormatterFactory};

/// Append-only mapping from names to factories
pub struct Registry<F> {
    kind: &'static str,
    entries: BTreeMap<String, F>,
}

impl<F> Registry<F> {
    /// Create an empty registry for one namespace
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register a factory
    ///
    /// # Errors
    ///
    /// Returns [`MantisError::NameCollision`] if the name is taken. The
    /// existing entry is kept.
    pub fn register(&mut self, name: impl Into<String>, factory: F) -> MantisResult<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(MantisError::NameCollision {
                kind: self.kind,
                name,
            });
        }
        tracing::trace!(kind = self.kind, name = %name, "Registered factory");
        self.entries.insert(name, factory);
        Ok(())
    }

    /// Look up a factory, warning when the name is unknown
    pub fn resolve(&self, name: &str) -> Option<&F> {
        let entry = self.entries.get(name);
        if entry.is_none() {
            tracing::warn!(
                kind = self.kind,
                name,
                known = ?self.names(),
                "Unknown name, skipping"
            );
        }
        entry
    }

    /// Look up a factory without logging
    pub fn get(&self, name: &str) -> Option<&F> {
        self.entries.get(name)
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Namespace of this registry
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl<F> std::fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

/// The three plugin namespaces
#[derive(Debug)]
pub struct Registries {
    /// Benchmark types
    pub benchmarks: Registry<BenchmarkFactory>,
    /// Collection modes
    pub collectors: Registry<CollectorFactory>,
    /// Output formats
    pub formatters: Registry<FormatterFactory>,
}

impl Registries {
    /// Create empty registries
    pub fn new() -> Self {
        Self {
            benchmarks: Registry::new("benchmark"),
            collectors: Registry::new("collector"),
            formatters: Registry::new("formatter"),
        }
    }

    /// Generate the instances described by one benchmark fragment
    ///
    /// Returns `Ok(None)` when the type is unknown.
    pub fn generate_benchmarks(
        &self,
        config: &BenchmarkConfig,
    ) -> MantisResult<Option<Vec<Arc<dyn Benchmark>>>> {
        match self.benchmarks.resolve(config.kind()) {
            Some(factory) => factory(config).map(Some),
            None => Ok(None),
        }
    }

    /// Build the collector for a mode, `Ok(None)` when the mode is unknown
    pub fn build_collector(
        &self,
        mode: &str,
        context: CollectorContext,
    ) -> MantisResult<Option<Box<dyn Collector>>> {
        match self.collectors.resolve(mode) {
            Some(factory) => factory(context).map(Some),
            None => Ok(None),
        }
    }

    /// Build a formatter, `None` when the name is unknown
    pub fn formatter(&self, name: &str) -> Option<Box<dyn Formatter>> {
        self.formatters.resolve(name).map(|factory| factory())
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry: Registry<u32> = Registry::new("collector");
        registry.register("ttc", 1).unwrap();
        registry.register("perf", 2).unwrap();

        assert_eq!(registry.resolve("ttc"), Some(&1));
        assert_eq!(registry.resolve("nvidia"), None);
        assert_eq!(registry.names(), vec!["perf", "ttc"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_collision_keeps_first() {
        let mut registry: Registry<u32> = Registry::new("benchmark");
        registry.register("TestBench", 1).unwrap();

        let err = registry.register("TestBench", 2).unwrap_err();
        assert!(matches!(
            err,
            MantisError::NameCollision {
                kind: "benchmark",
                ref name
            } if name == "TestBench"
        ));
        assert!(err.is_config());
        assert_eq!(registry.get("TestBench"), Some(&1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let mut registries = Registries::new();
        let factory: FormatterFactory = Arc::new(|| -> Box<dyn Formatter> { unreachable!() });
        registries.formatters.register("CSV", factory).unwrap();

        assert!(registries.formatters.contains("CSV"));
        assert!(!registries.collectors.contains("CSV"));
        assert!(registries.benchmarks.is_empty());
    }

    #[test]
    fn test_unknown_benchmark_type() {
        let registries = Registries::new();
        let config = BenchmarkConfig::new("A", "no_such_type");
        assert!(registries.generate_benchmarks(&config).unwrap().is_none());
    }
}
