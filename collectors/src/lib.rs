//! Built-in collectors
//!
//! Each collector adapts one monitoring tool to the test-run protocol. The
//! registry name is the key used under `collection_modes` in the
//! configuration:
//!
//! | mode          | tool                          |
//! |---------------|-------------------------------|
//! | `ttc`         | wall clock                    |
//! | `perf`        | `perf stat -I`                |
//! | `nvidia`      | `nvidia-smi`, `nsys`          |
//! | `amdsmi`      | `amd-smi monitor`             |
//! | `utilization` | `/proc/stat`                  |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod common;

pub mod amdsmi;
pub mod nvidia;
pub mod perf;
pub mod ttc;
pub mod utilization;

use std::sync::Arc;

use mantis_core::{CollectorFactory, MantisResult, Registry};

pub use amdsmi::AmdSmiCollector;
pub use nvidia::{NvidiaCollector, NvidiaMode};
pub use perf::{PerfCollector, PerfOptions};
pub use ttc::TtcCollector;
pub use utilization::UtilizationCollector;

/// Enumeration of built-in collectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    /// Time to completion
    Ttc,
    /// Linux perf counters
    Perf,
    /// NVIDIA GPUs
    Nvidia,
    /// AMD GPUs
    AmdSmi,
    /// Host CPU utilization
    Utilization,
}

impl CollectorKind {
    /// Returns the mode name for this kind
    pub fn id(&self) -> &'static str {
        match self {
            CollectorKind::Ttc => "ttc",
            CollectorKind::Perf => "perf",
            CollectorKind::Nvidia => "nvidia",
            CollectorKind::AmdSmi => "amdsmi",
            CollectorKind::Utilization => "utilization",
        }
    }

    /// Additional mode names accepted for this kind
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            CollectorKind::Ttc => &["time_to_completion"],
            _ => &[],
        }
    }

    /// Returns the factory for this kind
    pub fn factory(&self) -> CollectorFactory {
        match self {
            CollectorKind::Ttc => Arc::new(TtcCollector::build),
            CollectorKind::Perf => Arc::new(PerfCollector::build),
            CollectorKind::Nvidia => Arc::new(NvidiaCollector::build),
            CollectorKind::AmdSmi => Arc::new(AmdSmiCollector::build),
            CollectorKind::Utilization => Arc::new(UtilizationCollector::build),
        }
    }

    /// External program the collector drives, if any
    pub fn tool(&self) -> Option<&'static str> {
        match self {
            CollectorKind::Ttc | CollectorKind::Utilization => None,
            CollectorKind::Perf => Some("perf"),
            CollectorKind::Nvidia => Some("nvidia-smi"),
            CollectorKind::AmdSmi => Some("amd-smi"),
        }
    }

    /// Returns all built-in kinds
    pub fn all() -> &'static [CollectorKind] {
        &[
            CollectorKind::Ttc,
            CollectorKind::Perf,
            CollectorKind::Nvidia,
            CollectorKind::AmdSmi,
            CollectorKind::Utilization,
        ]
    }

    /// Look a kind up by mode name or alias
    pub fn from_name(name: &str) -> Option<CollectorKind> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.id() == name || kind.aliases().contains(&name))
    }
}

impl std::fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Register every built-in collector under its mode name and aliases
pub fn register_all(registry: &mut Registry<CollectorFactory>) -> MantisResult<()> {
    for kind in CollectorKind::all() {
        let factory = kind.factory();
        for name in std::iter::once(kind.id()).chain(kind.aliases().iter().copied()) {
            registry.register(name, Arc::clone(&factory))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::testing::context;
    use mantis_core::{Collector, Configuration, MantisError, Registries};

    #[test]
    fn test_register_all() {
        let mut registries = Registries::new();
        register_all(&mut registries.collectors).unwrap();
        assert_eq!(
            registries.collectors.names(),
            vec!["amdsmi", "nvidia", "perf", "time_to_completion", "ttc", "utilization"]
        );
    }

    #[test]
    fn test_register_twice_collides() {
        let mut registries = Registries::new();
        register_all(&mut registries.collectors).unwrap();
        assert!(matches!(
            register_all(&mut registries.collectors),
            Err(MantisError::NameCollision { .. })
        ));
    }

    #[test]
    fn test_alias_builds_same_collector() {
        let mut registries = Registries::new();
        register_all(&mut registries.collectors).unwrap();

        let ctx = context(Configuration::default(), "true");
        let collector = registries
            .build_collector("time_to_completion", ctx)
            .unwrap()
            .unwrap();
        assert_eq!(collector.name(), TtcCollector::NAME);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(CollectorKind::from_name("ttc"), Some(CollectorKind::Ttc));
        assert_eq!(
            CollectorKind::from_name("time_to_completion"),
            Some(CollectorKind::Ttc)
        );
        assert_eq!(CollectorKind::from_name("mqtt"), None);
        assert_eq!(CollectorKind::Nvidia.to_string(), "nvidia");
    }
}
