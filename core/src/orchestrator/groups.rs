//! Benchmark group expansion

use std::sync::Arc;

use crate::benchmark::{Benchmark, BenchmarkGroup};
use crate::config::Configuration;
use crate::error::{MantisError, MantisResult};
use crate::record::SOLO_SET;
use crate::registry::Registries;

/// Turn the configured benchmarks into the groups that will be run
///
/// With a `benchmark_matrix`, every entry becomes one co-running group named
/// after its members joined by `:`, and each member must name exactly one
/// configured benchmark. Without a matrix every generated instance runs on
/// its own in a `"solo"` group.
///
/// # Errors
///
/// Ambiguous or missing matrix names and factory configuration errors.
pub fn expand_groups(
    config: &Configuration,
    registries: &Registries,
) -> MantisResult<Vec<BenchmarkGroup>> {
    let groups = match &config.benchmark_matrix {
        Some(matrix) => expand_matrix(config, registries, matrix)?,
        None => expand_solo(config, registries)?,
    };

    tracing::info!(
        groups = groups.len(),
        benchmarks = groups.iter().map(|g| g.benchmarks.len()).sum::<usize>(),
        "Expanded benchmark groups"
    );
    Ok(groups)
}

fn expand_solo(
    config: &Configuration,
    registries: &Registries,
) -> MantisResult<Vec<BenchmarkGroup>> {
    let mut groups = Vec::new();
    for fragment in &config.benchmarks {
        tracing::debug!(name = %fragment.name, kind = fragment.kind(), "Adding benchmark");
        let Some(instances) = registries.generate_benchmarks(fragment)? else {
            continue;
        };
        groups.extend(
            instances
                .into_iter()
                .map(|instance| BenchmarkGroup::new(SOLO_SET, vec![instance])),
        );
    }
    Ok(groups)
}

fn expand_matrix(
    config: &Configuration,
    registries: &Registries,
    matrix: &[Vec<String>],
) -> MantisResult<Vec<BenchmarkGroup>> {
    let mut groups = Vec::with_capacity(matrix.len());
    'sets: for set in matrix {
        let name = set.join(":");
        let mut members: Vec<Arc<dyn Benchmark>> = Vec::new();

        for member in set {
            let fragments: Vec<_> = config
                .benchmarks
                .iter()
                .filter(|fragment| &fragment.name == member)
                .collect();
            let [fragment] = fragments.as_slice() else {
                return Err(MantisError::AmbiguousBenchmark {
                    name: member.clone(),
                    matches: fragments.len(),
                });
            };

            match registries.generate_benchmarks(fragment)? {
                Some(instances) => members.extend(instances),
                None => {
                    tracing::warn!(set = %name, member = %member, "Skipping co-running set with an unknown benchmark type");
                    continue 'sets;
                }
            }
        }

        if members.is_empty() {
            tracing::warn!(set = %name, "Co-running set generated no benchmarks, skipping");
            continue;
        }
        groups.push(BenchmarkGroup::new(name, members));
    }
    Ok(groups)
}
