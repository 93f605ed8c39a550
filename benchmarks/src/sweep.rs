//! Parameter sweep benchmark
//!
//! A sweep is a command template plus a list of values per parameter. Every
//! combination of values becomes one generic benchmark instance, with
//! `{parameter}` placeholders substituted in the command, the working
//! directory, the environment values and the hooks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::Value;

use mantis_core::{Benchmark, BenchmarkConfig, MantisError, MantisResult};

use crate::generic::{build_command, GenericBenchmark};
use crate::hooks::HookCommands;

fn default_shell() -> bool {
    true
}

/// Configuration of a `sweep`
#[derive(Debug, Clone, Deserialize)]
pub struct SweepArgs {
    /// Base name; instances are named `{name}-{param}_{value}-...`
    pub name: String,
    /// Command template
    pub cmd: String,
    /// Working directory template
    #[serde(default)]
    pub cwd: Option<String>,
    /// Environment templates
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Run through the shell
    #[serde(default = "default_shell")]
    pub shell: bool,
    /// Values of every parameter
    #[serde(default)]
    pub parameters: BTreeMap<String, Vec<Value>>,
    /// Hook command templates
    #[serde(flatten)]
    pub hooks: HookCommands,
}

/// One point of the sweep: parameter name to rendered value
type Assignment = Vec<(String, String)>;

fn render(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Cartesian product of all parameter values, parameters in sorted order
fn assignments(name: &str, parameters: &BTreeMap<String, Vec<Value>>) -> MantisResult<Vec<Assignment>> {
    let mut product: Vec<Assignment> = vec![Vec::new()];
    for (parameter, values) in parameters {
        if values.is_empty() {
            return Err(MantisError::config(format!(
                "sweep {name}: parameter {parameter} has no values"
            )));
        }
        let rendered = values
            .iter()
            .map(|value| {
                render(value).ok_or_else(|| {
                    MantisError::config(format!(
                        "sweep {name}: parameter {parameter} must be a scalar, got {value:?}"
                    ))
                })
            })
            .collect::<MantisResult<Vec<_>>>()?;

        product = product
            .into_iter()
            .flat_map(|partial| {
                rendered.iter().map(move |value| {
                    let mut next = partial.clone();
                    next.push((parameter.clone(), value.clone()));
                    next
                })
            })
            .collect();
    }
    Ok(product)
}

fn substitute(template: &str, assignment: &Assignment) -> String {
    assignment
        .iter()
        .fold(template.to_string(), |text, (parameter, value)| {
            text.replace(&format!("{{{parameter}}}"), value)
        })
}

fn instance_name(base: &str, assignment: &Assignment) -> String {
    std::iter::once(base.to_string())
        .chain(
            assignment
                .iter()
                .map(|(parameter, value)| format!("{parameter}_{value}")),
        )
        .collect::<Vec<_>>()
        .join("-")
}

/// Expand a sweep into generic benchmark instances
pub fn expand(args: &SweepArgs) -> MantisResult<Vec<GenericBenchmark>> {
    let points = assignments(&args.name, &args.parameters)?;
    let mut seen = BTreeSet::new();
    let mut instances = Vec::with_capacity(points.len());

    for point in &points {
        let name = instance_name(&args.name, point);
        if !seen.insert(name.clone()) {
            return Err(MantisError::config(format!(
                "sweep {}: duplicate instance name {name}",
                args.name
            )));
        }

        let env = args
            .env
            .iter()
            .map(|(key, value)| (key.clone(), substitute(value, point)))
            .collect();
        let cwd = args
            .cwd
            .as_deref()
            .map(|cwd| PathBuf::from(substitute(cwd, point)));
        let command = build_command(&name, &substitute(&args.cmd, point), args.shell, cwd, env)?;
        let hooks = args.hooks.map(|hook| substitute(hook, point));
        instances.push(GenericBenchmark::new(name, command, hooks));
    }

    tracing::debug!(sweep = %args.name, instances = instances.len(), "Expanded sweep");
    Ok(instances)
}

/// Factory registered as `sweep`
pub fn generate(config: &BenchmarkConfig) -> MantisResult<Vec<Arc<dyn Benchmark>>> {
    let args: SweepArgs = config.parse()?;
    Ok(expand(&args)?
        .into_iter()
        .map(|instance| Arc::new(instance) as Arc<dyn Benchmark>)
        .collect())
}
