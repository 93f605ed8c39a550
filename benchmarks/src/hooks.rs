//! Shell lifecycle hooks

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use mantis_core::process::run_helper;
use mantis_core::{MantisError, MantisResult, RunCommand};

/// Optional shell commands run around a benchmark
///
/// Hooks run in the benchmark's working directory with its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookCommands {
    /// Once per group, before the first iteration
    #[serde(default)]
    pub before_all: Option<String>,
    /// Once per group, after the last iteration
    #[serde(default)]
    pub after_all: Option<String>,
    /// Before every monitored execution
    #[serde(default)]
    pub before_each: Option<String>,
    /// After every monitored execution
    #[serde(default)]
    pub after_each: Option<String>,
}

impl HookCommands {
    /// Apply a rewrite to every hook command
    pub fn map(&self, f: impl Fn(&str) -> String) -> Self {
        Self {
            before_all: self.before_all.as_deref().map(&f),
            after_all: self.after_all.as_deref().map(&f),
            before_each: self.before_each.as_deref().map(&f),
            after_each: self.after_each.as_deref().map(&f),
        }
    }
}

/// Run one hook command, if configured
pub async fn run_hook(
    hook: &'static str,
    benchmark: &str,
    command: Option<&str>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
) -> MantisResult<()> {
    let Some(command) = command else {
        return Ok(());
    };
    tracing::debug!(hook, benchmark, command, "Running hook");

    let command = RunCommand::shell(command).with_cwd(cwd).with_env(env);
    run_helper(&command, None, hook)
        .await
        .map_err(|e| MantisError::hook(hook, benchmark, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rewrites_only_configured_hooks() {
        let hooks = HookCommands {
            before_each: Some("make {target}".to_string()),
            ..Default::default()
        };
        let mapped = hooks.map(|cmd| cmd.replace("{target}", "clean"));

        assert_eq!(mapped.before_each.as_deref(), Some("make clean"));
        assert!(mapped.before_all.is_none());
        assert!(mapped.after_each.is_none());
    }

    #[tokio::test]
    async fn test_unset_hook_is_noop() {
        run_hook("before_all", "bench", None, None, BTreeMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hook_failure_names_the_hook() {
        let err = run_hook("after_each", "bench", Some("exit 2"), None, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MantisError::Hook { hook: "after_each", .. }));
    }
}
