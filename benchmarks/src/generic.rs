//! Generic command benchmark

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use mantis_core::{Benchmark, BenchmarkConfig, MantisError, MantisResult, RunCommand};

use crate::hooks::{run_hook, HookCommands};

fn default_shell() -> bool {
    true
}

/// Configuration of a `generic_benchmark`
#[derive(Debug, Clone, Deserialize)]
pub struct GenericArgs {
    /// Instance name
    pub name: String,
    /// Command line to run
    pub cmd: String,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overrides
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Run `cmd` through `/bin/sh -c` (default) or split it on whitespace
    #[serde(default = "default_shell")]
    pub shell: bool,
    /// Lifecycle hook commands
    #[serde(flatten)]
    pub hooks: HookCommands,
}

/// Build the run command described by a command line
pub(crate) fn build_command(
    name: &str,
    cmd: &str,
    shell: bool,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
) -> MantisResult<RunCommand> {
    if cmd.trim().is_empty() {
        return Err(MantisError::config(format!("benchmark {name}: empty cmd")));
    }
    let command = if shell {
        RunCommand::shell(cmd)
    } else {
        let mut parts = cmd.split_whitespace();
        let program = parts.next().unwrap_or_default();
        RunCommand::program(program, parts)
    };
    Ok(command.with_cwd(cwd).with_env(env))
}

/// A benchmark that runs a fixed command line
#[derive(Debug, Clone)]
pub struct GenericBenchmark {
    name: String,
    command: RunCommand,
    hooks: HookCommands,
}

impl GenericBenchmark {
    /// Create a benchmark from a ready command
    pub fn new(name: impl Into<String>, command: RunCommand, hooks: HookCommands) -> Self {
        Self {
            name: name.into(),
            command,
            hooks,
        }
    }

    /// Create a benchmark from parsed arguments
    pub fn from_args(args: GenericArgs) -> MantisResult<Self> {
        let command = build_command(&args.name, &args.cmd, args.shell, args.cwd, args.env)?;
        Ok(Self::new(args.name, command, args.hooks))
    }

    /// Factory registered as `generic_benchmark`
    pub fn generate(config: &BenchmarkConfig) -> MantisResult<Vec<Arc<dyn Benchmark>>> {
        let args: GenericArgs = config.parse()?;
        let benchmark: Arc<dyn Benchmark> = Arc::new(Self::from_args(args)?);
        Ok(vec![benchmark])
    }

    /// Configured hook commands
    pub fn hooks(&self) -> &HookCommands {
        &self.hooks
    }

    async fn hook(&self, hook: &'static str, command: Option<&str>) -> MantisResult<()> {
        run_hook(
            hook,
            &self.name,
            command,
            self.command.cwd.clone(),
            self.command.env.clone(),
        )
        .await
    }
}

#[async_trait]
impl Benchmark for GenericBenchmark {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_command(&self) -> RunCommand {
        self.command.clone()
    }

    async fn before_all(&self) -> MantisResult<()> {
        self.hook("before_all", self.hooks.before_all.as_deref()).await
    }

    async fn before_each(&self) -> MantisResult<()> {
        self.hook("before_each", self.hooks.before_each.as_deref()).await
    }

    async fn after_each(&self) -> MantisResult<()> {
        self.hook("after_each", self.hooks.after_each.as_deref()).await
    }

    async fn after_all(&self) -> MantisResult<()> {
        self.hook("after_all", self.hooks.after_all.as_deref()).await
    }
}
