//! Benchmark contract
//!
//! A benchmark is a runnable workload plus four lifecycle hooks. Instances are
//! produced by factories registered under a type name; one configuration
//! fragment may fan out into many instances.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BenchmarkConfig;
use crate::error::MantisResult;

/// Shell used for shell-mode commands
pub const SHELL: &str = "/bin/sh";

/// A ready-to-execute process invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunCommand {
    /// Command line (shell mode) or program path
    pub command: String,
    /// Arguments, only used outside shell mode
    pub args: Vec<String>,
    /// Run `command` through `/bin/sh -c`
    pub shell: bool,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables layered over the inherited environment
    pub env: BTreeMap<String, String>,
}

impl RunCommand {
    /// A command line executed through the shell
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            shell: true,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// A program executed directly with the given arguments
    pub fn program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            shell: false,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Set the environment overrides
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Full argument vector, shell included
    pub fn argv(&self) -> Vec<String> {
        if self.shell {
            vec![SHELL.to_string(), "-c".to_string(), self.command.clone()]
        } else {
            std::iter::once(self.command.clone())
                .chain(self.args.iter().cloned())
                .collect()
        }
    }

    /// Wrap this command behind a tool that takes the workload's argv last
    ///
    /// `perf stat ... -- <argv>` and `nsys profile ... <argv>` both work this
    /// way. The working directory and environment are kept.
    pub fn wrapped<I, S>(&self, program: &str, tool_args: I) -> RunCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = tool_args
            .into_iter()
            .map(Into::into)
            .chain(self.argv())
            .collect::<Vec<_>>();
        RunCommand::program(program, args)
            .with_cwd(self.cwd.clone())
            .with_env(self.env.clone())
    }

    /// Build a tokio command ready to spawn
    ///
    /// The child leads a new process group so the whole tree can be killed
    /// (see [`crate::process::ProcessGroup`]), and is killed if its handle is
    /// dropped.
    pub fn to_command(&self) -> tokio::process::Command {
        let argv = self.argv();
        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

impl std::fmt::Display for RunCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.shell {
            f.write_str(&self.command)
        } else {
            f.write_str(&self.argv().join(" "))
        }
    }
}

/// A runnable workload with lifecycle hooks
///
/// Hooks default to no-ops. `before_each`/`after_each` may be called several
/// times per iteration when a collector issues several test runs.
#[async_trait]
pub trait Benchmark: Send + Sync {
    /// Instance name, used as a join key in the output
    fn name(&self) -> &str;

    /// Process invocation for one run; pure and repeatable
    fn run_command(&self) -> RunCommand;

    /// One-time setup before all iterations of a run group
    async fn before_all(&self) -> MantisResult<()> {
        Ok(())
    }

    /// Called immediately before every monitored execution
    async fn before_each(&self) -> MantisResult<()> {
        Ok(())
    }

    /// Called immediately after every monitored execution
    async fn after_each(&self) -> MantisResult<()> {
        Ok(())
    }

    /// One-time teardown after all iterations of a run group
    async fn after_all(&self) -> MantisResult<()> {
        Ok(())
    }
}

/// Factory turning one configuration fragment into benchmark instances
pub type BenchmarkFactory =
    Arc<dyn Fn(&BenchmarkConfig) -> MantisResult<Vec<Arc<dyn Benchmark>>> + Send + Sync>;

/// A named set of benchmarks that run concurrently
#[derive(Clone)]
pub struct BenchmarkGroup {
    /// `"solo"` or the colon-joined matrix entry
    pub name: String,
    /// Instances in the group
    pub benchmarks: Vec<Arc<dyn Benchmark>>,
}

impl BenchmarkGroup {
    /// Create a group
    pub fn new(name: impl Into<String>, benchmarks: Vec<Arc<dyn Benchmark>>) -> Self {
        Self {
            name: name.into(),
            benchmarks,
        }
    }

    /// Names of the instances in the group
    pub fn benchmark_names(&self) -> Vec<&str> {
        self.benchmarks.iter().map(|b| b.name()).collect()
    }
}

impl std::fmt::Debug for BenchmarkGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkGroup")
            .field("name", &self.name)
            .field("benchmarks", &self.benchmark_names())
            .finish()
    }
}
