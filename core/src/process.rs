//! Child process supervision
//!
//! Every monitored execution goes through [`supervise`] or
//! [`supervise_sampled`]: both spawn the benchmark, wait for it, enforce the
//! optional per-step timeout by killing the child, and report how it ended.
//! They never return an error; failures are described by [`ExitState`].
//!
//! Children lead their own process group. Killing a step kills the group, so
//! a workload started by `sh -c` or behind `perf`/`nsys` does not outlive it.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use crate::benchmark::RunCommand;
use crate::error::{MantisError, MantisResult};

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    /// Exited with status 0
    Success,
    /// Exited non-zero (or by signal, with no code)
    Failed(Option<i32>),
    /// Killed after exceeding the step timeout
    TimedOut(Duration),
    /// Could not be started
    SpawnFailed(String),
}

/// Result of supervising one process
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// How the process ended
    pub state: ExitState,
    /// Wall-clock time from spawn to exit
    pub elapsed: Duration,
}

impl ProcessOutcome {
    /// Whether the process exited successfully
    pub fn succeeded(&self) -> bool {
        self.state == ExitState::Success
    }

    /// Elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Failure description for the record's error flag, `None` on success
    pub fn failure(&self, what: &str) -> Option<String> {
        match &self.state {
            ExitState::Success => None,
            ExitState::Failed(Some(code)) => Some(format!("{what} exited with status {code}")),
            ExitState::Failed(None) => Some(format!("{what} was terminated by a signal")),
            ExitState::TimedOut(limit) => Some(format!(
                "{what} timed out after {:.1}s and was killed",
                limit.as_secs_f64()
            )),
            ExitState::SpawnFailed(e) => Some(format!("{what} failed to start: {e}")),
        }
    }
}

/// Kills a child's whole process group when dropped
///
/// The child must have been spawned with `process_group(0)`, which makes its
/// pid the group id.
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    /// Guard the group led by `pid`
    pub fn led_by(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).filter(|pgid| *pgid > 0),
        }
    }

    /// SIGKILL every process in the group; later calls do nothing
    pub fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    // SAFETY: killpg only sends a signal and touches no memory
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: everyone in the group is already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

/// Run a command to completion under an optional timeout
pub async fn supervise(command: &RunCommand, timeout: Option<Duration>) -> ProcessOutcome {
    supervise_sampled(command, timeout, None, |_, _| {}).await
}

/// Run a command while calling `on_tick` at a fixed interval
///
/// `on_tick` receives the child's pid and the seconds elapsed since spawn.
/// Sampling collectors use this to poll `/proc`-style statistics while the
/// benchmark runs.
pub async fn supervise_sampled<F>(
    command: &RunCommand,
    timeout: Option<Duration>,
    interval: Option<Duration>,
    mut on_tick: F,
) -> ProcessOutcome
where
    F: FnMut(Option<u32>, f64),
{
    let start = Instant::now();
    let mut child = match command.to_command().spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(command = %command, error = %e, "Failed to spawn process");
            return ProcessOutcome {
                state: ExitState::SpawnFailed(e.to_string()),
                elapsed: start.elapsed(),
            };
        }
    };
    let pid = child.id();
    let mut group = ProcessGroup::led_by(pid);
    tracing::debug!(command = %command, pid = ?pid, "Spawned process");

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker
    });

    let state = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) if status.success() => ExitState::Success,
                    Ok(status) => ExitState::Failed(status.code()),
                    Err(e) => ExitState::SpawnFailed(e.to_string()),
                };
            }
            _ = &mut deadline => {
                let limit = timeout.unwrap_or_default();
                tracing::warn!(command = %command, limit_secs = limit.as_secs_f64(), "Step timeout reached, killing process group");
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!(command = %command, error = %e, "Failed to kill timed out process");
                }
                break ExitState::TimedOut(limit);
            }
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => { ticker.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                on_tick(pid, start.elapsed().as_secs_f64());
            }
        }
    };

    let outcome = ProcessOutcome {
        state,
        elapsed: start.elapsed(),
    };
    if let Some(failure) = outcome.failure("process") {
        tracing::warn!(command = %command, failure = %failure, "Supervised process did not succeed");
    }
    outcome
}

/// A monitoring tool running alongside a benchmark
///
/// The tool and anything it started are killed by [`MonitorProcess::stop`],
/// or on drop if the step is abandoned.
#[derive(Debug)]
pub struct MonitorProcess {
    program: String,
    child: tokio::process::Child,
    group: ProcessGroup,
}

impl MonitorProcess {
    /// Start a monitoring tool, optionally redirecting its stdout to a file
    pub fn spawn<I, S>(program: &str, args: I, stdout: Option<std::fs::File>) -> MantisResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        match stdout {
            Some(file) => command.stdout(Stdio::from(file)),
            None => command.stdout(Stdio::null()),
        };

        let child = command
            .spawn()
            .map_err(|e| MantisError::process(format!("failed to start {program}: {e}")))?;
        tracing::debug!(program, pid = ?child.id(), "Started monitoring tool");

        Ok(Self {
            program: program.to_string(),
            group: ProcessGroup::led_by(child.id()),
            child,
        })
    }

    /// Check whether the tool died on its own, e.g. because of bad arguments
    pub fn exited_early(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                Some(format!("{} exited early with {}", self.program, status))
            }
            _ => None,
        }
    }

    /// Terminate the tool and reap it
    pub async fn stop(mut self) -> MantisResult<()> {
        self.group.kill();
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| MantisError::process(format!("failed to stop {}: {e}", self.program)))?;
        tracing::debug!(program = %self.program, "Stopped monitoring tool");
        Ok(())
    }
}

/// Run a short helper command (hooks, post-processing) and wait for it
pub async fn run_helper(
    command: &RunCommand,
    timeout: Option<Duration>,
    what: &str,
) -> MantisResult<()> {
    let outcome = supervise(command, timeout).await;
    match outcome.failure(what) {
        None => Ok(()),
        Some(message) => Err(MantisError::process(message)),
    }
}

/// Whether an executable can be found on `PATH`
pub fn tool_available(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervise_success() {
        let outcome = supervise(&RunCommand::shell("sleep 0.1"), None).await;
        assert!(outcome.succeeded());
        assert!(outcome.elapsed >= Duration::from_millis(100));
        assert!(outcome.failure("benchmark").is_none());
    }

    #[tokio::test]
    async fn test_supervise_nonzero_exit() {
        let outcome = supervise(&RunCommand::shell("exit 3"), None).await;
        assert_eq!(outcome.state, ExitState::Failed(Some(3)));
        assert_eq!(
            outcome.failure("benchmark").as_deref(),
            Some("benchmark exited with status 3")
        );
    }

    #[tokio::test]
    async fn test_supervise_spawn_failure() {
        let outcome = supervise(
            &RunCommand::program("/nonexistent/mantis-tool", Vec::<String>::new()),
            None,
        )
        .await;
        assert!(matches!(outcome.state, ExitState::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_supervise_timeout_kills() {
        let start = Instant::now();
        let outcome = supervise(
            &RunCommand::shell("sleep 10"),
            Some(Duration::from_millis(200)),
        )
        .await;
        assert!(matches!(outcome.state, ExitState::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outcome.failure("benchmark").unwrap().contains("timed out"));
    }

    /// Whether a pid names a live (non-zombie) process
    fn alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    async fn wait_dead(pid: i32) -> bool {
        for _ in 0..50 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    fn read_pid(path: &Path) -> i32 {
        std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
    }

    #[tokio::test]
    async fn test_timeout_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let command = RunCommand::shell("sleep 30 & echo $! > grandchild.pid; wait")
            .with_cwd(Some(dir.path().to_path_buf()));

        let outcome = supervise(&command, Some(Duration::from_millis(300))).await;
        assert!(matches!(outcome.state, ExitState::TimedOut(_)));

        let grandchild = read_pid(&dir.path().join("grandchild.pid"));
        assert!(wait_dead(grandchild).await, "sleep {grandchild} outlived the step");
    }

    #[tokio::test]
    async fn test_monitor_drop_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("tool.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let monitor = MonitorProcess::spawn("sh", ["-c", script.as_str()], None).unwrap();

        for _ in 0..50 {
            if std::fs::read_to_string(&pid_file).map_or(false, |s| s.ends_with('\n')) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let grandchild = read_pid(&pid_file);
        drop(monitor);
        assert!(wait_dead(grandchild).await, "sleep {grandchild} outlived its monitor");
    }

    #[test]
    fn test_process_group_ignores_missing_pid() {
        let mut group = ProcessGroup::led_by(None);
        group.kill();
        assert!(ProcessGroup::led_by(Some(0)).pgid.is_none());
    }

    #[tokio::test]
    async fn test_supervise_sampled_ticks() {
        let mut ticks = Vec::new();
        let outcome = supervise_sampled(
            &RunCommand::shell("sleep 0.35"),
            None,
            Some(Duration::from_millis(100)),
            |pid, elapsed| {
                assert!(pid.is_some());
                ticks.push(elapsed);
            },
        )
        .await;
        assert!(outcome.succeeded());
        assert!(ticks.len() >= 2);
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = std::collections::BTreeMap::new();
        env.insert("MANTIS_PROBE".to_string(), "42".to_string());
        let command = RunCommand::shell("test \"$MANTIS_PROBE\" = 42 && touch probe")
            .with_cwd(Some(dir.path().to_path_buf()))
            .with_env(env);

        let outcome = supervise(&command, None).await;
        assert!(outcome.succeeded());
        assert!(dir.path().join("probe").exists());
    }

    #[tokio::test]
    async fn test_monitor_process_stop() {
        let monitor = MonitorProcess::spawn("sleep", ["10"], None).unwrap();
        let start = Instant::now();
        monitor.stop().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_monitor_process_missing_tool() {
        let result = MonitorProcess::spawn("/nonexistent/smi", ["--loop-ms=1000"], None);
        assert!(matches!(result, Err(MantisError::Process(_))));
    }

    #[test]
    fn test_tool_available() {
        assert!(tool_available("sh"));
        assert!(!tool_available("definitely-not-a-mantis-tool"));
    }
}
