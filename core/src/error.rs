//! Error types for mantis-core

use std::path::PathBuf;

use thiserror::Error;

/// Core error type
///
/// Configuration-class variants abort a run before any process is launched.
/// Everything below the test-run boundary is recovered locally and only ever
/// shows up as the `error` flag on a record.
#[derive(Error, Debug)]
pub enum MantisError {
    /// Configuration error (missing keys, invalid values)
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be found
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// A registry already holds an entry under this name
    #[error("{kind} name collision: {name} is already registered")]
    NameCollision {
        /// Registry namespace ("benchmark", "collector", "formatter")
        kind: &'static str,
        /// The rejected name
        name: String,
    },

    /// A benchmark matrix entry did not match exactly one configured benchmark
    #[error("could not match benchmark name {name} to a single configured benchmark ({matches} matches)")]
    AmbiguousBenchmark {
        /// Name used in the matrix
        name: String,
        /// Number of configured benchmarks carrying that name
        matches: usize,
    },

    /// A benchmark lifecycle hook failed
    #[error("{hook} hook failed for {benchmark}: {message}")]
    Hook {
        /// Hook name (before_all, after_each, ...)
        hook: &'static str,
        /// Benchmark instance name
        benchmark: String,
        /// Failure description
        message: String,
    },

    /// A child process could not be started or supervised
    #[error("process error: {0}")]
    Process(String),

    /// Monitoring tool output could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Tabular output could not be written or read back
    #[error("CSV error: {0}")]
    Csv(String),

    /// Orchestration failure (producer tasks, channels)
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MantisError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        MantisError::Config(message.into())
    }

    /// Create a configuration error for a missing required key
    pub fn missing_config(key: &str) -> Self {
        MantisError::Config(format!("missing required key: {key}"))
    }

    /// Create a process error
    pub fn process(message: impl Into<String>) -> Self {
        MantisError::Process(message.into())
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        MantisError::Parse(message.into())
    }

    /// Create a CSV error
    pub fn csv(message: impl Into<String>) -> Self {
        MantisError::Csv(message.into())
    }

    /// Create an orchestration error
    pub fn orchestration(message: impl Into<String>) -> Self {
        MantisError::Orchestration(message.into())
    }

    /// Create a hook failure
    pub fn hook(hook: &'static str, benchmark: &str, message: impl Into<String>) -> Self {
        MantisError::Hook {
            hook,
            benchmark: benchmark.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error belongs to the configuration class
    ///
    /// Configuration errors are fatal at start-up; all others are reported
    /// and the run continues.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            MantisError::Config(_)
                | MantisError::ConfigNotFound(_)
                | MantisError::NameCollision { .. }
                | MantisError::AmbiguousBenchmark { .. }
                | MantisError::Yaml(_)
        )
    }
}

/// Result type alias
pub type MantisResult<T> = std::result::Result<T, MantisError>;
