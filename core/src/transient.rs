//! Transient per-run files
//!
//! Monitoring tools dump their output to files named after the test, the
//! iteration, the benchmark, its co-running set and the tool, so concurrently
//! running collectors never share one. Each file lives for exactly one test
//! run: create, read once, delete. Deletion happens in `Drop`, which covers
//! parse failures and early returns alike.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::MantisResult;

/// Identity of one transient file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientKey {
    /// Test name from the configuration
    pub test_name: String,
    /// Iteration index
    pub iteration: usize,
    /// Benchmark instance name
    pub benchmark: String,
    /// Co-running set name
    pub benchmark_set: String,
    /// Tool or test-run tag
    pub tool: String,
}

impl TransientKey {
    /// File name for this key, with path separators and whitespace replaced
    pub fn file_name(&self) -> String {
        let raw = format!(
            "{}-iteration_{}-benchmark_{}-set_{}-{}",
            self.test_name, self.iteration, self.benchmark, self.benchmark_set, self.tool
        );
        raw.chars()
            .map(|c| {
                if c == '/' || c == '\\' || c.is_whitespace() {
                    '_'
                } else {
                    c
                }
            })
            .collect()
    }
}

/// A file that is removed when the guard goes out of scope
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    /// Guard a file named after `key` inside `dir`
    pub fn new(dir: &Path, key: &TransientKey) -> Self {
        Self {
            path: dir.join(key.file_name()),
        }
    }

    /// Guard an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Guard a sibling file sharing this file's name plus a suffix
    ///
    /// Tools such as nsys derive several output names from one base path.
    pub fn sibling(&self, suffix: &str) -> TransientFile {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        TransientFile::at(PathBuf::from(name))
    }

    /// Path of the guarded file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the tool actually produced the file
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create (truncate) the file for writing
    pub fn create(&self) -> MantisResult<File> {
        Ok(File::create(&self.path)?)
    }

    /// Read the whole file
    pub fn read_to_string(&self) -> MantisResult<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "Removed transient file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove transient file")
            }
        }
    }
}
