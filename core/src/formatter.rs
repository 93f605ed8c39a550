//! Formatter contract

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::MantisResult;
use crate::table::UnifiedTable;

/// Serializes the unified table to a file and reads it back
pub trait Formatter: Send + Sync {
    /// Registry name (e.g. "CSV")
    fn name(&self) -> &str;

    /// File extension appended to the base path
    fn extension(&self) -> &str;

    /// Write the table to `base` plus this formatter's extension
    fn save(&self, base: &Path, table: &UnifiedTable) -> MantisResult<PathBuf>;

    /// Read a table written by `save`
    fn open(&self, path: &Path) -> MantisResult<UnifiedTable>;

    /// Output path for a base path
    fn output_path(&self, base: &Path) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(".");
        name.push(self.extension());
        PathBuf::from(name)
    }
}

/// Factory building a formatter
pub type FormatterFactory = Arc<dyn Fn() -> Box<dyn Formatter> + Send + Sync>;
