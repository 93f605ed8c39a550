//! JSON output: the table as a pretty-printed array of flattened records

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use mantis_core::{Formatter, MantisResult, UnifiedTable};

/// Writes and reads the unified table as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn name(&self) -> &str {
        "JSON"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn save(&self, base: &Path, table: &UnifiedTable) -> MantisResult<PathBuf> {
        let path = self.output_path(base);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, table)?;
        writer.flush()?;

        tracing::debug!(path = %path.display(), rows = table.len(), "Wrote JSON table");
        Ok(path)
    }

    fn open(&self, path: &Path) -> MantisResult<UnifiedTable> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
