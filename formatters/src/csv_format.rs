//! CSV output
//!
//! One row per record. Columns are the reserved fields followed by the sorted
//! union of metric keys; a record without a metric leaves that cell empty.
//! Text fields are written as-is, structured values (series, measurement
//! lists, multiple units) as JSON.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{Reader, Writer};
use serde_json::{Map, Value};

use mantis_core::{Formatter, MantisError, MantisResult, UnifiedRecord, UnifiedTable};

/// Columns always read back as plain text
const TEXT_COLUMNS: [&str; 4] = ["benchmark_name", "benchmark_set", "collector_name", "error"];

fn csv_error(e: csv::Error) -> MantisError {
    MantisError::csv(e.to_string())
}

fn encode_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn decode_cell(column: &str, cell: &str) -> Value {
    if TEXT_COLUMNS.contains(&column) {
        return Value::String(cell.to_string());
    }
    serde_json::from_str(cell).unwrap_or_else(|_| Value::String(cell.to_string()))
}

/// Writes and reads the unified table as CSV
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn name(&self) -> &str {
        "CSV"
    }

    fn extension(&self) -> &str {
        "csv"
    }

    fn save(&self, base: &Path, table: &UnifiedTable) -> MantisResult<PathBuf> {
        let path = self.output_path(base);
        let columns = table.columns();
        let mut wtr = Writer::from_writer(File::create(&path)?);

        wtr.write_record(&columns).map_err(csv_error)?;
        for record in table.iter() {
            let row = serde_json::to_value(record)?;
            wtr.write_record(columns.iter().map(|column| encode_cell(row.get(column))))
                .map_err(csv_error)?;
        }
        wtr.flush()?;

        tracing::debug!(path = %path.display(), rows = table.len(), "Wrote CSV table");
        Ok(path)
    }

    fn open(&self, path: &Path) -> MantisResult<UnifiedTable> {
        let mut rdr = Reader::from_reader(File::open(path)?);
        let headers = rdr.headers().map_err(csv_error)?.clone();

        let mut records = Vec::new();
        for (line, row) in rdr.records().enumerate() {
            let row = row.map_err(csv_error)?;
            let fields: Map<String, Value> = headers
                .iter()
                .zip(row.iter())
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(column, cell)| (column.to_string(), decode_cell(column, cell)))
                .collect();
            let record: UnifiedRecord = serde_json::from_value(Value::Object(fields))
                .map_err(|e| MantisError::csv(format!("row {}: {e}", line + 1)))?;
            records.push(record);
        }
        Ok(UnifiedTable::from_records(records))
    }
}
