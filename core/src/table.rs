//! The growing unified table
//!
//! Only the orchestrator appends to the table; collectors hand their records
//! over through the lockstep driver.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::{UnifiedRecord, RESERVED_COLUMNS};

/// Ordered collection of unified records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnifiedTable {
    rows: Vec<UnifiedRecord>,
}

impl UnifiedTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from existing records
    pub fn from_records(rows: Vec<UnifiedRecord>) -> Self {
        Self { rows }
    }

    /// Append one record
    ///
    /// Records violating the record invariants are still kept (a table with
    /// gaps beats no table) but are flagged and logged.
    pub fn append(&mut self, mut record: UnifiedRecord) {
        if let Err(e) = record.validate() {
            tracing::warn!(
                benchmark = %record.benchmark_name,
                collector = %record.collector_name,
                error = %e,
                "Appending record that violates the record schema"
            );
            record.mark_failed(e.to_string());
        }
        self.rows.push(record);
    }

    /// Append many records in order
    pub fn extend(&mut self, records: impl IntoIterator<Item = UnifiedRecord>) {
        for record in records {
            self.append(record);
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows
    pub fn iter(&self) -> impl Iterator<Item = &UnifiedRecord> {
        self.rows.iter()
    }

    /// Borrow the rows
    pub fn records(&self) -> &[UnifiedRecord] {
        &self.rows
    }

    /// Consume the table into its rows
    pub fn into_records(self) -> Vec<UnifiedRecord> {
        self.rows
    }

    /// Rows measured for one benchmark instance
    pub fn for_benchmark<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a UnifiedRecord> {
        self.rows.iter().filter(move |r| r.benchmark_name == name)
    }

    /// Number of rows flagged as failed or incomplete
    pub fn failed_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_failed()).count()
    }

    /// Column names: reserved columns first, then the sorted union of metric keys
    pub fn columns(&self) -> Vec<String> {
        let metrics: BTreeSet<&str> = self
            .rows
            .iter()
            .flat_map(|r| r.metrics().keys().map(String::as_str))
            .filter(|key| !RESERVED_COLUMNS.contains(key))
            .collect();

        RESERVED_COLUMNS
            .iter()
            .copied()
            .chain(metrics)
            .map(str::to_string)
            .collect()
    }
}

impl IntoIterator for UnifiedTable {
    type Item = UnifiedRecord;
    type IntoIter = std::vec::IntoIter<UnifiedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
