//! Result aggregation across benchmark groups

use std::time::Duration;

use crate::lockstep::LockstepReport;

/// What happened to one benchmark group
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    /// Group name (`"solo"` or the co-running set)
    pub name: String,

    /// Instances in the group
    pub benchmarks: Vec<String>,

    /// Lockstep rounds executed across all iterations and modes
    pub rounds: usize,

    /// Records appended
    pub records: usize,

    /// Records flagged with an error
    pub failures: usize,

    /// Why the group was skipped, if it was
    pub skipped: Option<String>,

    /// Whether a shutdown cut the group short
    pub interrupted: bool,

    /// Wall-clock time spent on the group, hooks included
    pub elapsed: Duration,
}

impl GroupReport {
    /// Create an empty report for a group
    pub fn new(name: impl Into<String>, benchmarks: Vec<String>) -> Self {
        Self {
            name: name.into(),
            benchmarks,
            ..Default::default()
        }
    }

    /// Fold in the result of one driven set
    pub fn absorb(&mut self, report: &LockstepReport) {
        self.rounds += report.rounds;
        self.records += report.records;
        self.failures += report.failures;
        self.interrupted |= report.interrupted;
    }
}

/// Aggregated statistics of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Groups that were attempted
    pub total_groups: usize,

    /// Groups skipped because a `before_all` hook failed
    pub skipped_groups: usize,

    /// Total lockstep rounds
    pub total_rounds: usize,

    /// Total records in the table
    pub total_records: usize,

    /// Records flagged with an error
    pub total_failures: usize,

    /// Whether the run was interrupted
    pub interrupted: bool,

    /// Wall-clock duration of the run
    pub total_duration: Duration,
}

impl RunSummary {
    /// Share of records without an error flag (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total_records > 0 {
            (self.total_records - self.total_failures) as f64 / self.total_records as f64
        } else {
            0.0
        }
    }
}

/// Aggregate the reports of all groups
pub fn aggregate_group_reports(reports: &[GroupReport], elapsed: Duration) -> RunSummary {
    RunSummary {
        total_groups: reports.len(),
        skipped_groups: reports.iter().filter(|r| r.skipped.is_some()).count(),
        total_rounds: reports.iter().map(|r| r.rounds).sum(),
        total_records: reports.iter().map(|r| r.records).sum(),
        total_failures: reports.iter().map(|r| r.failures).sum(),
        interrupted: reports.iter().any(|r| r.interrupted),
        total_duration: elapsed,
    }
}
