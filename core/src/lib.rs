//! mantis-core: orchestration engine for mantis-monitor
//!
//! This crate runs benchmarks under monitoring tools and merges everything the
//! tools report into one table, including:
//!
//! - Plugin registries (benchmarks, collectors, formatters)
//! - The Benchmark, Collector and TestRun contracts
//! - Co-running sets driven through a lockstep barrier
//! - The unified record and table
//! - Process supervision and transient file handling
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod benchmark;
pub mod channel;
pub mod collector;
pub mod config;
pub mod error;
pub mod formatter;
pub mod lockstep;
pub mod orchestrator;
pub mod process;
pub mod record;
pub mod registry;
pub mod table;
pub mod transient;

pub use benchmark::*;
pub use channel::ChannelConfig;
pub use collector::*;
pub use config::*;
pub use error::*;
pub use formatter::*;
pub use lockstep::{LockstepDriver, LockstepReport, ProducerPlan, ProducerStats};
pub use orchestrator::{
    expand_groups, GroupReport, Orchestrator, OrchestratorBuilder, RunOutcome, RunSummary,
};
pub use record::*;
pub use registry::{Registries, Registry};
pub use table::UnifiedTable;
pub use transient::{TransientFile, TransientKey};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_record_serializes_as_flat_row() {
        let mut record = UnifiedRecord::new("XSBench", SOLO_SET, "NvidiaPowerTime", 1)
            .with_timescale(250)
            .with_units("time, W");
        record.push_sample("gpu_0_power.draw", 0.0, Some(71.5));
        record.push_sample("gpu_0_power.draw", 0.25, None);
        record.duration = 1.5;

        let row = serde_json::to_value(&record).unwrap();
        assert_eq!(row["benchmark_name"], "XSBench");
        assert_eq!(row["benchmark_set"], "solo");
        assert_eq!(row["units"], "time, W");
        assert_eq!(row["measurements"][0], "gpu_0_power.draw");
        assert_eq!(row["gpu_0_power.draw"][1][0], 0.25);
        assert!(row["gpu_0_power.draw"][1][1].is_null());
        assert!(row.get("metrics").is_none());

        let back: UnifiedRecord = serde_json::from_value(row).unwrap();
        assert_eq!(back, record);
        assert!(back.validate().is_ok());
    }

    #[test]
    fn test_table_columns_cover_every_collector() {
        let mut ttc = UnifiedRecord::new("A", "A:B", "TTCCollector", 0);
        ttc.insert_metric("time_to_completion", Series::Scalar(2.0));
        let mut perf = UnifiedRecord::new("B", "A:B", "PerfCollector_0", 0);
        perf.push_sample("cycles", 0.0, Some(1.0));

        let table = UnifiedTable::from_records(vec![ttc, perf]);
        let columns = table.columns();
        assert_eq!(&columns[..RESERVED_COLUMNS.len()], &RESERVED_COLUMNS[..]);
        assert_eq!(
            &columns[RESERVED_COLUMNS.len()..],
            &["cycles".to_string(), "time_to_completion".to_string()]
        );
    }
}
