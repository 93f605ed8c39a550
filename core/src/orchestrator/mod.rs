//! Orchestrator for run lifecycle management
//!
//! The Orchestrator coordinates a complete monitoring run:
//! - Expanding configured benchmarks into solo or co-running groups
//! - Running `before_all` / `after_all` hooks once per group
//! - Building one collector per benchmark for every iteration and mode
//! - Driving each group through the lockstep barrier
//! - Handling graceful shutdown via a broadcast channel
//!
//! # Example
//!
//! ```ignore
//! use mantis_core::{Configuration, OrchestratorBuilder};
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .config(Configuration::load("run.yaml")?)
//!     .registries(Arc::new(registries))
//!     .build()?;
//!
//! let outcome = orchestrator.run_with_signal_handling().await?;
//! println!("{} records", outcome.table.len());
//! ```

mod aggregator;
mod builder;
mod executor;
mod groups;

pub use aggregator::{aggregate_group_reports, GroupReport, RunSummary};
pub use builder::OrchestratorBuilder;
pub use executor::{Orchestrator, RunOutcome};
pub use groups::expand_groups;
