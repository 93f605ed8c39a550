//! Lockstep fan-out/join barrier
//!
//! Co-running benchmarks are monitored by one collector each. Every collector
//! becomes a [`StepProducer`] task that executes one test run per resume and
//! reports the resulting record. The [`LockstepDriver`] is the join point:
//!
//! 1. Resume every producer that still has steps
//! 2. Wait for all of them to report (record, failure or exhaustion)
//! 3. Append the round's records in producer order
//! 4. Repeat until every producer is exhausted
//!
//! Producers never run ahead, so step n of every benchmark in a set overlaps
//! only with step n of its siblings.
//!
//! # Example
//!
//! ```ignore
//! use mantis_core::lockstep::{LockstepDriver, ProducerPlan};
//!
//! let plans = collectors
//!     .iter()
//!     .map(|c| ProducerPlan::from_collector(c.as_ref()))
//!     .collect::<MantisResult<Vec<_>>>()?;
//!
//! let driver = LockstepDriver::new(ChannelConfig::default(), limits);
//! let report = driver.drive(plans, &mut table, &mut shutdown_rx).await;
//! println!("{} rounds", report.rounds);
//! ```

mod driver;
mod producer;
mod stats;

pub use driver::{LockstepDriver, LockstepReport};
pub use producer::{ProducerPlan, StepEvent, StepOutcome, StepProducer};
pub use stats::ProducerStats;
