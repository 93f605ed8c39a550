//! Step producer loop

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::benchmark::Benchmark;
use crate::collector::{Collector, CollectorContext, StepLimits, TestRun, TestRunEnv};
use crate::error::MantisResult;
use crate::record::UnifiedRecord;

use super::stats::ProducerStats;

/// How one step ended
#[derive(Debug)]
pub enum StepOutcome {
    /// The test run returned its record, possibly flagged by the tool
    Completed(UnifiedRecord),
    /// A hook failed or the test run panicked; the producer stops here
    Aborted(UnifiedRecord),
}

impl StepOutcome {
    /// The record carried by this outcome
    pub fn record(&self) -> &UnifiedRecord {
        match self {
            StepOutcome::Completed(record) | StepOutcome::Aborted(record) => record,
        }
    }

    /// Take the record out
    pub fn into_record(self) -> UnifiedRecord {
        match self {
            StepOutcome::Completed(record) | StepOutcome::Aborted(record) => record,
        }
    }

    /// Whether the producer gave up after this step
    pub fn is_aborted(&self) -> bool {
        matches!(self, StepOutcome::Aborted(_))
    }
}

/// Report sent to the driver after every step
#[derive(Debug)]
pub struct StepEvent {
    /// Index of the producer in the driver's ordering
    pub producer: usize,
    /// What the step produced
    pub outcome: StepOutcome,
    /// Steps this producer still has; zero means exhausted
    pub remaining: usize,
}

/// The test runs of one collector, ready to be driven
pub struct ProducerPlan {
    /// Collector the runs came from
    pub collector_name: String,
    /// Binding shared by every run
    pub context: CollectorContext,
    /// Runs in execution order
    pub runs: Vec<Box<dyn TestRun>>,
}

impl ProducerPlan {
    /// Plan the runs of a collector
    pub fn from_collector(collector: &dyn Collector) -> MantisResult<Self> {
        Ok(Self {
            collector_name: collector.name().to_string(),
            context: collector.context().clone(),
            runs: collector.setup()?,
        })
    }

    /// Names of the planned runs
    pub fn run_names(&self) -> Vec<String> {
        self.runs.iter().map(|run| run.name().to_string()).collect()
    }
}

impl std::fmt::Debug for ProducerPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerPlan")
            .field("collector_name", &self.collector_name)
            .field("context", &self.context)
            .field("runs", &self.run_names())
            .finish()
    }
}

/// Executes one collector's test runs, one per resume
///
/// A producer is a tokio task owned by the driver. Each resume triggers
/// exactly one step: `before_each`, the test run, `after_each`, then a
/// [`StepEvent`] back to the driver. It never runs ahead of the barrier.
pub struct StepProducer {
    id: usize,
    benchmark: Arc<dyn Benchmark>,
    plan: ProducerPlan,
    limits: StepLimits,
    events_tx: mpsc::Sender<StepEvent>,
}

impl StepProducer {
    /// Create a producer
    pub fn new(
        id: usize,
        plan: ProducerPlan,
        limits: StepLimits,
        events_tx: mpsc::Sender<StepEvent>,
    ) -> Self {
        Self {
            id,
            benchmark: Arc::clone(&plan.context.benchmark),
            plan,
            limits,
            events_tx,
        }
    }

    /// Run until every step is done, a step aborts, or the driver hangs up
    pub async fn run(self, mut resume_rx: mpsc::Receiver<()>) -> ProducerStats {
        let mut stats = ProducerStats::new();
        stats.start();
        let total = self.plan.runs.len();

        tracing::debug!(
            producer = self.id,
            collector = %self.plan.collector_name,
            benchmark = self.benchmark.name(),
            steps = total,
            "Producer started"
        );

        for (index, run) in self.plan.runs.iter().enumerate() {
            if resume_rx.recv().await.is_none() {
                tracing::debug!(producer = self.id, "Resume channel closed, producer stopping");
                break;
            }

            let outcome = self.step(run.as_ref()).await;
            let remaining = if outcome.is_aborted() {
                0
            } else {
                total - index - 1
            };
            stats.record_step(outcome.record().is_failed());

            let event = StepEvent {
                producer: self.id,
                outcome,
                remaining,
            };
            if self.events_tx.send(event).await.is_err() {
                tracing::debug!(producer = self.id, "Event channel closed, producer stopping");
                break;
            }
            if remaining == 0 {
                break;
            }
        }

        stats.stop();
        tracing::debug!(
            producer = self.id,
            completed = stats.completed,
            failed = stats.failed,
            elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
            "Producer finished"
        );
        stats
    }

    /// Execute a single step, hooks included
    ///
    /// A panic anywhere in the step aborts the producer with a flagged
    /// record.
    async fn step(&self, run: &dyn TestRun) -> StepOutcome {
        match AssertUnwindSafe(self.execute(run)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(producer = self.id, panic = %message, "Step panicked");
                let mut record = self.plan.context.record(run.name());
                record.mark_failed(format!("step panicked: {message}"));
                StepOutcome::Aborted(record)
            }
        }
    }

    async fn execute(&self, run: &dyn TestRun) -> StepOutcome {
        if let Err(e) = self.benchmark.before_each().await {
            tracing::warn!(producer = self.id, run = run.name(), error = %e, "before_each failed");
            let mut record = self.plan.context.record(run.name());
            record.mark_failed(e.to_string());
            return StepOutcome::Aborted(record);
        }

        let env = TestRunEnv {
            limits: self.limits,
        };
        let (mut record, mut aborted) = match AssertUnwindSafe(run.run(&env)).catch_unwind().await
        {
            Ok(record) => (record, false),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(producer = self.id, run = run.name(), panic = %message, "Test run panicked");
                let mut record = self.plan.context.record(run.name());
                record.mark_failed(format!("test run panicked: {message}"));
                (record, true)
            }
        };

        if let Err(e) = self.benchmark.after_each().await {
            tracing::warn!(producer = self.id, run = run.name(), error = %e, "after_each failed");
            record.mark_failed(e.to_string());
            aborted = true;
        }

        if aborted {
            StepOutcome::Aborted(record)
        } else {
            StepOutcome::Completed(record)
        }
    }

    /// Get the producer ID
    pub fn id(&self) -> usize {
        self.id
    }
}

impl std::fmt::Debug for StepProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepProducer")
            .field("id", &self.id)
            .field("plan", &self.plan)
            .field("limits", &self.limits)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
