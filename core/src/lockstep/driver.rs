//! Round-based barrier over step producers

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::channel::ChannelConfig;
use crate::collector::{CollectorContext, StepLimits};
use crate::record::UnifiedRecord;
use crate::table::UnifiedTable;

use super::producer::{ProducerPlan, StepEvent, StepProducer};
use super::stats::ProducerStats;

/// Summary of one driven co-running set
#[derive(Debug, Clone, Default)]
pub struct LockstepReport {
    /// Rounds executed
    pub rounds: usize,
    /// Records appended to the table
    pub records: usize,
    /// Appended records that carry an error flag
    pub failures: usize,
    /// Whether a shutdown signal cut the set short
    pub interrupted: bool,
    /// Stats of the producers that ran to completion
    pub producers: Vec<ProducerStats>,
}

/// Driver-side view of one producer
struct Slot {
    context: CollectorContext,
    run_names: Vec<String>,
    next_run: usize,
    remaining: usize,
    resume_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<ProducerStats>>,
}

impl Slot {
    fn is_active(&self) -> bool {
        self.remaining > 0 && self.resume_tx.is_some()
    }

    /// Flagged record standing in for a step that never reported
    fn stub(&self, reason: &str) -> UnifiedRecord {
        let name = self
            .run_names
            .get(self.next_run)
            .map(String::as_str)
            .unwrap_or("unknown");
        let mut record = self.context.record(name);
        record.mark_failed(reason);
        record
    }

    /// Stop resuming this producer and let its task finish
    fn exhaust(&mut self) {
        self.remaining = 0;
        self.resume_tx = None;
    }

    /// Stop driving this producer and kill whatever it is running
    fn retire(&mut self) {
        self.remaining = 0;
        self.resume_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Advances a set of producers in lockstep rounds
///
/// Every round resumes each non-exhausted producer once and waits until all
/// of them reported. Records of a round are appended in producer order, and
/// round n+1 never starts before round n resolved for every producer. With
/// k producers of m steps each the set takes exactly m rounds.
#[derive(Debug, Clone)]
pub struct LockstepDriver {
    channel: ChannelConfig,
    limits: StepLimits,
}

impl LockstepDriver {
    /// Create a driver
    pub fn new(channel: ChannelConfig, limits: StepLimits) -> Self {
        Self { channel, limits }
    }

    /// Longest the driver waits for one round
    pub fn round_timeout(&self) -> Option<Duration> {
        self.limits
            .timeout
            .map(|timeout| timeout + self.channel.round_grace)
    }

    /// Drive the producers until all are exhausted or shutdown is signalled
    pub async fn drive(
        &self,
        plans: Vec<ProducerPlan>,
        table: &mut UnifiedTable,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> LockstepReport {
        let mut report = LockstepReport::default();
        let (events_tx, mut events_rx) = mpsc::channel(self.channel.step_buffer);

        let mut slots = Vec::with_capacity(plans.len());
        for (id, plan) in plans.into_iter().enumerate() {
            let run_names = plan.run_names();
            let context = plan.context.clone();
            if run_names.is_empty() {
                tracing::debug!(producer = id, collector = %plan.collector_name, "Collector planned no test runs");
                slots.push(Slot {
                    context,
                    run_names,
                    next_run: 0,
                    remaining: 0,
                    resume_tx: None,
                    task: None,
                });
                continue;
            }

            let (resume_tx, resume_rx) = mpsc::channel(1);
            let producer = StepProducer::new(id, plan, self.limits, events_tx.clone());
            let task = tokio::spawn(async move { producer.run(resume_rx).await });
            slots.push(Slot {
                context,
                remaining: run_names.len(),
                run_names,
                next_run: 0,
                resume_tx: Some(resume_tx),
                task: Some(task),
            });
        }
        drop(events_tx);

        while slots.iter().any(Slot::is_active) {
            let failed_before = table.failed_count();
            let mut events: Vec<Option<StepEvent>> = (0..slots.len()).map(|_| None).collect();
            let mut awaiting = BTreeSet::new();

            for (id, slot) in slots.iter_mut().enumerate() {
                if !slot.is_active() {
                    continue;
                }
                let resumed = slot
                    .resume_tx
                    .as_ref()
                    .map(|tx| tx.try_send(()).is_ok())
                    .unwrap_or(false);
                if resumed {
                    awaiting.insert(id);
                } else {
                    tracing::warn!(producer = id, "Producer is gone, treating it as exhausted");
                    table.append(slot.stub("producer stopped unexpectedly"));
                    report.records += 1;
                    slot.retire();
                }
            }

            let deadline = self
                .round_timeout()
                .map(|timeout| tokio::time::Instant::now() + timeout);
            let period = self.channel.liveness_interval;
            let mut liveness = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut dead = BTreeSet::new();
            while !awaiting.is_empty() {
                tokio::select! {
                    biased;

                    _ = shutdown_signal(shutdown) => {
                        tracing::info!(round = report.rounds, "Shutdown requested, abandoning round");
                        report.interrupted = true;
                        break;
                    }

                    event = recv_before(&mut events_rx, deadline) => match event {
                        Some(event) => accept(event, &mut awaiting, &mut events),
                        None => break,
                    },

                    _ = liveness.tick() => {
                        let finished: Vec<usize> = awaiting
                            .iter()
                            .copied()
                            .filter(|id| slots[*id].task.as_ref().map_or(true, JoinHandle::is_finished))
                            .collect();
                        if !finished.is_empty() {
                            // a finished task may still have its last event queued
                            while let Ok(event) = events_rx.try_recv() {
                                accept(event, &mut awaiting, &mut events);
                            }
                            for id in finished {
                                if awaiting.remove(&id) {
                                    dead.insert(id);
                                }
                            }
                        }
                    }
                }
            }

            for (id, slot) in slots.iter_mut().enumerate() {
                match events[id].take() {
                    Some(event) => {
                        slot.next_run += 1;
                        slot.remaining = event.remaining;
                        if event.outcome.is_aborted() {
                            tracing::warn!(producer = id, "Producer aborted, treating it as exhausted");
                            slot.exhaust();
                        }
                        table.append(event.outcome.into_record());
                        report.records += 1;
                    }
                    None if dead.contains(&id) => {
                        tracing::warn!(producer = id, "Producer died without reporting, treating it as exhausted");
                        table.append(slot.stub("producer stopped unexpectedly"));
                        report.records += 1;
                        slot.retire();
                    }
                    None if awaiting.contains(&id) => {
                        let reason = match self.round_timeout() {
                            _ if report.interrupted => "step abandoned on shutdown".to_string(),
                            Some(timeout) => format!(
                                "step did not report within {:.1}s",
                                timeout.as_secs_f64()
                            ),
                            None => "producer stopped unexpectedly".to_string(),
                        };
                        tracing::warn!(producer = id, reason = %reason, "Dropping laggard producer");
                        table.append(slot.stub(&reason));
                        report.records += 1;
                        slot.retire();
                    }
                    None => {}
                }
            }

            report.rounds += 1;
            report.failures += table.failed_count().saturating_sub(failed_before);
            tracing::debug!(
                round = report.rounds,
                records = report.records,
                failures = report.failures,
                "Round resolved"
            );

            if report.interrupted {
                slots.iter_mut().for_each(Slot::retire);
                break;
            }
        }

        for slot in slots.iter_mut() {
            slot.resume_tx = None;
            if let Some(task) = slot.task.take() {
                match task.await {
                    Ok(stats) => report.producers.push(stats),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!(error = %e, "Producer task panicked"),
                }
            }
        }

        report
    }
}

/// Next step event, or `None` once the round deadline passed or every sender is gone
async fn recv_before(
    events_rx: &mut mpsc::Receiver<StepEvent>,
    deadline: Option<tokio::time::Instant>,
) -> Option<StepEvent> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, events_rx.recv())
            .await
            .unwrap_or(None),
        None => events_rx.recv().await,
    }
}

/// Keep an event only if its producer is awaited in the current round
///
/// A laggard retired in an earlier round may still deliver its late event;
/// its step already has a stub record, so the event is discarded.
pub(super) fn accept(
    event: StepEvent,
    awaiting: &mut BTreeSet<usize>,
    events: &mut [Option<StepEvent>],
) {
    if !awaiting.remove(&event.producer) {
        tracing::debug!(producer = event.producer, "Discarding event from a retired producer");
        return;
    }
    if let Some(entry) = events.get_mut(event.producer) {
        *entry = Some(event);
    }
}

/// Resolves when shutdown is signalled; never resolves once the sender is gone
async fn shutdown_signal(shutdown: &mut broadcast::Receiver<()>) {
    loop {
        match shutdown.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
