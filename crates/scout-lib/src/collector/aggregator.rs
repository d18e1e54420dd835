//! Per-pod aggregation
//!
//! Each pod has exactly one aggregator task owning its running averages.
//! Samplers send samples into its mailbox; readers observe the latest
//! report through a watch channel without touching the averaging state.

use crate::models::{Entity, EntityReport, MetricKind, RunningAverage, UsageSample};
use crate::observability::{SampleOutcome, SpyMetrics, StructuredLogger};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Mailbox capacity per aggregator
const MAILBOX_SIZE: usize = 64;

/// Lifecycle of one pod's sampling task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Idle,
    Sampling,
    Finalizing,
    Done,
}

/// Result of asking an aggregator to finalize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// This request emitted the final report
    Emitted,
    /// An earlier request already emitted it
    AlreadyFinalized,
    /// The aggregator task is gone without acknowledging
    Unreachable,
}

impl Finalization {
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, Finalization::Unreachable)
    }
}

enum Command {
    Sample(UsageSample),
    Finalize { ack: oneshot::Sender<Finalization> },
}

/// Owner of one pod's averaging state
pub struct Aggregator {
    entity: Arc<Entity>,
    cpu: RunningAverage,
    memory: RunningAverage,
    state: EntityState,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<EntityReport>,
    reports: mpsc::Sender<EntityReport>,
    metrics: SpyMetrics,
    logger: StructuredLogger,
}

impl Aggregator {
    /// Create an aggregator and the handle used to feed and finalize it.
    ///
    /// The final report is sent on `reports` exactly once.
    pub fn new(
        entity: Arc<Entity>,
        reports: mpsc::Sender<EntityReport>,
        metrics: SpyMetrics,
        logger: StructuredLogger,
    ) -> (Self, AggregatorHandle) {
        let (commands_tx, commands) = mpsc::channel(MAILBOX_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(EntityReport::empty((*entity).clone()));

        let aggregator = Self {
            entity: entity.clone(),
            cpu: RunningAverage::new(),
            memory: RunningAverage::new(),
            state: EntityState::Idle,
            commands,
            snapshot_tx,
            reports,
            metrics,
            logger,
        };
        let handle = AggregatorHandle {
            entity,
            commands: commands_tx,
            snapshot: snapshot_rx,
        };

        (aggregator, handle)
    }

    /// Run until finalized, returning the terminal state
    pub async fn run(mut self) -> EntityState {
        self.transition(EntityState::Sampling);

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Sample(sample) => self.fold(sample),
                Command::Finalize { ack } => {
                    self.finalize().await;
                    let _ = ack.send(Finalization::Emitted);
                    break;
                }
            }
        }

        // Anything still queued raced the finalize request and loses
        self.commands.close();
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Sample(sample) => {
                    self.metrics
                        .record_sample(sample.kind, SampleOutcome::Rejected);
                }
                Command::Finalize { ack } => {
                    let _ = ack.send(Finalization::AlreadyFinalized);
                }
            }
        }

        if self.state != EntityState::Done {
            debug!(entity = %self.entity, "Aggregator mailbox closed before finalization");
        }
        self.state
    }

    fn fold(&mut self, sample: UsageSample) {
        debug_assert_eq!(*sample.entity, *self.entity);

        let average = match sample.kind {
            MetricKind::Cpu => &mut self.cpu,
            MetricKind::Memory => &mut self.memory,
        };
        let outcome = if average.fold(sample.value) {
            SampleOutcome::Accepted
        } else {
            SampleOutcome::Duplicate
        };
        self.metrics.record_sample(sample.kind, outcome);

        if outcome == SampleOutcome::Accepted {
            let report = self.report(false);
            self.snapshot_tx.send_replace(report);
        }
    }

    async fn finalize(&mut self) {
        self.transition(EntityState::Finalizing);

        let report = self.report(true);
        self.snapshot_tx.send_replace(report.clone());
        self.logger.log_finalized(&report);

        if self.reports.send(report).await.is_err() {
            warn!(entity = %self.entity, "Reporter closed before final report was delivered");
        }

        self.transition(EntityState::Done);
    }

    fn report(&self, finalized: bool) -> EntityReport {
        EntityReport::from_averages((*self.entity).clone(), &self.cpu, &self.memory, finalized)
    }

    fn transition(&mut self, next: EntityState) {
        debug!(entity = %self.entity, from = ?self.state, to = ?next, "Entity state change");
        self.state = next;
    }
}

/// Handle for feeding, reading and finalizing one aggregator
#[derive(Clone)]
pub struct AggregatorHandle {
    entity: Arc<Entity>,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EntityReport>,
}

impl AggregatorHandle {
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Latest report, without waiting on the aggregator
    pub fn snapshot(&self) -> EntityReport {
        self.snapshot.borrow().clone()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            snapshot: self.snapshot.clone(),
        }
    }

    pub fn sample_sender(&self) -> SampleSender {
        SampleSender {
            commands: self.commands.clone(),
        }
    }

    /// Ask the aggregator to finalize and wait for its acknowledgement
    pub async fn finalize(&self) -> Finalization {
        let (ack, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Finalize { ack })
            .await
            .is_err()
        {
            return Finalization::Unreachable;
        }
        ack_rx.await.unwrap_or(Finalization::Unreachable)
    }
}

/// Read-only view of an aggregator's latest report
#[derive(Clone)]
pub struct SnapshotReader {
    snapshot: watch::Receiver<EntityReport>,
}

impl SnapshotReader {
    pub fn snapshot(&self) -> EntityReport {
        self.snapshot.borrow().clone()
    }

    /// Wait until the latest report satisfies `predicate`.
    /// Returns `None` if the aggregator is gone first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&EntityReport) -> bool,
    ) -> Option<EntityReport> {
        self.snapshot
            .wait_for(predicate)
            .await
            .ok()
            .map(|report| report.clone())
    }
}

/// Sending side of an aggregator's mailbox, held by samplers
#[derive(Clone)]
pub struct SampleSender {
    commands: mpsc::Sender<Command>,
}

impl SampleSender {
    /// Queue a sample. Fails once the aggregator has finalized.
    pub async fn send(&self, sample: UsageSample) -> Result<(), mpsc::error::SendError<()>> {
        self.commands
            .send(Command::Sample(sample))
            .await
            .map_err(|_| mpsc::error::SendError(()))
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn setup(name: &str) -> (Aggregator, AggregatorHandle, mpsc::Receiver<EntityReport>) {
        let (reports_tx, reports_rx) = mpsc::channel(4);
        let entity = Arc::new(Entity::new(name, "default"));
        let (aggregator, handle) = Aggregator::new(
            entity,
            reports_tx,
            SpyMetrics::new(),
            StructuredLogger::new("default"),
        );
        (aggregator, handle, reports_rx)
    }

    fn sample(handle: &AggregatorHandle, kind: MetricKind, value: f64) -> UsageSample {
        UsageSample {
            entity: handle.entity().clone(),
            kind,
            value,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_aggregator_folds_interleaved_streams() {
        let (aggregator, handle, mut reports) = setup("pod-b");
        let task = tokio::spawn(aggregator.run());
        let sender = handle.sample_sender();

        for (kind, value) in [
            (MetricKind::Cpu, 4.0),
            (MetricKind::Memory, 10.0),
            (MetricKind::Cpu, 4.0),
            (MetricKind::Memory, 20.0),
            (MetricKind::Cpu, 6.0),
        ] {
            sender.send(sample(&handle, kind, value)).await.unwrap();
        }

        assert_eq!(handle.finalize().await, Finalization::Emitted);
        assert_eq!(task.await.unwrap(), EntityState::Done);

        let report = reports.recv().await.unwrap();
        assert!(report.finalized);
        assert_eq!(report.cpu_average, 5.0);
        assert_eq!(report.cpu_samples, 2);
        assert_eq!(report.memory_average, 15.0);
        assert_eq!(report.memory_samples, 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_not_final() {
        let (aggregator, handle, _reports) = setup("pod-a");
        let task = tokio::spawn(aggregator.run());

        assert_eq!(handle.snapshot(), EntityReport::empty(Entity::new("pod-a", "default")));

        handle
            .sample_sender()
            .send(sample(&handle, MetricKind::Cpu, 2.5))
            .await
            .unwrap();

        // Wait for the owner to publish the fold
        handle
            .reader()
            .wait_for(|report| report.cpu_samples == 1)
            .await
            .unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.cpu_average, 2.5);
        assert!(!snapshot.finalized);

        handle.finalize().await;
        task.await.unwrap();
        assert!(handle.reader().snapshot().finalized);
    }

    #[tokio::test]
    async fn test_finalize_is_single_shot_under_concurrency() {
        let (aggregator, handle, mut reports) = setup("pod-a");
        let task = tokio::spawn(aggregator.run());

        let sender = handle.sample_sender();
        let racing_sampler = {
            let handle = handle.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let s = sample(&handle, MetricKind::Cpu, i as f64);
                    if sender.send(s).await.is_err() {
                        break;
                    }
                }
            })
        };

        let mut finalizers = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            finalizers.push(tokio::spawn(async move { handle.finalize().await }));
        }

        let mut emitted = 0;
        for f in finalizers {
            match f.await.unwrap() {
                Finalization::Emitted => emitted += 1,
                Finalization::AlreadyFinalized | Finalization::Unreachable => {}
            }
        }
        racing_sampler.await.unwrap();
        assert_eq!(task.await.unwrap(), EntityState::Done);

        assert_eq!(emitted, 1);
        assert!(reports.recv().await.unwrap().finalized);
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_samples_after_finalize_are_refused() {
        let (aggregator, handle, mut reports) = setup("pod-a");
        let task = tokio::spawn(aggregator.run());

        handle.finalize().await;
        task.await.unwrap();

        let sender = handle.sample_sender();
        assert!(sender.is_closed());
        assert!(sender
            .send(sample(&handle, MetricKind::Memory, 1.0))
            .await
            .is_err());
        assert_eq!(handle.finalize().await, Finalization::Unreachable);

        let report = reports.recv().await.unwrap();
        assert_eq!(report.sample_count(), 0);
        assert_eq!(report.cpu_average, 0.0);
    }
}
