//! Lifecycle of a sampling run
//!
//! The coordinator resolves pods once, spawns one aggregator per pod and one
//! sampler per (pod, metric kind), and owns the only cancellation scope they
//! share. Shutdown runs in a fixed order under one deadline: cancel the
//! samplers, finalize every aggregator, then let the reporter write its last
//! table and close the sink.

mod signal;

pub use signal::{spawn_signal_listener, ShutdownTrigger};

use crate::collector::{
    Aggregator, AggregatorHandle, EntityDiscovery, MetricsProvider, Sampler, SamplerExit,
    SamplerSettings,
};
use crate::config::SpyConfig;
use crate::error::{DiscoveryError, ShutdownTimeoutError, SpyError, WriteError};
use crate::models::{Entity, EntityReport, MetricKind};
use crate::observability::{SamplingStats, SpyMetrics, StructuredLogger};
use crate::report::{render_table, RenderMode, ReportSink, Reporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a run that shut down within its budget
#[derive(Debug)]
pub struct RunSummary {
    /// Final reports in discovery order
    pub reports: Vec<EntityReport>,
    /// The last table the reporter rendered
    pub table: String,
    /// Streams that stopped after repeated fetch failures
    pub degraded: Vec<(Entity, MetricKind)>,
    /// Output failure, if the sink could not be written
    pub write_error: Option<WriteError>,
    pub stats: SamplingStats,
}

pub struct Coordinator {
    discovery: Arc<dyn EntityDiscovery>,
    provider: Arc<dyn MetricsProvider>,
    config: SpyConfig,
    metrics: SpyMetrics,
    logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(
        discovery: Arc<dyn EntityDiscovery>,
        provider: Arc<dyn MetricsProvider>,
        config: SpyConfig,
    ) -> Self {
        let logger = StructuredLogger::new(config.namespace());
        Self {
            discovery,
            provider,
            config,
            metrics: SpyMetrics::new(),
            logger,
        }
    }

    /// Counters for this run
    pub fn metrics(&self) -> &SpyMetrics {
        &self.metrics
    }

    /// Run until SIGINT or SIGTERM, or until the configured duration elapses
    pub async fn run(self) -> Result<RunSummary, SpyError> {
        let trigger = ShutdownTrigger::new(CancellationToken::new(), self.logger.clone());
        let listener = spawn_signal_listener(trigger.clone()).map_err(SpyError::Signals)?;

        let result = self.run_with_trigger(trigger).await;
        listener.abort();
        result
    }

    /// Run until `shutdown` is cancelled, writing to the configured sink
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<RunSummary, SpyError> {
        let trigger = ShutdownTrigger::new(shutdown, self.logger.clone());
        self.run_with_trigger(trigger).await
    }

    /// Run until `shutdown` is cancelled, writing to `sink`
    pub async fn run_until_with<W>(
        self,
        sink: W,
        target: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Result<RunSummary, SpyError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let entities = self.prepare().await?;
        let trigger = ShutdownTrigger::new(shutdown, self.logger.clone());
        self.sample(entities, sink, target.into(), None, trigger)
            .await
    }

    async fn run_with_trigger(self, trigger: ShutdownTrigger) -> Result<RunSummary, SpyError> {
        let entities = self.prepare().await?;

        let sink = match &self.config.output_path {
            Some(path) => ReportSink::File(path.clone()),
            None => ReportSink::Stdout,
        };
        match sink.open().await {
            Ok(writer) => {
                self.sample(entities, writer, sink.target(), None, trigger)
                    .await
            }
            Err(error) => {
                warn!(target_sink = %sink.target(), error = %error, "Output unavailable, sampling without a sink");
                self.sample(entities, tokio::io::sink(), sink.target(), Some(error), trigger)
                    .await
            }
        }
    }

    /// Validate the configuration and resolve the pods to sample
    async fn prepare(&self) -> Result<Vec<Entity>, SpyError> {
        self.config.validate()?;

        let namespace = self.config.namespace();
        let entities = self
            .discovery
            .list_entities(namespace, self.config.entity_filter.as_deref())
            .await?;

        if entities.is_empty() {
            return Err(DiscoveryError::NoEntities {
                namespace: namespace.to_string(),
            }
            .into());
        }
        Ok(entities)
    }

    async fn sample<W>(
        self,
        entities: Vec<Entity>,
        sink: W,
        target: String,
        open_error: Option<WriteError>,
        trigger: ShutdownTrigger,
    ) -> Result<RunSummary, SpyError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.config;
        let scope = trigger.token().clone();
        let settings = SamplerSettings {
            poll_interval: config.poll_interval,
            fetch_timeout: config.fetch_timeout,
            max_consecutive_failures: config.max_consecutive_failures,
        };
        self.logger.log_run_started(
            entities.len(),
            config.live_refresh,
            config.poll_interval.as_secs(),
        );

        let (reports_tx, reports_rx) = mpsc::channel(entities.len());
        let mut aggregators = JoinSet::new();
        let mut samplers = JoinSet::new();
        let mut handles: Vec<AggregatorHandle> = Vec::with_capacity(entities.len());

        for entity in entities {
            let entity = Arc::new(entity);
            let (aggregator, handle) = Aggregator::new(
                entity.clone(),
                reports_tx.clone(),
                self.metrics.clone(),
                self.logger.clone(),
            );
            aggregators.spawn(aggregator.run());

            for kind in MetricKind::ALL {
                let sampler = Sampler::new(
                    entity.clone(),
                    kind,
                    self.provider.clone(),
                    handle.sample_sender(),
                    settings,
                    self.metrics.clone(),
                    self.logger.clone(),
                );
                let cancel = scope.clone();
                let entity = entity.clone();
                samplers.spawn(async move {
                    let exit = sampler.run(cancel).await;
                    (entity, kind, exit)
                });
            }
            handles.push(handle);
        }
        drop(reports_tx);

        let mode = if config.live_refresh {
            RenderMode::Live {
                redraw_interval: config.redraw_interval,
            }
        } else {
            RenderMode::Batch
        };
        let readers = handles.iter().map(AggregatorHandle::reader).collect();
        let reporter = Reporter::new(sink, target, mode, readers, self.metrics.clone());
        let (close_tx, close_rx) = oneshot::channel();
        let mut reporter_task = tokio::spawn(reporter.run(reports_rx, scope.clone(), close_rx));

        // Sampling phase
        let mut degraded = Vec::new();
        let run_deadline = config.run_for.map(|run_for| Instant::now() + run_for);
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = deadline(run_deadline) => {
                    trigger.trigger("run duration elapsed");
                    break;
                }
                joined = samplers.join_next() => match joined {
                    Some(Ok((entity, kind, exit))) => record_exit(&mut degraded, entity, kind, exit),
                    Some(Err(e)) => warn!(error = %e, "Sampler task failed"),
                    None => {
                        trigger.trigger("all metric streams degraded");
                        break;
                    }
                },
            }
        }
        trigger.trigger("shutdown token cancelled");

        // Finalization phase
        let shutdown_deadline = Instant::now() + config.shutdown_timeout;
        let mut pending = PendingFinalizations::new(handles.iter().map(|h| (**h.entity()).clone()));
        let mut finalizations = JoinSet::new();
        for handle in &handles {
            let handle = handle.clone();
            finalizations.spawn(async move {
                let finalization = handle.finalize().await;
                ((**handle.entity()).clone(), finalization)
            });
        }

        while let Ok(Some(joined)) = timeout_at(shutdown_deadline, finalizations.join_next()).await {
            match joined {
                Ok((entity, finalization)) if finalization.is_acknowledged() => {
                    pending.acknowledge(&entity);
                }
                Ok((entity, _)) => warn!(entity = %entity, "Aggregator stopped without finalizing"),
                Err(e) => warn!(error = %e, "Finalize task failed"),
            }
        }
        finalizations.abort_all();

        while let Ok(Some(joined)) = timeout_at(shutdown_deadline, samplers.join_next()).await {
            if let Ok((entity, kind, exit)) = joined {
                record_exit(&mut degraded, entity, kind, exit);
            }
        }
        samplers.abort_all();

        while let Ok(Some(joined)) = timeout_at(shutdown_deadline, aggregators.join_next()).await {
            if let Ok(state) = joined {
                debug!(state = ?state, "Aggregator stopped");
            }
        }
        aggregators.abort_all();

        // Reporting phase
        let _ = close_tx.send(());
        let (reports, table, write_error) =
            match timeout(config.shutdown_timeout, &mut reporter_task).await {
                Ok(Ok(outcome)) => (outcome.reports, outcome.table, outcome.write_error),
                Ok(Err(e)) => {
                    warn!(error = %e, "Reporter task failed");
                    let reports = snapshot_reports(&handles);
                    let table = render_table(&reports);
                    (reports, table, None)
                }
                Err(_) => {
                    reporter_task.abort();
                    let reports = snapshot_reports(&handles);
                    let table = render_table(&reports);
                    (reports, table, Some(WriteError::Stalled(config.shutdown_timeout)))
                }
            };

        let stats = self.metrics.stats();
        self.logger.log_run_finished(&stats);

        if let Some(error) = pending.into_error(config.shutdown_timeout) {
            self.logger.log_shutdown_timeout(&error.pending);
            return Err(error.into());
        }

        Ok(RunSummary {
            reports,
            table,
            degraded,
            write_error: open_error.or(write_error),
            stats,
        })
    }
}

fn record_exit(
    degraded: &mut Vec<(Entity, MetricKind)>,
    entity: Arc<Entity>,
    kind: MetricKind,
    exit: SamplerExit,
) {
    debug!(entity = %entity, kind = %kind, exit = ?exit, "Sampler stopped");
    if let SamplerExit::Degraded { .. } = exit {
        degraded.push(((*entity).clone(), kind));
    }
}

fn snapshot_reports(handles: &[AggregatorHandle]) -> Vec<EntityReport> {
    handles.iter().map(AggregatorHandle::snapshot).collect()
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Pods whose finalization has not been acknowledged, in discovery order
struct PendingFinalizations {
    pending: Vec<Entity>,
}

impl PendingFinalizations {
    fn new(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            pending: entities.into_iter().collect(),
        }
    }

    fn acknowledge(&mut self, entity: &Entity) {
        self.pending.retain(|pending| pending != entity);
    }

    fn into_error(self, timeout: Duration) -> Option<ShutdownTimeoutError> {
        if self.pending.is_empty() {
            return None;
        }
        Some(ShutdownTimeoutError {
            timeout,
            pending: self.pending,
        })
    }
}
