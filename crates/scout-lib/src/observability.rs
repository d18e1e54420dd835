//! Observability for the sampling run
//!
//! Provides:
//! - Prometheus counters for samples, fetch failures and redraws
//! - Structured logging of run events with tracing

use crate::error::ProviderFetchError;
use crate::models::{Entity, EntityReport, MetricKind};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Histogram buckets for provider fetch latency (in seconds)
const FETCH_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

struct SpyMetricsInner {
    registry: Registry,
    samples: IntCounterVec,
    fetch_errors: IntCounterVec,
    degraded_streams: IntGauge,
    fetch_latency_seconds: Histogram,
    redraws: IntCounter,
}

impl SpyMetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let samples = IntCounterVec::new(
            Opts::new("scout_samples_total", "Samples received by aggregators"),
            &["kind", "outcome"],
        )
        .expect("Failed to create samples_total");
        let fetch_errors = IntCounterVec::new(
            Opts::new("scout_fetch_errors_total", "Failed provider fetches"),
            &["kind"],
        )
        .expect("Failed to create fetch_errors_total");
        let degraded_streams = IntGauge::new(
            "scout_degraded_streams",
            "Streams that stopped polling after repeated failures",
        )
        .expect("Failed to create degraded_streams");
        let fetch_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "scout_fetch_latency_seconds",
                "Time spent in a single provider fetch",
            )
            .buckets(FETCH_LATENCY_BUCKETS.to_vec()),
        )
        .expect("Failed to create fetch_latency_seconds");
        let redraws = IntCounter::new("scout_redraws_total", "Tables rendered by the reporter")
            .expect("Failed to create redraws_total");

        registry
            .register(Box::new(samples.clone()))
            .expect("Failed to register samples_total");
        registry
            .register(Box::new(fetch_errors.clone()))
            .expect("Failed to register fetch_errors_total");
        registry
            .register(Box::new(degraded_streams.clone()))
            .expect("Failed to register degraded_streams");
        registry
            .register(Box::new(fetch_latency_seconds.clone()))
            .expect("Failed to register fetch_latency_seconds");
        registry
            .register(Box::new(redraws.clone()))
            .expect("Failed to register redraws_total");

        Self {
            registry,
            samples,
            fetch_errors,
            degraded_streams,
            fetch_latency_seconds,
            redraws,
        }
    }
}

/// Sample outcome label values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Accepted,
    Duplicate,
    /// Arrived after the aggregator finalized
    Rejected,
}

impl SampleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SampleOutcome::Accepted => "accepted",
            SampleOutcome::Duplicate => "duplicate",
            SampleOutcome::Rejected => "rejected",
        }
    }
}

/// Metrics for one sampling run
///
/// Each run owns its registry. Clones share the same counters.
#[derive(Clone)]
pub struct SpyMetrics {
    inner: Arc<SpyMetricsInner>,
}

impl Default for SpyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SpyMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SpyMetricsInner::new()),
        }
    }

    /// Every metric of this run in the Prometheus text exposition format
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_sample(&self, kind: MetricKind, outcome: SampleOutcome) {
        self.inner
            .samples
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn inc_fetch_errors(&self, kind: MetricKind) {
        self.inner
            .fetch_errors
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn inc_degraded_streams(&self) {
        self.inner.degraded_streams.inc();
    }

    pub fn observe_fetch_latency(&self, duration_secs: f64) {
        self.inner.fetch_latency_seconds.observe(duration_secs);
    }

    pub fn inc_redraws(&self) {
        self.inner.redraws.inc();
    }

    /// Point-in-time totals for the run summary
    pub fn stats(&self) -> SamplingStats {
        let sum_outcome = |outcome: SampleOutcome| -> u64 {
            MetricKind::ALL
                .iter()
                .map(|kind| {
                    self.inner
                        .samples
                        .with_label_values(&[kind.as_str(), outcome.as_str()])
                        .get()
                })
                .sum()
        };

        SamplingStats {
            accepted: sum_outcome(SampleOutcome::Accepted),
            duplicates: sum_outcome(SampleOutcome::Duplicate),
            rejected: sum_outcome(SampleOutcome::Rejected),
            fetch_errors: MetricKind::ALL
                .iter()
                .map(|kind| {
                    self.inner
                        .fetch_errors
                        .with_label_values(&[kind.as_str()])
                        .get()
                })
                .sum(),
            degraded_streams: self.inner.degraded_streams.get().max(0) as u64,
            fetches: self.inner.fetch_latency_seconds.get_sample_count(),
            redraws: self.inner.redraws.get(),
        }
    }
}

/// Totals collected over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub fetch_errors: u64,
    pub degraded_streams: u64,
    pub fetches: u64,
    pub redraws: u64,
}

/// Structured logger for run events
///
/// Keeps event names and field sets consistent across the sampler,
/// aggregator and coordinator.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_run_started(&self, entities: usize, live: bool, poll_interval_secs: u64) {
        info!(
            event = "run_started",
            namespace = %self.namespace,
            entities = entities,
            live = live,
            poll_interval_secs = poll_interval_secs,
            "Started sampling pods"
        );
    }

    pub fn log_fetch_failure(&self, error: &ProviderFetchError, consecutive: u32) {
        warn!(
            event = "fetch_failed",
            namespace = %self.namespace,
            pod = %error.entity.name,
            kind = %error.kind,
            consecutive_failures = consecutive,
            error = %error.source,
            "Failed to fetch usage, skipping tick"
        );
    }

    pub fn log_stream_degraded(&self, entity: &Entity, kind: MetricKind, failures: u32) {
        warn!(
            event = "stream_degraded",
            namespace = %self.namespace,
            pod = %entity.name,
            kind = %kind,
            consecutive_failures = failures,
            "Stopped polling after repeated failures"
        );
    }

    pub fn log_finalized(&self, report: &EntityReport) {
        debug!(
            event = "entity_finalized",
            namespace = %self.namespace,
            pod = %report.entity.name,
            cpu_average = report.cpu_average,
            memory_average = report.memory_average,
            samples = report.sample_count(),
            "Finalized pod report"
        );
    }

    pub fn log_shutdown_requested(&self, reason: &str) {
        info!(
            event = "shutdown_requested",
            namespace = %self.namespace,
            reason = %reason,
            "Stopping samplers"
        );
    }

    pub fn log_shutdown_timeout(&self, pending: &[Entity]) {
        warn!(
            event = "shutdown_timeout",
            namespace = %self.namespace,
            pending = pending.len(),
            "Finalization did not complete for every pod"
        );
    }

    pub fn log_run_finished(&self, stats: &SamplingStats) {
        info!(
            event = "run_finished",
            namespace = %self.namespace,
            accepted = stats.accepted,
            duplicates = stats.duplicates,
            fetch_errors = stats.fetch_errors,
            degraded_streams = stats.degraded_streams,
            "Sampling run finished"
        );
    }
}
