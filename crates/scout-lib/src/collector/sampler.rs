//! Per-stream sampling loop
//!
//! One sampler polls the metrics provider for a single (pod, metric kind)
//! pair and forwards each reading to the pod's aggregator.

use super::{MetricsProvider, SampleSender};
use crate::error::{ProviderError, ProviderFetchError};
use crate::models::{Entity, MetricKind, UsageSample};
use crate::observability::{SpyMetrics, StructuredLogger};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Timing and failure policy shared by every sampler in a run
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    /// Wait between fetches
    pub poll_interval: Duration,
    /// Upper bound on one provider call
    pub fetch_timeout: Duration,
    /// Consecutive failures before the stream is given up
    pub max_consecutive_failures: u32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
        }
    }
}

/// Why a sampler stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerExit {
    /// The run scope was cancelled
    Cancelled,
    /// Too many consecutive fetch failures
    Degraded { consecutive_failures: u32 },
    /// The aggregator finalized and refuses further samples
    AggregatorClosed,
}

/// Poller for one (pod, metric kind) stream
pub struct Sampler {
    entity: Arc<Entity>,
    kind: MetricKind,
    provider: Arc<dyn MetricsProvider>,
    sender: SampleSender,
    settings: SamplerSettings,
    metrics: SpyMetrics,
    logger: StructuredLogger,
}

impl Sampler {
    pub fn new(
        entity: Arc<Entity>,
        kind: MetricKind,
        provider: Arc<dyn MetricsProvider>,
        sender: SampleSender,
        settings: SamplerSettings,
        metrics: SpyMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            entity,
            kind,
            provider,
            sender,
            settings,
            metrics,
            logger,
        }
    }

    /// Poll until cancelled or degraded.
    ///
    /// A fetch that is already in flight when `cancel` fires is allowed to
    /// finish, but its value is dropped.
    pub async fn run(self, cancel: CancellationToken) -> SamplerExit {
        debug!(entity = %self.entity, kind = %self.kind, "Starting sampler");
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return SamplerExit::Cancelled;
            }

            let result = self.fetch().await;

            if cancel.is_cancelled() {
                return SamplerExit::Cancelled;
            }

            match result {
                Ok(value) => {
                    consecutive_failures = 0;
                    let sample = UsageSample {
                        entity: self.entity.clone(),
                        kind: self.kind,
                        value,
                        observed_at: Utc::now(),
                    };

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return SamplerExit::Cancelled,
                        sent = self.sender.send(sample) => {
                            if sent.is_err() {
                                return SamplerExit::AggregatorClosed;
                            }
                        }
                    }
                }
                Err(source) => {
                    consecutive_failures += 1;
                    self.metrics.inc_fetch_errors(self.kind);

                    let error = ProviderFetchError {
                        entity: (*self.entity).clone(),
                        kind: self.kind,
                        source,
                    };
                    self.logger.log_fetch_failure(&error, consecutive_failures);

                    if consecutive_failures >= self.settings.max_consecutive_failures {
                        self.metrics.inc_degraded_streams();
                        self.logger.log_stream_degraded(
                            &self.entity,
                            self.kind,
                            consecutive_failures,
                        );
                        return SamplerExit::Degraded {
                            consecutive_failures,
                        };
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SamplerExit::Cancelled,
                _ = sleep(self.settings.poll_interval) => {}
            }
        }
    }

    /// One bounded provider call reduced to this stream's value
    async fn fetch(&self) -> Result<f64, ProviderError> {
        let start = Instant::now();
        let result = timeout(
            self.settings.fetch_timeout,
            self.provider.fetch_usage(&self.entity),
        )
        .await;
        self.metrics
            .observe_fetch_latency(start.elapsed().as_secs_f64());

        let usage = result.map_err(|_| ProviderError::Timeout(self.settings.fetch_timeout))??;
        let value = self.kind.total(&usage);
        if !value.is_finite() {
            return Err(ProviderError::NonFinite);
        }
        Ok(value)
    }
}
