//! One-shot resource usage view
//!
//! Fetches the current usage of every pod once, concurrently, without the
//! averaging machinery of a sampling run.

use crate::collector::{EntityDiscovery, MetricsProvider};
use crate::error::{DiscoveryError, ProviderError};
use crate::models::{ContainerUsage, Entity, MetricKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::warn;

/// Current usage of one pod, summed over its containers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodUsage {
    pub entity: Entity,
    pub cpu_millicores: f64,
    pub cpu_percent: f64,
    pub memory_bytes: f64,
    pub memory_percent: f64,
}

impl PodUsage {
    pub fn from_containers(entity: Entity, containers: &[ContainerUsage]) -> Self {
        Self {
            entity,
            cpu_millicores: containers.iter().map(|c| c.cpu_millicores).sum(),
            cpu_percent: MetricKind::Cpu.total(containers),
            memory_bytes: containers.iter().map(|c| c.memory_bytes).sum(),
            memory_percent: MetricKind::Memory.total(containers),
        }
    }
}

#[derive(Debug, Default)]
pub struct UsageReport {
    /// Pods that answered, in discovery order
    pub rows: Vec<PodUsage>,
    /// Pods whose fetch failed; they are left out of `rows`
    pub failures: Vec<(Entity, ProviderError)>,
}

/// Fetch the usage of every pod in `namespace` once.
///
/// A pod whose metrics cannot be fetched is reported in `failures` and does
/// not fail the others.
pub async fn collect_usage(
    discovery: Arc<dyn EntityDiscovery>,
    provider: Arc<dyn MetricsProvider>,
    namespace: &str,
    name_filter: Option<&str>,
    fetch_timeout: Duration,
) -> Result<UsageReport, DiscoveryError> {
    let entities = discovery.list_entities(namespace, name_filter).await?;
    if entities.is_empty() {
        return Err(DiscoveryError::NoEntities {
            namespace: namespace.to_string(),
        });
    }

    let mut fetches = JoinSet::new();
    for (index, entity) in entities.into_iter().enumerate() {
        let provider = provider.clone();
        fetches.spawn(async move {
            let result = match timeout(fetch_timeout, provider.fetch_usage(&entity)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(fetch_timeout)),
            };
            (index, entity, result)
        });
    }

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok((index, entity, Ok(containers))) => {
                rows.push((index, PodUsage::from_containers(entity, &containers)));
            }
            Ok((index, entity, Err(source))) => {
                warn!(entity = %entity, error = %source, "Failed to fetch pod usage");
                failures.push((index, (entity, source)));
            }
            Err(e) => warn!(error = %e, "Usage fetch task failed"),
        }
    }

    rows.sort_by_key(|(index, _)| *index);
    failures.sort_by_key(|(index, _)| *index);

    Ok(UsageReport {
        rows: rows.into_iter().map(|(_, row)| row).collect(),
        failures: failures.into_iter().map(|(_, failure)| failure).collect(),
    })
}
