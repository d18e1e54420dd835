//! Pod discovery and usage sampling
//!
//! This module defines the two collaborator seams of the sampler (entity
//! discovery and the metrics provider), their Kubernetes implementations,
//! and the per-stream sampler and per-pod aggregator tasks.

mod aggregator;
mod kube;
mod quantity;
mod sampler;


pub use self::kube::{KubeDiscovery, KubeMetricsProvider};
pub use aggregator::{
    Aggregator, AggregatorHandle, EntityState, Finalization, SampleSender, SnapshotReader,
};
pub use quantity::{parse_cpu_millicores, parse_memory_bytes, percentage};
pub use sampler::{Sampler, SamplerExit, SamplerSettings};

use crate::error::{DiscoveryError, ProviderError};
use crate::models::{ContainerUsage, Entity};

pub use async_trait::async_trait;

/// Resolves the pods a run samples
#[async_trait]
pub trait EntityDiscovery: Send + Sync {
    /// List pods in `namespace`, or just `name_filter` when given.
    /// Order is preserved through to the rendered table.
    async fn list_entities(
        &self,
        namespace: &str,
        name_filter: Option<&str>,
    ) -> Result<Vec<Entity>, DiscoveryError>;
}

/// Source of per-container usage readings
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Fetch the current usage of every container in `entity`
    async fn fetch_usage(&self, entity: &Entity) -> Result<Vec<ContainerUsage>, ProviderError>;
}
