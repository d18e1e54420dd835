//! Kubernetes-backed discovery and metrics
//!
//! Pods are listed through the core API. Usage comes from the
//! `metrics.k8s.io/v1beta1` PodMetrics resource served by metrics-server,
//! and is expressed as a percentage of each container's limits.

use super::quantity::{parse_cpu_millicores, parse_memory_bytes, percentage};
use super::{async_trait, EntityDiscovery, MetricsProvider};
use crate::error::{DiscoveryError, ProviderError};
use crate::models::{ContainerUsage, Entity};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Pod discovery through the Kubernetes API
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EntityDiscovery for KubeDiscovery {
    async fn list_entities(
        &self,
        namespace: &str,
        name_filter: Option<&str>,
    ) -> Result<Vec<Entity>, DiscoveryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let backend = |source: kube::Error| DiscoveryError::Backend {
            namespace: namespace.to_string(),
            source: Box::new(source),
        };

        if let Some(name) = name_filter {
            return match pods.get_opt(name).await.map_err(backend)? {
                Some(pod) => Ok(entity_from_pod(&pod, namespace).into_iter().collect()),
                None => Err(DiscoveryError::NotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                }),
            };
        }

        let list = pods.list(&ListParams::default()).await.map_err(backend)?;
        let entities: Vec<Entity> = list
            .items
            .iter()
            .filter_map(|pod| entity_from_pod(pod, namespace))
            .collect();

        debug!(namespace = %namespace, count = entities.len(), "Discovered pods");
        Ok(entities)
    }
}

fn entity_from_pod(pod: &Pod, namespace: &str) -> Option<Entity> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| namespace.to_string());
    Some(Entity::new(name, namespace))
}

/// Resource limits of one container, 0 when unset
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ContainerLimits {
    pub cpu_millicores: f64,
    pub memory_bytes: f64,
}

/// Container entry of a PodMetrics object
#[derive(Debug, Deserialize)]
struct PodMetricsContainer {
    name: String,
    #[serde(default)]
    usage: BTreeMap<String, String>,
}

/// Usage provider backed by metrics-server
pub struct KubeMetricsProvider {
    client: Client,
    pod_metrics: ApiResource,
    /// Container limits per pod, loaded on first fetch
    limits: RwLock<HashMap<Entity, HashMap<String, ContainerLimits>>>,
}

impl KubeMetricsProvider {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self {
            client,
            pod_metrics: ApiResource::from_gvk_with_plural(&gvk, "pods"),
            limits: RwLock::new(HashMap::new()),
        }
    }

    async fn container_limits(
        &self,
        entity: &Entity,
    ) -> Result<HashMap<String, ContainerLimits>, ProviderError> {
        if let Some(limits) = self.limits.read().await.get(entity) {
            return Ok(limits.clone());
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &entity.namespace);
        let pod = pods
            .get(&entity.name)
            .await
            .map_err(|e| ProviderError::Api(Box::new(e)))?;
        let limits = container_limits(&pod);

        self.limits
            .write()
            .await
            .insert(entity.clone(), limits.clone());
        Ok(limits)
    }
}

#[async_trait]
impl MetricsProvider for KubeMetricsProvider {
    async fn fetch_usage(&self, entity: &Entity) -> Result<Vec<ContainerUsage>, ProviderError> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &entity.namespace, &self.pod_metrics);
        let metrics = api
            .get(&entity.name)
            .await
            .map_err(|e| ProviderError::Api(Box::new(e)))?;

        let limits = self.container_limits(entity).await?;
        container_usage(&metrics.data, &limits)
    }
}

/// Limits declared in a pod spec, keyed by container name
pub(crate) fn container_limits(pod: &Pod) -> HashMap<String, ContainerLimits> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .map(|container| {
            let limits = container
                .resources
                .as_ref()
                .and_then(|resources| resources.limits.as_ref());
            let limit = |resource: &str, parse: fn(&str) -> Option<f64>| {
                limits
                    .and_then(|l| l.get(resource))
                    .and_then(|quantity| parse(&quantity.0))
                    .unwrap_or(0.0)
            };

            (
                container.name.clone(),
                ContainerLimits {
                    cpu_millicores: limit("cpu", parse_cpu_millicores),
                    memory_bytes: limit("memory", parse_memory_bytes),
                },
            )
        })
        .collect()
}

/// Turn a PodMetrics payload into per-container usage rows
pub(crate) fn container_usage(
    data: &serde_json::Value,
    limits: &HashMap<String, ContainerLimits>,
) -> Result<Vec<ContainerUsage>, ProviderError> {
    let containers = data
        .get("containers")
        .cloned()
        .ok_or_else(|| ProviderError::Malformed("missing containers".into()))?;
    let containers: Vec<PodMetricsContainer> =
        serde_json::from_value(containers).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    containers
        .into_iter()
        .map(|container| {
            let cpu_millicores = quantity(&container, "cpu", parse_cpu_millicores)?;
            let memory_bytes = quantity(&container, "memory", parse_memory_bytes)?;
            let limit = limits.get(&container.name).copied().unwrap_or_default();

            Ok(ContainerUsage {
                cpu: percentage(cpu_millicores, limit.cpu_millicores),
                memory: percentage(memory_bytes, limit.memory_bytes),
                cpu_millicores,
                memory_bytes,
                container_name: container.name,
            })
        })
        .collect()
}

fn quantity(
    container: &PodMetricsContainer,
    resource: &str,
    parse: fn(&str) -> Option<f64>,
) -> Result<f64, ProviderError> {
    match container.usage.get(resource) {
        Some(raw) => parse(raw).ok_or_else(|| {
            ProviderError::Malformed(format!(
                "invalid {} quantity '{}' for container {}",
                resource, raw, container.name
            ))
        }),
        None => Ok(0.0),
    }
}
