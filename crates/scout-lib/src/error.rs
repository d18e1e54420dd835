//! Error types for the sampling run

use crate::models::{Entity, MetricKind};
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to resolve the set of target entities. Fatal for the run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to list pods in namespace '{namespace}'")]
    Backend {
        namespace: String,
        #[source]
        source: BoxError,
    },

    #[error("pod '{name}' not found in namespace '{namespace}'")]
    NotFound { name: String, namespace: String },

    #[error("no pods found in namespace '{namespace}'")]
    NoEntities { namespace: String },
}

/// Failure reported by a metrics provider for a single fetch
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("metrics API request failed")]
    Api(#[source] BoxError),

    #[error("malformed metrics payload: {0}")]
    Malformed(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned a non-finite value")]
    NonFinite,
}

/// A provider failure tagged with the stream it happened on
#[derive(Debug, Error)]
#[error("failed to fetch {kind} usage for {entity}")]
pub struct ProviderFetchError {
    pub entity: Entity,
    pub kind: MetricKind,
    #[source]
    pub source: ProviderError,
}

/// Failure of the reporter's output sink
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to open output '{target}'")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to '{target}'")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reporter did not finish within {0:?}")]
    Stalled(Duration),
}

/// Finalization did not complete within the shutdown budget
#[derive(Debug, Error)]
#[error("shutdown did not complete within {timeout:?}; pending entities: {}", format_pending(.pending))]
pub struct ShutdownTimeoutError {
    pub timeout: Duration,
    pub pending: Vec<Entity>,
}

fn format_pending(pending: &[Entity]) -> String {
    pending
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that end a sampling run
#[derive(Debug, Error)]
pub enum SpyError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    ShutdownTimeout(#[from] ShutdownTimeoutError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to install signal handlers")]
    Signals(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_timeout_names_pending_entities() {
        let err = ShutdownTimeoutError {
            timeout: Duration::from_secs(10),
            pending: vec![Entity::new("a", "default"), Entity::new("b", "prod")],
        };

        let message = err.to_string();
        assert!(message.contains("default/a, prod/b"));
        assert!(message.contains("10s"));
    }

    #[test]
    fn test_provider_fetch_error_is_tagged() {
        let err = ProviderFetchError {
            entity: Entity::new("web-0", "default"),
            kind: MetricKind::Memory,
            source: ProviderError::Timeout(Duration::from_secs(5)),
        };

        assert_eq!(err.to_string(), "failed to fetch memory usage for default/web-0");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("fetch timed out after 5s"));
    }

    #[test]
    fn test_discovery_error_converts_into_spy_error() {
        let err: SpyError = DiscoveryError::NoEntities {
            namespace: "default".into(),
        }
        .into();
        assert!(matches!(err, SpyError::Discovery(_)));
        assert_eq!(err.to_string(), "no pods found in namespace 'default'");
    }
}
