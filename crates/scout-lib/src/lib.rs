//! Pod resource sampler
//!
//! This crate provides the core functionality for:
//! - Discovering pods and fetching their CPU and memory usage
//! - Sampling every (pod, metric kind) stream concurrently
//! - De-duplicated running averages, one owner task per pod
//! - Rendering averages as a table, once or redrawn live
//! - Coordinated, signal-driven shutdown with exactly-once final reports

pub mod collector;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod observability;
pub mod report;
pub mod usage;

pub use collector::{EntityDiscovery, KubeDiscovery, KubeMetricsProvider, MetricsProvider};
pub use config::SpyConfig;
pub use coordinator::{Coordinator, RunSummary};
pub use error::{DiscoveryError, ProviderError, ProviderFetchError, SpyError, WriteError};
pub use models::*;
pub use observability::{SpyMetrics, StructuredLogger};
pub use usage::{collect_usage, PodUsage, UsageReport};
