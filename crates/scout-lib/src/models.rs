//! Core data models for the resource sampler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A monitored workload (pod), resolved once by discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub namespace: String,
}

impl Entity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource dimension tracked per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Cpu, MetricKind::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }

    /// Sum this kind's value over every container of an entity
    pub fn total(&self, usage: &[ContainerUsage]) -> f64 {
        usage
            .iter()
            .map(|container| match self {
                MetricKind::Cpu => container.cpu,
                MetricKind::Memory => container.memory,
            })
            .sum()
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One container row returned by a metrics provider
///
/// `cpu` and `memory` are percentages of the container's limits (0 when the
/// container has no limit). The raw values they were derived from are kept
/// for the one-shot usage view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub container_name: String,
    pub cpu: f64,
    pub memory: f64,
    pub cpu_millicores: f64,
    pub memory_bytes: f64,
}

impl ContainerUsage {
    /// Container row with percentages only
    pub fn percentages(container_name: impl Into<String>, cpu: f64, memory: f64) -> Self {
        Self {
            container_name: container_name.into(),
            cpu,
            memory,
            cpu_millicores: 0.0,
            memory_bytes: 0.0,
        }
    }
}

/// A raw reading forwarded from a sampler to its entity's aggregator
#[derive(Debug, Clone)]
pub struct UsageSample {
    pub entity: Arc<Entity>,
    pub kind: MetricKind,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// Incrementally maintained mean over de-duplicated samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
    count: u64,
    sum: f64,
    last: Option<f64>,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a raw value into the average.
    ///
    /// A value equal to the last accepted one is a cached reading from the
    /// metrics source and is discarded. Returns whether the value was accepted.
    pub fn fold(&mut self, value: f64) -> bool {
        if self.last == Some(value) {
            return false;
        }

        self.count += 1;
        self.sum += value;
        self.last = Some(value);
        true
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

/// Aggregated view of one entity, rendered as a table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: Entity,
    pub cpu_average: f64,
    pub memory_average: f64,
    pub cpu_samples: u64,
    pub memory_samples: u64,
    pub finalized: bool,
}

impl EntityReport {
    /// Report for an entity with no accepted samples yet
    pub fn empty(entity: Entity) -> Self {
        Self {
            entity,
            cpu_average: 0.0,
            memory_average: 0.0,
            cpu_samples: 0,
            memory_samples: 0,
            finalized: false,
        }
    }

    pub fn from_averages(
        entity: Entity,
        cpu: &RunningAverage,
        memory: &RunningAverage,
        finalized: bool,
    ) -> Self {
        Self {
            entity,
            cpu_average: cpu.average(),
            memory_average: memory.average(),
            cpu_samples: cpu.count(),
            memory_samples: memory.count(),
            finalized,
        }
    }

    /// Accepted samples across both metric kinds
    pub fn sample_count(&self) -> u64 {
        self.cpu_samples + self.memory_samples
    }
}
