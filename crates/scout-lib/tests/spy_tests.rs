//! End-to-end tests for sampling runs
//!
//! These drive the coordinator against in-memory discovery and metrics
//! providers. Most run on a paused clock so every poll lands on an exact
//! interval boundary.

use scout_lib::collector::async_trait;
use scout_lib::{
    ContainerUsage, Coordinator, DiscoveryError, Entity, EntityDiscovery, MetricKind,
    MetricsProvider, ProviderError, SpyConfig, SpyError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_secs(1);

struct StaticDiscovery {
    entities: Vec<Entity>,
    calls: AtomicUsize,
}

impl StaticDiscovery {
    fn new(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            entities: names.iter().map(|n| Entity::new(*n, "default")).collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EntityDiscovery for StaticDiscovery {
    async fn list_entities(
        &self,
        _namespace: &str,
        _name_filter: Option<&str>,
    ) -> Result<Vec<Entity>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entities.clone())
    }
}

struct BrokenDiscovery;

#[async_trait]
impl EntityDiscovery for BrokenDiscovery {
    async fn list_entities(
        &self,
        namespace: &str,
        _name_filter: Option<&str>,
    ) -> Result<Vec<Entity>, DiscoveryError> {
        Err(DiscoveryError::Backend {
            namespace: namespace.to_string(),
            source: "connection refused".into(),
        })
    }
}

enum Script {
    Values { cpu: Vec<f64>, memory: Vec<f64> },
    Failing,
}

/// Serves the value scheduled for the current poll tick, repeating the
/// last one once a script runs out
struct ScriptedProvider {
    start: Instant,
    poll: Duration,
    scripts: HashMap<String, Script>,
}

impl ScriptedProvider {
    fn new(poll: Duration) -> Self {
        Self {
            start: Instant::now(),
            poll,
            scripts: HashMap::new(),
        }
    }

    fn values(mut self, pod: &str, cpu: &[f64], memory: &[f64]) -> Self {
        self.scripts.insert(
            pod.to_string(),
            Script::Values {
                cpu: cpu.to_vec(),
                memory: memory.to_vec(),
            },
        );
        self
    }

    fn failing(mut self, pod: &str) -> Self {
        self.scripts.insert(pod.to_string(), Script::Failing);
        self
    }

    fn tick(&self) -> usize {
        (self.start.elapsed().as_nanos() / self.poll.as_nanos()) as usize
    }
}

fn at(values: &[f64], tick: usize) -> f64 {
    values[tick.min(values.len() - 1)]
}

#[async_trait]
impl MetricsProvider for ScriptedProvider {
    async fn fetch_usage(&self, entity: &Entity) -> Result<Vec<ContainerUsage>, ProviderError> {
        match self.scripts.get(&entity.name) {
            Some(Script::Values { cpu, memory }) => {
                let tick = self.tick();
                Ok(vec![ContainerUsage::percentages(
                    "app",
                    at(cpu, tick),
                    at(memory, tick),
                )])
            }
            Some(Script::Failing) => Err(ProviderError::Malformed("metrics not available".into())),
            None => Err(ProviderError::Malformed(format!("no script for {}", entity.name))),
        }
    }
}

fn config() -> SpyConfig {
    SpyConfig {
        poll_interval: POLL,
        ..Default::default()
    }
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        sleep(delay).await;
        cancel.cancel();
    });
    token
}

#[tokio::test(start_paused = true)]
async fn test_averages_skip_repeated_readings() {
    let provider = ScriptedProvider::new(POLL)
        .values("a", &[2.5, 3.5], &[10.0])
        .values("b", &[4.0, 4.0, 6.0], &[20.0, 30.0]);
    let coordinator = Coordinator::new(StaticDiscovery::new(&["a", "b"]), Arc::new(provider), config());

    let summary = coordinator
        .run_until_with(Vec::new(), "memory", cancel_after(Duration::from_millis(4500)))
        .await
        .unwrap();

    let a = &summary.reports[0];
    assert_eq!(a.entity.name, "a");
    assert!(a.finalized);
    assert_eq!(a.cpu_average, 3.0);
    assert_eq!(a.cpu_samples, 2);
    assert_eq!(a.memory_average, 10.0);
    assert_eq!(a.memory_samples, 1);

    let b = &summary.reports[1];
    assert_eq!(b.entity.name, "b");
    assert!(b.finalized);
    assert_eq!(b.cpu_average, 5.0);
    assert_eq!(b.cpu_samples, 2);
    assert_eq!(b.memory_average, 25.0);

    assert!(summary.degraded.is_empty());
    assert!(summary.write_error.is_none());
    assert!(summary.table.contains("│ a   │ 3.00%    │ 10.00%   │"));
    assert!(summary.table.contains("│ b   │ 5.00%    │ 25.00%   │"));

    // Five ticks per stream, four streams
    assert_eq!(summary.stats.fetches, 20);
    assert_eq!(summary.stats.accepted, 7);
    assert_eq!(summary.stats.duplicates, 13);
}

#[tokio::test(start_paused = true)]
async fn test_failing_pod_does_not_stop_others() {
    let provider = ScriptedProvider::new(POLL)
        .failing("a")
        .values("b", &[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0]);
    let coordinator = Coordinator::new(StaticDiscovery::new(&["a", "b"]), Arc::new(provider), config());

    let summary = coordinator
        .run_until_with(Vec::new(), "memory", cancel_after(Duration::from_millis(6500)))
        .await
        .unwrap();

    let a = &summary.reports[0];
    assert!(a.finalized);
    assert_eq!(a.sample_count(), 0);
    assert_eq!(a.cpu_average, 0.0);
    assert_eq!(a.memory_average, 0.0);

    let b = &summary.reports[1];
    assert!(b.finalized);
    assert_eq!(b.cpu_samples, 4);
    assert_eq!(b.cpu_average, 2.5);
    assert_eq!(b.memory_average, 5.5);

    let mut degraded = summary.degraded.clone();
    degraded.sort_by_key(|(_, kind)| kind.as_str());
    assert_eq!(
        degraded,
        vec![
            (Entity::new("a", "default"), MetricKind::Cpu),
            (Entity::new("a", "default"), MetricKind::Memory),
        ]
    );
    assert_eq!(summary.stats.degraded_streams, 2);
    assert_eq!(summary.stats.fetch_errors, 6);
}

#[tokio::test(start_paused = true)]
async fn test_run_ends_when_every_stream_degrades() {
    let provider = ScriptedProvider::new(POLL).failing("a").failing("b");
    let coordinator = Coordinator::new(StaticDiscovery::new(&["a", "b"]), Arc::new(provider), config());

    // Never cancelled: the run has to stop on its own
    let summary = coordinator
        .run_until_with(Vec::new(), "memory", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.degraded.len(), 4);
    assert!(summary.reports.iter().all(|r| r.finalized && r.sample_count() == 0));
    assert!(summary.table.contains("│ a   │ 0.00%    │ 0.00%    │"));
}

#[tokio::test(start_paused = true)]
async fn test_run_for_stops_without_cancellation() {
    let provider = ScriptedProvider::new(POLL).values("web-0", &[1.0, 2.0, 3.0], &[1.0]);
    let coordinator = Coordinator::new(
        StaticDiscovery::new(&["web-0"]),
        Arc::new(provider),
        SpyConfig {
            run_for: Some(Duration::from_millis(2500)),
            ..config()
        },
    );

    let start = Instant::now();
    let summary = coordinator
        .run_until_with(Vec::new(), "memory", CancellationToken::new())
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(2500));
    assert!(start.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.reports[0].cpu_samples, 3);
    assert_eq!(summary.reports[0].cpu_average, 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_live_mode_redraws_during_run() {
    let provider = ScriptedProvider::new(POLL).values("web-0", &[1.0], &[1.0]);
    let coordinator = Coordinator::new(
        StaticDiscovery::new(&["web-0"]),
        Arc::new(provider),
        SpyConfig {
            live_refresh: true,
            redraw_interval: Duration::from_millis(500),
            ..config()
        },
    );
    let metrics = coordinator.metrics().clone();

    let summary = coordinator
        .run_until_with(Vec::new(), "memory", cancel_after(Duration::from_millis(2200)))
        .await
        .unwrap();

    // Redraws at 0, 0.5, 1, 1.5 and 2 seconds, then the final frame
    assert_eq!(summary.stats.redraws, 6);
    assert_eq!(metrics.stats().redraws, 6);
    assert!(summary.reports[0].finalized);
}

#[tokio::test]
async fn test_discovery_failure_aborts_run() {
    let coordinator = Coordinator::new(
        Arc::new(BrokenDiscovery),
        Arc::new(ScriptedProvider::new(POLL)),
        config(),
    );

    let error = coordinator
        .run_until_with(Vec::new(), "memory", CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        SpyError::Discovery(DiscoveryError::Backend { .. })
    ));
    assert_eq!(error.to_string(), "failed to list pods in namespace 'default'");
}

#[tokio::test]
async fn test_empty_namespace_is_an_error() {
    let coordinator = Coordinator::new(
        StaticDiscovery::new(&[]),
        Arc::new(ScriptedProvider::new(POLL)),
        SpyConfig {
            namespace: Some("staging".into()),
            ..config()
        },
    );

    let error = coordinator
        .run_until_with(Vec::new(), "memory", CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "no pods found in namespace 'staging'");
}

#[tokio::test]
async fn test_invalid_config_rejected_before_discovery() {
    let discovery = StaticDiscovery::new(&["web-0"]);
    let coordinator = Coordinator::new(
        discovery.clone(),
        Arc::new(ScriptedProvider::new(POLL)),
        SpyConfig {
            live_refresh: true,
            output_path: Some("/tmp/averages.txt".into()),
            ..config()
        },
    );

    let error = coordinator
        .run_until(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SpyError::InvalidConfig(_)));
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_shutdown_budget_rejected_before_discovery() {
    let discovery = StaticDiscovery::new(&["web-0"]);
    let coordinator = Coordinator::new(
        discovery.clone(),
        Arc::new(ScriptedProvider::new(POLL)),
        SpyConfig {
            shutdown_timeout: Duration::ZERO,
            ..config()
        },
    );

    let error = coordinator
        .run_until_with(Vec::new(), "buffer", CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SpyError::InvalidConfig(_)));
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_output_written_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("averages.txt");

    let provider = ScriptedProvider::new(Duration::from_millis(20))
        .values("api", &[42.0], &[17.25]);
    let coordinator = Coordinator::new(
        StaticDiscovery::new(&["api"]),
        Arc::new(provider),
        SpyConfig {
            poll_interval: Duration::from_millis(20),
            output_path: Some(path.clone()),
            run_for: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    );

    let summary = coordinator
        .run_until(CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.write_error.is_none());

    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, format!("{}\n", summary.table));
    assert!(written.contains("│ Pod │ CPU AVG% │ MEM AVG% │"));
    assert!(written.contains("│ api │ 42.00%   │ 17.25%   │"));
}

#[tokio::test]
async fn test_unwritable_output_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("averages.txt");

    let provider = ScriptedProvider::new(Duration::from_millis(20)).values("api", &[1.0], &[1.0]);
    let coordinator = Coordinator::new(
        StaticDiscovery::new(&["api"]),
        Arc::new(provider),
        SpyConfig {
            poll_interval: Duration::from_millis(20),
            output_path: Some(path),
            run_for: Some(Duration::from_millis(60)),
            ..Default::default()
        },
    );

    let summary = coordinator
        .run_until(CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        summary.write_error,
        Some(scout_lib::WriteError::Open { .. })
    ));
    assert!(summary.reports[0].finalized);
    assert!(summary.table.contains("api"));
}
