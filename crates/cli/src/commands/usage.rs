//! `scout usage`: current usage of every pod, fetched once or redrawn

use anyhow::{ensure, Context, Result};
use clap::Args;
use kube::Client;
use scout_lib::coordinator::{spawn_signal_listener, ShutdownTrigger};
use scout_lib::report::CLEAR_SCREEN;
use scout_lib::{
    collect_usage, EntityDiscovery, KubeDiscovery, KubeMetricsProvider, MetricsProvider,
    PodUsage, SpyConfig, StructuredLogger, UsageReport,
};
use std::io::Write;
use std::sync::Arc;
use tabled::Tabled;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::output::{
    color_percent, describe_error, format_bytes, format_cpu, print_json, print_table,
    print_warning, OutputFormat,
};

#[derive(Debug, Args)]
pub struct UsageArgs {
    /// Namespace to list (defaults to "default")
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Show a single pod
    #[arg(long, short)]
    pub pod: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Redraw every redraw interval until interrupted
    #[arg(long, short)]
    pub watch: bool,
}

/// Row for the usage table
#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "CPU %")]
    cpu_percent: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Memory %")]
    memory_percent: String,
}

impl From<&PodUsage> for UsageRow {
    fn from(usage: &PodUsage) -> Self {
        Self {
            pod: usage.entity.name.clone(),
            cpu: format_cpu(usage.cpu_millicores),
            cpu_percent: color_percent(usage.cpu_percent),
            memory: format_bytes(usage.memory_bytes),
            memory_percent: color_percent(usage.memory_percent),
        }
    }
}

struct UsageSource {
    discovery: Arc<dyn EntityDiscovery>,
    provider: Arc<dyn MetricsProvider>,
    namespace: String,
    pod: Option<String>,
    config: SpyConfig,
}

impl UsageSource {
    async fn fetch(&self) -> Result<UsageReport> {
        collect_usage(
            self.discovery.clone(),
            self.provider.clone(),
            &self.namespace,
            self.pod.as_deref(),
            self.config.fetch_timeout,
        )
        .await
        .context("Failed to list pods")
    }
}

pub async fn run(client: Client, config: SpyConfig, args: &UsageArgs) -> Result<()> {
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| config.namespace().to_string());
    let source = UsageSource {
        discovery: Arc::new(KubeDiscovery::new(client.clone())),
        provider: Arc::new(KubeMetricsProvider::new(client)),
        namespace,
        pod: args.pod.clone(),
        config,
    };

    if args.watch {
        watch(&source, args.format).await
    } else {
        show(&source.fetch().await?, args.format)
    }
}

/// Redraw in place until SIGINT or SIGTERM
async fn watch(source: &UsageSource, format: OutputFormat) -> Result<()> {
    let redraw_interval = source.config.redraw_interval;
    ensure!(
        !redraw_interval.is_zero(),
        "redraw interval must be greater than zero"
    );

    let trigger = ShutdownTrigger::new(
        CancellationToken::new(),
        StructuredLogger::new(&source.namespace),
    );
    let listener =
        spawn_signal_listener(trigger.clone()).context("Failed to install signal handlers")?;

    let mut ticker = interval(redraw_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let result = loop {
        tokio::select! {
            _ = trigger.token().cancelled() => break Ok(()),
            _ = ticker.tick() => {
                let report = match source.fetch().await {
                    Ok(report) => report,
                    Err(error) => break Err(error),
                };
                print!("{}", CLEAR_SCREEN);
                if let Err(error) = std::io::stdout().flush() {
                    break Err(error.into());
                }
                if let Err(error) = show(&report, format) {
                    break Err(error);
                }
            }
        }
    };

    listener.abort();
    result
}

fn show(report: &UsageReport, format: OutputFormat) -> Result<()> {
    for (entity, error) in &report.failures {
        print_warning(&format!("{}: {}", entity, describe_error(error)));
    }

    match format {
        OutputFormat::Json => print_json(&report.rows)?,
        OutputFormat::Table => {
            let rows: Vec<UsageRow> = report.rows.iter().map(UsageRow::from).collect();
            print_table(&rows, empty_message(report));
        }
    }
    Ok(())
}

fn empty_message(report: &UsageReport) -> &'static str {
    if report.failures.is_empty() {
        "No pods found"
    } else {
        "No pod returned usage"
    }
}
