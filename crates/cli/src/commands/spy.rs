//! `scout spy`: sample pods and report average usage

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use kube::Client;
use scout_lib::{
    Coordinator, KubeDiscovery, KubeMetricsProvider, RunSummary, SpyConfig, SpyMetrics,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::output::{describe_error, print_info, print_success, print_warning};

#[derive(Debug, Args)]
pub struct SpyArgs {
    /// Namespace to sample (defaults to "default")
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Sample a single pod
    #[arg(long, short)]
    pub pod: Option<String>,

    /// Write the final table to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Redraw the table in place until interrupted
    #[arg(long, conflicts_with = "output")]
    pub live: bool,

    /// Seconds between metrics fetches
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Seconds between redraws in live mode
    #[arg(long, value_name = "SECS")]
    pub redraw_interval: Option<u64>,

    /// Stop by itself after this many seconds
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Write the run's Prometheus metrics to this file when it ends
    #[arg(long, value_name = "FILE")]
    pub metrics_file: Option<PathBuf>,
}

impl SpyArgs {
    /// Apply flags over file and environment settings
    pub fn apply(&self, base: SpyConfig) -> SpyConfig {
        SpyConfig {
            namespace: self.namespace.clone().or(base.namespace),
            entity_filter: self.pod.clone(),
            output_path: self.output.clone(),
            live_refresh: self.live,
            poll_interval: self
                .poll_interval
                .map(Duration::from_secs)
                .unwrap_or(base.poll_interval),
            redraw_interval: self
                .redraw_interval
                .map(Duration::from_secs)
                .unwrap_or(base.redraw_interval),
            run_for: self.duration.map(Duration::from_secs).or(base.run_for),
            ..base
        }
    }
}

pub async fn run(
    client: Client,
    config: SpyConfig,
    metrics_file: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    if !config.live_refresh {
        let stop = match config.run_for {
            Some(run_for) => format!("for {}s", run_for.as_secs()),
            None => "until interrupted (Ctrl-C)".to_string(),
        };
        print_info(&format!(
            "Sampling pods in namespace '{}' every {}s {}",
            config.namespace(),
            config.poll_interval.as_secs(),
            stop
        ));
    }

    let output_path = config.output_path.clone();
    let coordinator = Coordinator::new(
        Arc::new(KubeDiscovery::new(client.clone())),
        Arc::new(KubeMetricsProvider::new(client)),
        config,
    );
    let metrics = coordinator.metrics().clone();
    let result = coordinator.run().await;

    // Written even when the run fails
    if let Some(path) = metrics_file {
        write_metrics(&metrics, path).await?;
    }
    let summary = result.context("Sampling run failed")?;

    report_summary(&summary, output_path.as_deref(), verbose);
    Ok(())
}

async fn write_metrics(metrics: &SpyMetrics, path: &Path) -> Result<()> {
    let exposition = metrics
        .encode_text()
        .context("Failed to encode metrics")?;
    tokio::fs::write(path, exposition)
        .await
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}

fn report_summary(summary: &RunSummary, output_path: Option<&Path>, verbose: bool) {
    for (entity, kind) in &summary.degraded {
        print_warning(&format!(
            "{} {} metrics stopped after repeated failures; its average covers earlier samples only",
            entity, kind
        ));
    }

    match (&summary.write_error, output_path) {
        (Some(error), _) => {
            print_warning(&format!("Could not write report: {}", describe_error(error)));
            println!("{}", summary.table);
        }
        (None, Some(path)) => {
            print_success(&format!(
                "Averages for {} pods written to {}",
                summary.reports.len(),
                path.display().to_string().cyan()
            ));
        }
        (None, None) => {
            print_success(&format!("Sampled {} pods", summary.reports.len()));
        }
    }

    if verbose {
        let stats = &summary.stats;
        print_info(&format!(
            "{} fetches, {} samples accepted, {} repeated, {} rejected after finalize, {} fetch errors, {} redraws",
            stats.fetches,
            stats.accepted,
            stats.duplicates,
            stats.rejected,
            stats.fetch_errors,
            stats.redraws
        ));
    }
}
