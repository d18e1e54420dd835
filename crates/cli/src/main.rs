//! Scout CLI
//!
//! A command-line tool for watching the CPU and memory usage of the pods in
//! a Kubernetes namespace, either as averages over a sampling run or as a
//! one-shot listing.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{spy, usage};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Scout CLI
#[derive(Parser)]
#[command(name = "scout")]
#[command(author, version, about = "Pod resource usage sampler for Kubernetes", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Path to a config file (default: ~/.config/scout/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample pods and report average CPU and memory usage
    Spy(spy::SpyArgs),

    /// Show current CPU and memory usage of pods
    Usage(usage::UsageArgs),
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "warn,scout=debug,scout_lib=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let settings = config::Settings::load(cli.config.as_deref())?;
    let client = client::kube_client(cli.kubeconfig.as_deref()).await?;

    match &cli.command {
        Commands::Spy(args) => {
            let config = args.apply(settings.spy_config());
            spy::run(client, config, args.metrics_file.as_deref(), cli.verbose).await?;
        }
        Commands::Usage(args) => {
            usage::run(client, settings.spy_config(), args).await?;
        }
    }

    Ok(())
}
