//! burstd — the cloudburst daemon.
//!
//! Watches utilization of the local workload and, on sustained overload,
//! brings up one cloud instance running the same workload. The instance is
//! removed again once the cooldown has passed.
//!
//! # Usage
//!
//! ```text
//! burstd run --config cloudburst.toml
//! burstd run --config cloudburst.toml --dry-run
//! burstd validate --config cloudburst.toml
//! burstd sample --config cloudburst.toml
//! ```

mod daemon;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cloudburst_core::BurstConfig;
use cloudburst_metrics::{ConfiguredSource, MetricsSource};

#[derive(Parser)]
#[command(name = "burstd", about = "cloudburst elastic-scaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scaling controller until interrupted.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, short, default_value = "cloudburst.toml")]
        config: PathBuf,

        /// Provision against an in-memory backend instead of the cloud.
        #[arg(long)]
        dry_run: bool,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },

    /// Check a configuration file and print it with defaults filled in.
    Validate {
        #[arg(long, short, default_value = "cloudburst.toml")]
        config: PathBuf,
    },

    /// Take a single metrics sample and print it.
    Sample {
        #[arg(long, short, default_value = "cloudburst.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            dry_run,
            log_json,
        } => {
            init_tracing(log_json);
            let config = load_config(&config)?;
            daemon::run(config, dry_run).await
        }
        Command::Validate { config } => {
            let config = load_config(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Sample { config } => {
            init_tracing(false);
            let config = load_config(&config)?;
            let source = ConfiguredSource::from_config(&config.metrics)
                .context("failed to set up metrics source")?;
            let snapshot = source.sample().await.context("metrics sample failed")?;
            println!(
                "cpu={:.1}% memory={:.1}% disk={:.1}%",
                snapshot.cpu_percent, snapshot.memory_percent, snapshot.disk_percent
            );
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,burstd=debug,cloudburst=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<BurstConfig> {
    let config = BurstConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}
