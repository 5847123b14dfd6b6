/*
 * pagegraph - operator CLI for the static documentation site
 *
 * Usage:
 *   pagegraph --config pagegraph.yaml build
 *   pagegraph republish docs/show_functions/7/high/noyes docs/function_doc/100
 *   pagegraph buckets
 *   pagegraph config
 *
 * Exits non-zero when any bucket failed to publish.
 */

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pagegraph_orchestration::{BucketKey, PagegraphConfig, RebuildReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagegraph")]
#[command(
    about = "Incremental static page builder for the documentation catalogue",
    long_about = None
)]
struct Cli {
    /// YAML configuration file (defaults apply when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the rebuild report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish every page derivable from the store
    Build,

    /// Re-run specific buckets, given in their path form
    Republish {
        #[arg(required = true)]
        buckets: Vec<String>,
    },

    /// List every bucket a full build publishes
    Buckets,

    /// Print the effective configuration
    Config,
}

fn print_report(report: &RebuildReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{} published, {} removed, {} skipped, {} failed in {}ms",
        report.succeeded.len(),
        report.removed.len(),
        report.skipped.len(),
        report.failed.len(),
        report.duration_ms
    );
    for failure in &report.failed {
        println!("  FAILED {} [{}]: {}", failure.target, failure.category, failure.error);
    }
    Ok(())
}

fn finish(report: &RebuildReport) -> anyhow::Result<()> {
    if report.is_degraded() {
        bail!(
            "{} artifact(s) are stale; retry with `pagegraph republish {}`",
            report.failed.len(),
            report
                .failed_buckets()
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match &cli.config {
        Some(path) => PagegraphConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PagegraphConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
        Commands::Buckets => {
            let store = config.open_store()?;
            let orchestrator = config.build_orchestrator(store);
            for bucket in orchestrator.all_buckets().await? {
                println!("{}", bucket);
            }
        }
        Commands::Build => {
            let store = config.open_store()?;
            let orchestrator = config.build_orchestrator(store);
            let report = orchestrator.rebuild_all().await?;
            print_report(&report, cli.json)?;
            finish(&report)?;
        }
        Commands::Republish { buckets } => {
            let keys = buckets
                .iter()
                .map(|raw| BucketKey::parse(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let store = config.open_store()?;
            let orchestrator = config.build_orchestrator(store);
            let report = orchestrator.republish(keys).await;
            print_report(&report, cli.json)?;
            finish(&report)?;
        }
    }

    Ok(())
}
