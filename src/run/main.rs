//! Outbreak notification run.
//!
//! Loads the workspace, runs the full ETL + overlay pipeline, prints the
//! notify count, and optionally ships the run summary to a webhook.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use culex::config::Config;
use culex::engine::MemoryEngine;
use culex::etl::SheetExtractor;
use culex::geocode::CensusGeocoder;
use culex::pipeline::{RiskPipeline, RunOptions};
use culex::report::{ReportExporter, ReportMeta, WebhookNotifier};

#[derive(Parser, Debug)]
#[command(name = "outbreak")]
#[command(about = "Identify addresses inside the West Nile Virus risk zone")]
struct Args {
    /// Pipeline configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Buffer distance per hazard layer, as LAYER=DISTANCE (repeatable)
    #[arg(short, long = "distance", value_parser = parse_distance)]
    distances: Vec<(String, f64)>,

    /// Buffer distance for the avoidance points
    #[arg(long)]
    avoid_distance: f64,

    /// Sub-title for the output report
    #[arg(long, default_value = "")]
    subtitle: String,

    /// Maximum in-flight geocode lookups
    #[arg(long, default_value = "4")]
    geocode_concurrency: usize,

    /// Reuse the staged spreadsheet instead of re-fetching it
    #[arg(long)]
    offline: bool,

    /// Webhook URL for run notifications (optional)
    #[arg(long)]
    webhook: Option<String>,
}

fn parse_distance(value: &str) -> Result<(String, f64), String> {
    let (layer, distance) = value
        .split_once('=')
        .ok_or_else(|| format!("expected LAYER=DISTANCE, got `{}`", value))?;
    let distance: f64 = distance
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number", distance))?;
    Ok((layer.trim().to_string(), distance))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = Config::load_from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    info!("Starting West Nile Virus outbreak run");
    info!("Workspace: {}", config.proj_dir.display());

    let mut engine =
        MemoryEngine::open(&config.proj_dir).context("Failed to open workspace")?;

    let extractor = SheetExtractor::new(
        &config.remote_url,
        config.raw_staging_path(),
        &config.address_field,
    )
    .offline(args.offline);
    let geocoder = CensusGeocoder::new(&config.geocoder_prefix_url, &config.geocoder_suffix_url);

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);

    let distances: HashMap<String, f64> = args.distances.into_iter().collect();
    let mut opts = RunOptions::new(distances, args.avoid_distance);
    opts.geocode_concurrency = args.geocode_concurrency;
    opts.stage_enriched = true;

    let result = pipeline.run(&opts).await?;

    println!("{} addresses need to be notified.", result.count);

    if let Some(url) = args.webhook {
        let meta = ReportMeta::new(&result, &args.subtitle);
        WebhookNotifier::new(url).export(&meta).await?;
    }

    Ok(())
}
