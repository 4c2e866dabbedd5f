#![forbid(unsafe_code)]

//! Scrapes one or more channels into the video database, optionally dumping
//! everything that was scraped to a CSV or JSON file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use channel_scraper::{
    config::{SettingsOverrides, resolve_settings},
    export::{ExportFormat, write_export},
    pipeline::{Pipeline, RunOptions, collect_records},
    platform::YtDlpFactory,
    record::ChannelReference,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scrape_channels", about = "Scrape channel video metadata into SQLite")]
struct Args {
    /// Channel URLs or handles, processed in order.
    #[arg(short, long = "channels", num_args = 1.., required = true)]
    channels: Vec<String>,

    /// Ignore cached results and hit the platform again.
    #[arg(long)]
    refresh: bool,

    /// Concurrent metadata fetches per channel.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Also write every scraped record to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export format; guessed from the output extension when omitted.
    #[arg(long, value_enum)]
    format: Option<ExportFormat>,

    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Per-call platform timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    yt_dlp: Option<PathBuf>,

    /// Scrape and cache only; leave the database untouched.
    #[arg(long)]
    no_persist: bool,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            db_path: self.db.clone(),
            cache_dir: self.cache_dir.clone(),
            workers: self.workers,
            fetch_timeout: self
                .timeout
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            yt_dlp: self.yt_dlp.clone(),
            env_path: self.env_file.clone(),
        }
    }

    fn channel_refs(&self) -> Vec<ChannelReference> {
        self.channels
            .iter()
            .map(ChannelReference::new)
            .filter(|channel| !channel.as_str().is_empty())
            .collect()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("channel_scraper=info,scrape_channels=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let settings = resolve_settings(args.overrides()).context("loading settings")?;
    let channels = args.channel_refs();
    if channels.is_empty() {
        anyhow::bail!("no channels given");
    }

    tracing::info!(
        channels = channels.len(),
        db = %settings.db_path.display(),
        cache = %settings.cache_dir.display(),
        workers = settings.workers,
        "starting scrape"
    );

    let factory = Arc::new(YtDlpFactory::new(settings.yt_dlp_options()));
    let pipeline = Pipeline::from_settings(&settings, factory, !args.no_persist).await?;
    let options = RunOptions {
        refresh: args.refresh,
        workers: settings.workers,
    };
    let outcomes = pipeline.run_batch(&channels, options).await;

    if let Some(path) = &args.output {
        let records = collect_records(&outcomes);
        let format = args.format.unwrap_or_else(|| ExportFormat::from_path(path));
        write_export(&records, path, format)?;
    }

    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.result.is_err())
        .count();
    let inserted: u64 = outcomes
        .iter()
        .filter_map(|outcome| outcome.result.as_ref().ok())
        .map(|report| report.inserted)
        .sum();
    tracing::info!(
        channels = outcomes.len(),
        failed,
        inserted,
        "all channels processed"
    );

    if failed > 0 {
        for outcome in outcomes.iter().filter(|outcome| outcome.result.is_err()) {
            tracing::warn!(channel = %outcome.channel, "channel not scraped");
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
