#![forbid(unsafe_code)]

//! Scheduler-facing refresh of a fixed channel list. Meant to be run from
//! cron: every channel is scraped once, failures get one more try after a
//! pause, and the run never aborts halfway through the list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use channel_scraper::{
    config::{SettingsOverrides, resolve_settings},
    pipeline::{DEFAULT_RETRIES, Pipeline, RetryPolicy, RunOptions},
    platform::YtDlpFactory,
    record::ChannelReference,
};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_SCHEDULE_FILE: &str = "channels.toml";
const DEFAULT_RETRY_DELAY_SECS: u64 = 300;

#[derive(Debug, Parser)]
#[command(name = "routine_update", about = "Refresh every channel listed in a schedule file")]
struct RoutineArgs {
    /// TOML file listing the channels to refresh.
    #[arg(long, default_value = DEFAULT_SCHEDULE_FILE)]
    schedule: PathBuf,

    #[arg(long)]
    env_file: Option<PathBuf>,

    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

/// Contents of the schedule file, e.g.
///
/// ```toml
/// channels = ["https://www.youtube.com/@example"]
/// refresh = false
/// retries = 1
/// retry_delay_secs = 300
/// ```
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct Schedule {
    channels: Vec<String>,
    #[serde(default)]
    refresh: bool,
    workers: Option<usize>,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    retry_delay_secs: u64,
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

impl Schedule {
    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading schedule {}", path.display()))?;
        let schedule: Schedule =
            toml::from_str(&raw).with_context(|| format!("parsing schedule {}", path.display()))?;
        Ok(schedule)
    }

    fn channel_refs(&self) -> Vec<ChannelReference> {
        self.channels
            .iter()
            .map(ChannelReference::new)
            .filter(|channel| !channel.as_str().is_empty())
            .collect()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("channel_scraper=info,routine_update=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = RoutineArgs::parse();
    let schedule = Schedule::load(&args.schedule)?;
    let channels = schedule.channel_refs();
    if channels.is_empty() {
        bail!("schedule {} lists no channels", args.schedule.display());
    }

    let settings = resolve_settings(SettingsOverrides {
        db_path: args.db,
        cache_dir: args.cache_dir,
        workers: schedule.workers,
        env_path: args.env_file,
        ..SettingsOverrides::default()
    })
    .context("loading settings")?;

    tracing::info!(
        channels = channels.len(),
        refresh = schedule.refresh,
        retries = schedule.retries,
        "routine update starting"
    );

    let factory = Arc::new(YtDlpFactory::new(settings.yt_dlp_options()));
    let pipeline = Pipeline::from_settings(&settings, factory, true).await?;
    let options = RunOptions {
        refresh: schedule.refresh,
        workers: settings.workers,
    };
    let outcomes = pipeline
        .run_batch_with_retry(&channels, options, schedule.retry_policy())
        .await;

    let mut failed = 0usize;
    let mut inserted = 0u64;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => inserted += report.inserted,
            Err(_) => failed += 1,
        }
    }
    tracing::info!(
        channels = outcomes.len(),
        failed,
        inserted,
        "routine update complete"
    );
    Ok(())
}
