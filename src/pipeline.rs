#![forbid(unsafe_code)]

//! Drives scrape + persist over a list of channels, one channel at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::ScrapeCache;
use crate::config::ScraperSettings;
use crate::platform::ClientFactory;
use crate::record::{ChannelReference, VideoRecord};
use crate::scraper::{ConcurrentScraper, DEFAULT_WORKERS};
use crate::store::VideoStore;

pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub refresh: bool,
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            refresh: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Fixed-delay retry for whole channel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel: ChannelReference,
    pub scraped: usize,
    pub failed: usize,
    pub inserted: u64,
    pub from_cache: bool,
    pub records: Vec<VideoRecord>,
}

#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: ChannelReference,
    pub result: Result<ChannelReport>,
}

pub struct Pipeline {
    scraper: ConcurrentScraper,
    store: Option<VideoStore>,
}

impl Pipeline {
    /// Without a store, runs only scrape and cache.
    pub fn new(scraper: ConcurrentScraper, store: Option<VideoStore>) -> Self {
        Self { scraper, store }
    }

    /// Wires cache and database from `settings`; `persist = false` skips the
    /// database entirely.
    pub async fn from_settings(
        settings: &ScraperSettings,
        factory: Arc<dyn ClientFactory>,
        persist: bool,
    ) -> Result<Self> {
        let scraper = ConcurrentScraper::new(factory, ScrapeCache::new(&settings.cache_dir));
        let store = if persist {
            Some(
                VideoStore::open(&settings.db_path)
                    .await
                    .context("initializing video database")?,
            )
        } else {
            None
        };
        Ok(Self::new(scraper, store))
    }

    pub async fn run_channel(
        &self,
        channel: &ChannelReference,
        options: RunOptions,
    ) -> Result<ChannelReport> {
        let outcome = self
            .scraper
            .scrape_detailed(channel, options.refresh, options.workers)
            .await
            .with_context(|| format!("scraping {channel}"))?;

        let inserted = match &self.store {
            Some(store) => store
                .persist(&outcome.records)
                .await
                .with_context(|| format!("persisting videos of {channel}"))?,
            None => 0,
        };

        tracing::info!(
            channel = %channel,
            scraped = outcome.records.len(),
            failed = outcome.failed,
            inserted,
            from_cache = outcome.from_cache,
            "channel done"
        );

        Ok(ChannelReport {
            channel: channel.clone(),
            scraped: outcome.records.len(),
            failed: outcome.failed,
            inserted,
            from_cache: outcome.from_cache,
            records: outcome.records,
        })
    }

    /// Runs `channels` in order. A failing channel is logged and reported; the
    /// batch moves on.
    pub async fn run_batch(
        &self,
        channels: &[ChannelReference],
        options: RunOptions,
    ) -> Vec<ChannelOutcome> {
        self.run_each(channels, |channel| self.run_channel(channel, options))
            .await
    }

    /// Like [`run_batch`](Self::run_batch) but each channel gets `policy`.
    pub async fn run_batch_with_retry(
        &self,
        channels: &[ChannelReference],
        options: RunOptions,
        policy: RetryPolicy,
    ) -> Vec<ChannelOutcome> {
        self.run_each(channels, |channel| {
            self.run_channel_with_retry(channel, options, policy)
        })
        .await
    }

    async fn run_each<'a, F, Fut>(
        &'a self,
        channels: &'a [ChannelReference],
        mut run: F,
    ) -> Vec<ChannelOutcome>
    where
        F: FnMut(&'a ChannelReference) -> Fut,
        Fut: Future<Output = Result<ChannelReport>>,
    {
        let total = channels.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, channel) in channels.iter().enumerate() {
            tracing::info!(channel = %channel, position = index + 1, total, "processing channel");
            let result = run(channel).await;
            if let Err(err) = &result {
                tracing::error!(channel = %channel, error = %format!("{err:#}"), "channel failed");
            }
            outcomes.push(ChannelOutcome {
                channel: channel.clone(),
                result,
            });
        }
        outcomes
    }

    pub async fn run_channel_with_retry(
        &self,
        channel: &ChannelReference,
        options: RunOptions,
        policy: RetryPolicy,
    ) -> Result<ChannelReport> {
        let mut attempt = 0u32;
        loop {
            match self.run_channel(channel, options).await {
                Ok(report) => return Ok(report),
                Err(err) if attempt < policy.retries => {
                    attempt += 1;
                    tracing::warn!(
                        channel = %channel,
                        attempt,
                        retries = policy.retries,
                        delay_secs = policy.delay.as_secs(),
                        error = %format!("{err:#}"),
                        "channel run failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Every record from the successful outcomes, in channel order.
pub fn collect_records(outcomes: &[ChannelOutcome]) -> Vec<VideoRecord> {
    outcomes
        .iter()
        .filter_map(|outcome| outcome.result.as_ref().ok())
        .flat_map(|report| report.records.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platform::testing::{ScriptBuilder, ScriptedPlatform, listing_json};
    use crate::platform::{ExtractMode, PlatformClient};
    use crate::store::CatalogReader;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    const ALPHA: &str = "https://www.youtube.com/@alpha";
    const BETA: &str = "https://www.youtube.com/@beta";

    fn with_channel(builder: ScriptBuilder, url: &str, ids: &[&str]) -> ScriptBuilder {
        ids.iter().fold(builder.respond(url, listing_json(ids)), |builder, id| {
            builder.video(id, &format!("Video {id}"))
        })
    }

    async fn create_pipeline(factory: Arc<dyn ClientFactory>, dir: &TempDir) -> Pipeline {
        let scraper = ConcurrentScraper::new(factory, ScrapeCache::new(dir.path().join("cache")));
        let store = VideoStore::open(&dir.path().join("videos.db")).await.unwrap();
        Pipeline::new(scraper, Some(store))
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            retries: 2,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn run_channel_persists_and_rerun_inserts_nothing() {
        let platform = with_channel(ScriptedPlatform::builder(), ALPHA, &["a", "b", "c"]).build();
        let dir = tempdir().unwrap();
        let pipeline = create_pipeline(platform.factory(), &dir).await;
        let channel = ChannelReference::new(ALPHA);

        let first = pipeline
            .run_channel(&channel, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(first.scraped, 3);
        assert_eq!(first.inserted, 3);
        assert!(!first.from_cache);

        let second = pipeline
            .run_channel(&channel, RunOptions::default())
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.scraped, 3);
        assert_eq!(second.inserted, 0);

        let reader = CatalogReader::new(dir.path().join("videos.db")).await.unwrap();
        let videos = reader.list_videos().await.unwrap();
        assert_eq!(videos.len(), 3);
        assert!(videos.iter().all(|video| video.channel_name == "@alpha"));
    }

    #[tokio::test]
    async fn batch_continues_past_failing_channel() {
        let builder = ScriptedPlatform::builder().fail(ALPHA, "channel does not exist");
        let platform = with_channel(builder, BETA, &["x", "y"]).build();
        let dir = tempdir().unwrap();
        let pipeline = create_pipeline(platform.factory(), &dir).await;
        let channels = [ChannelReference::new(ALPHA), ChannelReference::new(BETA)];

        let outcomes = pipeline.run_batch(&channels, RunOptions::default()).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].channel, channels[0]);
        assert!(outcomes[0].result.is_err());
        let beta = outcomes[1].result.as_ref().unwrap();
        assert_eq!(beta.inserted, 2);
        assert_eq!(collect_records(&outcomes).len(), 2);
    }

    #[tokio::test]
    async fn shared_video_is_stored_once_under_first_channel() {
        let builder = with_channel(ScriptedPlatform::builder(), ALPHA, &["a", "shared"]);
        let platform = with_channel(builder, BETA, &["shared", "b"]).build();
        let dir = tempdir().unwrap();
        let pipeline = create_pipeline(platform.factory(), &dir).await;
        let channels = [ChannelReference::new(ALPHA), ChannelReference::new(BETA)];

        let outcomes = pipeline
            .run_batch(
                &channels,
                RunOptions {
                    refresh: true,
                    workers: 2,
                },
            )
            .await;
        let inserted: Vec<u64> = outcomes
            .iter()
            .map(|outcome| outcome.result.as_ref().unwrap().inserted)
            .collect();
        assert_eq!(inserted, vec![2, 1]);

        let reader = CatalogReader::new(dir.path().join("videos.db")).await.unwrap();
        let videos = reader.list_videos().await.unwrap();
        assert_eq!(videos.len(), 3);
        let shared = videos
            .iter()
            .find(|video| video.url.ends_with("v=shared"))
            .unwrap();
        assert_eq!(shared.channel_name, "@alpha");
        assert_eq!(reader.list_channels().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn without_store_nothing_is_inserted() {
        let platform = with_channel(ScriptedPlatform::builder(), ALPHA, &["a"]).build();
        let dir = tempdir().unwrap();
        let scraper = ConcurrentScraper::new(platform.factory(), ScrapeCache::new(dir.path()));
        let pipeline = Pipeline::new(scraper, None);

        let report = pipeline
            .run_channel(&ChannelReference::new(ALPHA), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(report.scraped, 1);
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn retry_gives_up_after_configured_attempts() {
        let platform = ScriptedPlatform::builder().fail(ALPHA, "down").build();
        let dir = tempdir().unwrap();
        let pipeline = create_pipeline(platform.factory(), &dir).await;

        let result = pipeline
            .run_channel_with_retry(&ChannelReference::new(ALPHA), RunOptions::default(), no_wait())
            .await;
        assert!(result.is_err());
        let attempts = platform
            .calls()
            .iter()
            .filter(|(url, mode)| url == ALPHA && *mode == ExtractMode::Flat)
            .count();
        assert_eq!(attempts, 3);
    }

    /// Hands out failing clients for the first `failures` requests.
    struct FlakyFactory {
        inner: ScriptedPlatform,
        failures: AtomicUsize,
    }

    struct DownClient;

    impl PlatformClient for DownClient {
        fn extract_info(&mut self, url: &str, _mode: ExtractMode) -> Result<Value, PlatformError> {
            Err(PlatformError::Unavailable(url.to_string()))
        }
    }

    impl ClientFactory for FlakyFactory {
        fn create(&self) -> Box<dyn PlatformClient> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                Box::new(DownClient)
            } else {
                self.inner.create()
            }
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let inner = with_channel(ScriptedPlatform::builder(), ALPHA, &["a", "b"]).build();
        let factory = Arc::new(FlakyFactory {
            inner,
            failures: AtomicUsize::new(1),
        });
        let dir = tempdir().unwrap();
        let pipeline = create_pipeline(factory, &dir).await;

        let report = pipeline
            .run_channel_with_retry(&ChannelReference::new(ALPHA), RunOptions::default(), no_wait())
            .await
            .unwrap();
        assert_eq!(report.scraped, 2);
        assert_eq!(report.inserted, 2);
    }

    #[tokio::test]
    async fn batch_with_retry_reports_each_channel() {
        let builder = ScriptedPlatform::builder().fail(BETA, "gone");
        let platform = with_channel(builder, ALPHA, &["a"]).build();
        let dir = tempdir().unwrap();
        let pipeline = create_pipeline(platform.factory(), &dir).await;
        let channels = [ChannelReference::new(ALPHA), ChannelReference::new(BETA)];

        let outcomes = pipeline
            .run_batch_with_retry(&channels, RunOptions::default(), no_wait())
            .await;
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
    }
}
