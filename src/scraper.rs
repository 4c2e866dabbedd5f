#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::cache::ScrapeCache;
use crate::error::{FetchFailure, ResolutionError};
use crate::fetcher::MetadataFetcher;
use crate::platform::ClientFactory;
use crate::record::{ChannelReference, VideoId, VideoRecord};
use crate::resolver::ChannelResolver;

pub const DEFAULT_WORKERS: usize = 5;

type FetchOutcome = Result<VideoRecord, FetchFailure>;

/// Result of one scrape call plus the bookkeeping the pipeline reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutcome {
    pub records: Vec<VideoRecord>,
    pub from_cache: bool,
    /// Identifiers the channel resolved to (0 on a cache hit).
    pub requested: usize,
    /// Identifiers that produced no record.
    pub failed: usize,
}

/// Resolves a channel, fans the per-video fetches out over a fixed pool of
/// blocking workers and snapshots the result set into the cache.
pub struct ConcurrentScraper {
    resolver: ChannelResolver,
    fetcher: MetadataFetcher,
    cache: ScrapeCache,
}

impl ConcurrentScraper {
    pub fn new(factory: Arc<dyn ClientFactory>, cache: ScrapeCache) -> Self {
        Self {
            resolver: ChannelResolver::new(Arc::clone(&factory)),
            fetcher: MetadataFetcher::new(factory),
            cache,
        }
    }

    pub fn cache(&self) -> &ScrapeCache {
        &self.cache
    }

    /// Record set for `channel`. Output order is unspecified; only the set of
    /// records is deterministic.
    pub async fn scrape(
        &self,
        channel: &ChannelReference,
        refresh: bool,
        workers: usize,
    ) -> Result<Vec<VideoRecord>, ResolutionError> {
        Ok(self.scrape_detailed(channel, refresh, workers).await?.records)
    }

    pub async fn scrape_detailed(
        &self,
        channel: &ChannelReference,
        refresh: bool,
        workers: usize,
    ) -> Result<ScrapeOutcome, ResolutionError> {
        if !refresh {
            match self.cache.read(channel) {
                Ok(Some(entry)) => {
                    tracing::info!(channel = %channel, count = entry.records.len(), "using cached data");
                    return Ok(ScrapeOutcome {
                        records: entry.records,
                        from_cache: true,
                        requested: 0,
                        failed: 0,
                    });
                }
                Ok(None) => tracing::debug!(channel = %channel, "cache miss"),
                Err(err) => {
                    tracing::warn!(channel = %channel, error = %err, "cache unreadable, scraping instead")
                }
            }
        }

        let ids = self.resolve(channel).await?;
        let requested = ids.len();
        tracing::info!(channel = %channel, videos = requested, workers, "starting metadata scraping");

        let outcomes = self.fetch_all(ids, workers).await;
        let channel_name = channel.name();
        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(record) => records.push(record.with_channel(channel_name)),
                Err(failure) => tracing::warn!(
                    channel = %channel,
                    video = %failure.id,
                    error = %failure.cause,
                    "failed to fetch video"
                ),
            }
        }
        let failed = requested - records.len();
        tracing::info!(
            channel = %channel,
            requested,
            succeeded = records.len(),
            failed,
            "scrape finished"
        );

        if let Err(err) = self.cache.write(channel, &records) {
            tracing::warn!(channel = %channel, error = %err, "failed to cache scrape results");
        }

        Ok(ScrapeOutcome {
            records,
            from_cache: false,
            requested,
            failed,
        })
    }

    async fn resolve(&self, channel: &ChannelReference) -> Result<Vec<VideoId>, ResolutionError> {
        let resolver = self.resolver.clone();
        let target = channel.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&target))
            .await
            .map_err(|err| ResolutionError::Aborted {
                channel: channel.to_string(),
                reason: err.to_string(),
            })?
    }

    /// Exactly `min(workers, ids)` workers drain a shared queue, so no more
    /// than `workers` fetches are ever in flight. Outcomes land in a shared
    /// list as they complete; a worker that dies only loses the id it held.
    async fn fetch_all(&self, ids: Vec<VideoId>, workers: usize) -> Vec<FetchOutcome> {
        let requested = ids.len();
        let pool_size = workers.max(1).min(requested);
        let queue = Arc::new(Mutex::new(VecDeque::from(ids)));
        let outcomes = Arc::new(Mutex::new(Vec::with_capacity(requested)));
        let mut pool = JoinSet::new();

        for _ in 0..pool_size {
            let queue = Arc::clone(&queue);
            let outcomes = Arc::clone(&outcomes);
            let fetcher = self.fetcher.clone();
            pool.spawn_blocking(move || {
                loop {
                    let next = queue.lock().pop_front();
                    let Some(id) = next else {
                        break;
                    };
                    let outcome = fetcher.fetch(&id);
                    outcomes.lock().push(outcome);
                }
            });
        }

        let mut aborted = 0usize;
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                aborted += 1;
                tracing::error!(error = %err, "fetch worker aborted");
            }
        }

        let outcomes = std::mem::take(&mut *outcomes.lock());
        if aborted > 0 {
            tracing::error!(
                aborted_workers = aborted,
                lost = requested - outcomes.len(),
                "identifiers dropped by aborted fetch workers"
            );
        }
        outcomes
    }
}
