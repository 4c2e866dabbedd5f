#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{FetchFailure, PlatformError};
use crate::platform::{ClientFactory, ExtractMode};
use crate::record::{VideoDuration, VideoId, VideoRecord, normalize_upload_date};

/// Subset of the platform's single-video payload. Every field is optional
/// because older uploads frequently lack some of them.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: Option<String>,
    title: Option<String>,
    fulltitle: Option<String>,
    duration: Option<f64>,
    upload_date: Option<String>,
    description: Option<String>,
}

/// Fetches one video's metadata with a client handle of its own.
#[derive(Clone)]
pub struct MetadataFetcher {
    factory: Arc<dyn ClientFactory>,
}

impl MetadataFetcher {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Never panics on platform trouble: every failure comes back as a
    /// `FetchFailure` tagged with `id`.
    pub fn fetch(&self, id: &VideoId) -> Result<VideoRecord, FetchFailure> {
        let fail = |cause: PlatformError| FetchFailure {
            id: id.clone(),
            cause,
        };

        let mut client = self.factory.create();
        let raw = client
            .extract_info(&id.watch_url(), ExtractMode::Full)
            .map_err(fail)?;
        let info: VideoInfo =
            serde_json::from_value(raw).map_err(|err| fail(PlatformError::from(err)))?;

        let record = build_video_record(id, info);
        tracing::debug!(video = %id, title = %record.title, "fetched video");
        Ok(record)
    }
}

/// Applies the normalization rules: canonical duration, ISO date or unknown,
/// empty description instead of a missing one.
fn build_video_record(id: &VideoId, info: VideoInfo) -> VideoRecord {
    let canonical_id = info
        .id
        .as_deref()
        .and_then(VideoId::parse)
        .unwrap_or_else(|| id.clone());

    VideoRecord {
        title: info.title.or(info.fulltitle).unwrap_or_default(),
        duration: VideoDuration::from_platform(info.duration),
        url: canonical_id.watch_url(),
        published_date: normalize_upload_date(info.upload_date.as_deref()),
        description: info.description.unwrap_or_default(),
        channel_name: String::new(),
    }
}
