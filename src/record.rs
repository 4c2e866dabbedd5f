#![forbid(unsafe_code)]

//! Value types flowing through the pipeline and the normalization rules the
//! platform payloads go through before they become a `VideoRecord`.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Base for canonical video permalinks; the `url` column is keyed on these.
pub const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
pub const PLAYLIST_URL_PREFIX: &str = "https://www.youtube.com/playlist?list=";

// Tabs of a channel page; `@foo/videos` names the same channel as `@foo`.
const CHANNEL_TABS: &[&str] = &["videos", "shorts", "streams", "featured", "playlists"];

/// Caller-supplied channel URL or handle. Never modified after construction
/// apart from trimming surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelReference(String);

impl ChannelReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment that names the channel, ignoring query, fragment,
    /// trailing slashes and a trailing channel tab.
    /// `https://www.youtube.com/@foo/videos` becomes `@foo`.
    pub fn name(&self) -> &str {
        let without_fragment = self.0.split('#').next().unwrap_or_default();
        let without_query = without_fragment.split('?').next().unwrap_or_default();
        let mut segments = without_query
            .trim_end_matches('/')
            .rsplit('/')
            .filter(|segment| !segment.is_empty());
        let last = segments.next().unwrap_or_default();
        if CHANNEL_TABS.contains(&last) {
            segments.next().unwrap_or(last)
        } else {
            last
        }
    }
}

impl fmt::Display for ChannelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform identifier of a single video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Returns `None` for blank identifiers so listing entries without an id
    /// can be skipped.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("{WATCH_URL_PREFIX}{}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Video length in whole seconds. Displays as `HH:MM:SS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoDuration(u64);

impl VideoDuration {
    pub fn from_secs(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Platforms report durations as integers or floats and sometimes omit
    /// them. Anything missing, negative or non-finite becomes zero.
    pub fn from_platform(value: Option<f64>) -> Self {
        match value {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => Self(seconds.trunc() as u64),
            _ => Self(0),
        }
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VideoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.0 / 3600;
        let minutes = (self.0 % 3600) / 60;
        let seconds = self.0 % 60;
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// One scraped video. Built by the fetcher, labelled with its channel by the
/// scraper and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub title: String,
    pub duration: VideoDuration,
    pub url: String,
    pub published_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_name: String,
}

impl VideoRecord {
    pub fn with_channel(self, channel_name: &str) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            ..self
        }
    }

    /// ISO form of the publish date, or `None` when the platform did not
    /// provide a usable one.
    pub fn published_date_iso(&self) -> Option<String> {
        self.published_date
            .map(|date| date.format("%Y-%m-%d").to_string())
    }
}

/// Converts the platform's compact `YYYYMMDD` upload date into a calendar
/// date. Anything else is treated as unknown rather than guessed.
pub fn normalize_upload_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?.trim();
    if value.len() != 8 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}
