#![forbid(unsafe_code)]

//! Point-in-time snapshot of a channel's last scrape, one JSON file per
//! channel. Entries never expire on their own; callers bypass them with the
//! refresh flag and every successful scrape overwrites its slot wholesale.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::CacheUnavailable;
use crate::record::{ChannelReference, VideoRecord};

/// Bumped whenever the serialized layout of `ScrapeCacheEntry` changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const HASH_SUFFIX_LEN: usize = 12;

/// Maps a channel reference to its file-name stem inside the cache directory.
pub type CacheKeyFn = Box<dyn Fn(&ChannelReference) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeCacheEntry {
    pub format_version: u32,
    pub channel: String,
    pub written_at: DateTime<Utc>,
    pub records: Vec<VideoRecord>,
}

/// Minimal header read before the full entry so an incompatible blob is
/// reported as such instead of as a confusing field error.
#[derive(Deserialize)]
struct EntryHeader {
    format_version: u32,
}

pub struct ScrapeCache {
    dir: PathBuf,
    key_fn: CacheKeyFn,
}

impl ScrapeCache {
    /// Cache rooted at `dir` using [`channel_cache_key`] for slot names.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_key_fn(dir, Box::new(channel_cache_key))
    }

    pub fn with_key_fn(dir: impl Into<PathBuf>, key_fn: CacheKeyFn) -> Self {
        Self {
            dir: dir.into(),
            key_fn,
        }
    }

    pub fn entry_path(&self, channel: &ChannelReference) -> PathBuf {
        self.dir.join(format!("{}.json", (self.key_fn)(channel)))
    }

    /// `Ok(None)` when nothing was cached for the channel yet. An entry
    /// written for a different reference (a key collision) is unavailable.
    pub fn read(
        &self,
        channel: &ChannelReference,
    ) -> Result<Option<ScrapeCacheEntry>, CacheUnavailable> {
        let path = self.entry_path(channel);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheUnavailable::Io { path, source }),
        };

        let header: EntryHeader =
            serde_json::from_slice(&raw).map_err(|err| CacheUnavailable::Corrupt {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        if header.format_version != CACHE_FORMAT_VERSION {
            return Err(CacheUnavailable::Incompatible {
                path,
                found: header.format_version,
                expected: CACHE_FORMAT_VERSION,
            });
        }

        let entry: ScrapeCacheEntry =
            serde_json::from_slice(&raw).map_err(|err| CacheUnavailable::Corrupt {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        if entry.channel != channel.as_str() {
            return Err(CacheUnavailable::ForeignEntry {
                path,
                found: entry.channel,
                expected: channel.to_string(),
            });
        }
        Ok(Some(entry))
    }

    /// Replaces the channel's slot with `records`. The new blob is written to
    /// a temporary file next to the slot and renamed over it, so readers see
    /// either the old entry or the new one.
    pub fn write(
        &self,
        channel: &ChannelReference,
        records: &[VideoRecord],
    ) -> Result<(), CacheUnavailable> {
        let path = self.entry_path(channel);
        let io_err = |source: std::io::Error| CacheUnavailable::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(|source| CacheUnavailable::Io {
            path: self.dir.clone(),
            source,
        })?;

        let entry = ScrapeCacheEntry {
            format_version: CACHE_FORMAT_VERSION,
            channel: channel.to_string(),
            written_at: Utc::now(),
            records: records.to_vec(),
        };
        let payload = serde_json::to_vec(&entry).map_err(|err| CacheUnavailable::Corrupt {
            path: path.clone(),
            reason: err.to_string(),
        })?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&payload).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

/// Default slot name: the channel's trailing path segment. Names containing
/// anything outside `[A-Za-z0-9@._-]` are sanitized and suffixed with a hash
/// of the full reference so two different references never collide.
pub fn channel_cache_key(channel: &ChannelReference) -> String {
    let name = channel.name();
    let is_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-');

    if !name.is_empty() && name.chars().all(is_safe) && !name.starts_with('.') {
        return name.to_string();
    }

    let hash = blake3::hash(channel.as_str().as_bytes()).to_hex();
    let suffix = &hash.as_str()[..HASH_SUFFIX_LEN];
    let sanitized: String = name
        .chars()
        .map(|c| if is_safe(c) { c } else { '_' })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        format!("channel-{suffix}")
    } else {
        format!("{sanitized}-{suffix}")
    }
}
