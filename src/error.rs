#![forbid(unsafe_code)]

//! Error taxonomy shared by the scrape pipeline.
//!
//! Only `ResolutionError` ever fails a scrape call. `FetchFailure` is a value
//! collected per video and `CacheUnavailable` is downgraded to a cache miss or
//! a logged warning by the scraper. Duplicate rows are not errors at all: the
//! store skips them and reports an insert count of zero.

use std::path::PathBuf;

use thiserror::Error;

use crate::record::VideoId;

/// Failure talking to the video platform through a single client handle.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("unparsable platform response: {0}")]
    Parse(String),

    #[error("not available on the platform: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Parse(err.to_string())
    }
}

/// The channel itself could not be reached or its listing could not be read.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("channel {channel} unreachable: {source}")]
    Unreachable {
        channel: String,
        #[source]
        source: PlatformError,
    },

    #[error("uploads collection {playlist} of {channel} unreachable: {source}")]
    UploadsUnreachable {
        channel: String,
        playlist: String,
        #[source]
        source: PlatformError,
    },

    #[error("channel {channel} listing unparsable: {reason}")]
    Unparsable { channel: String, reason: String },

    #[error("channel resolution task for {channel} aborted: {reason}")]
    Aborted { channel: String, reason: String },
}

/// A single video could not be fetched. Tagged with the identifier so the
/// scraper can report which entries were dropped.
#[derive(Debug, Error)]
#[error("fetching video {id} failed: {cause}")]
pub struct FetchFailure {
    pub id: VideoId,
    #[source]
    pub cause: PlatformError,
}

/// The cache medium could not serve or accept an entry.
#[derive(Debug, Error)]
pub enum CacheUnavailable {
    #[error("cache IO on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("cache entry {path} belongs to {found}, not {expected}")]
    ForeignEntry {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("cache entry {path} has format version {found}, expected {expected}")]
    Incompatible {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}
