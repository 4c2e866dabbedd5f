#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ResolutionError;
use crate::platform::{ClientFactory, ExtractMode};
use crate::record::{ChannelReference, PLAYLIST_URL_PREFIX, VideoId};

/// Shallow channel metadata. Only the uploads pointer and the entry list are
/// read; everything else the platform returns is ignored.
#[derive(Debug, Default, Deserialize)]
struct ChannelListing {
    #[serde(default)]
    related_playlists: Option<RelatedPlaylists>,
    #[serde(default)]
    entries: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

impl ChannelListing {
    fn uploads_playlist(&self) -> Option<&str> {
        self.related_playlists
            .as_ref()
            .and_then(|related| related.uploads.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Turns a channel reference into the ordered list of its video ids.
#[derive(Clone)]
pub struct ChannelResolver {
    factory: Arc<dyn ClientFactory>,
}

impl ChannelResolver {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Prefers the channel's uploads collection (authoritative, newest first)
    /// and falls back to the channel's own entries. A channel with no videos
    /// is an empty list, not an error.
    pub fn resolve(&self, channel: &ChannelReference) -> Result<Vec<VideoId>, ResolutionError> {
        let mut client = self.factory.create();
        let raw = client
            .extract_info(channel.as_str(), ExtractMode::Flat)
            .map_err(|source| ResolutionError::Unreachable {
                channel: channel.to_string(),
                source,
            })?;
        let listing = parse_listing(channel, raw)?;

        let uploads = listing.uploads_playlist().map(str::to_string);
        let entries = match uploads {
            Some(playlist) => {
                let playlist_url = format!("{PLAYLIST_URL_PREFIX}{playlist}");
                tracing::info!(channel = %channel, %playlist_url, "using uploads collection");
                let raw = client
                    .extract_info(&playlist_url, ExtractMode::Flat)
                    .map_err(|source| ResolutionError::UploadsUnreachable {
                        channel: channel.to_string(),
                        playlist: playlist.clone(),
                        source,
                    })?;
                parse_listing(channel, raw)?.entries.unwrap_or_default()
            }
            None => {
                tracing::debug!(channel = %channel, "no uploads collection, using channel entries");
                listing.entries.unwrap_or_default()
            }
        };

        let (ids, skipped) = collect_ids(&entries);
        if skipped > 0 {
            tracing::warn!(channel = %channel, skipped, "skipped entries without a video id");
        }
        tracing::info!(channel = %channel, count = ids.len(), "resolved channel");
        Ok(ids)
    }
}

fn parse_listing(channel: &ChannelReference, raw: Value) -> Result<ChannelListing, ResolutionError> {
    if !raw.is_object() {
        return Err(ResolutionError::Unparsable {
            channel: channel.to_string(),
            reason: "listing is not a JSON object".into(),
        });
    }
    serde_json::from_value(raw).map_err(|err| ResolutionError::Unparsable {
        channel: channel.to_string(),
        reason: err.to_string(),
    })
}

/// Keeps listing order. Returns the ids plus how many entries had none.
fn collect_ids(entries: &[Value]) -> (Vec<VideoId>, usize) {
    let mut ids = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match entry.get("id").and_then(Value::as_str).and_then(VideoId::parse) {
            Some(id) => ids.push(id),
            None => skipped += 1,
        }
    }
    (ids, skipped)
}
