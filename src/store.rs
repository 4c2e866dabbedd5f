#![forbid(unsafe_code)]

//! SQLite persistence for scraped videos.
//!
//! Two relations: `channels` (one row per channel name) and `videos` (one row
//! per permalink, pointing at its channel). Writes never overwrite: a video
//! whose `url` is already stored is skipped, so re-running a scrape over the
//! same channel is idempotent. Concurrent writers rely on the unique
//! constraints rather than on application locks.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result, bail};
use libsql::{Builder, Connection, Row, params};
use serde::Serialize;

use crate::record::VideoRecord;

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA busy_timeout=5000;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL REFERENCES channels(id),
            title TEXT NOT NULL,
            duration TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            published_date TEXT,
            description TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_videos_published_date ON videos(published_date);
        CREATE INDEX IF NOT EXISTS idx_videos_channel ON videos(channel_id);
        "#,
    )
    .await?;
    Ok(())
}

async fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let db = Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("opening video database {}", path.display()))?;
    let conn = db.connect()?;
    configure_connection(&conn).await?;
    ensure_schema(&conn).await?;
    Ok(conn)
}

/// Write side: the upserter.
#[derive(Debug)]
pub struct VideoStore {
    conn: Connection,
}

impl VideoStore {
    /// Opens (and if necessary creates) the database and provisions the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: open_connection(path).await?,
        })
    }

    /// Writes `records` in one transaction and returns how many video rows
    /// were actually inserted. Channels are created on first sight; videos
    /// whose `url` already exists are skipped, whichever channel they carry.
    pub async fn persist(&self, records: &[VideoRecord]) -> Result<u64> {
        for record in records {
            if record.url.is_empty() {
                bail!("refusing to persist a video without url ({:?})", record.title);
            }
            if record.channel_name.is_empty() {
                bail!("refusing to persist {} without a channel name", record.url);
            }
        }
        if records.is_empty() {
            return Ok(0);
        }

        let channel_names: BTreeSet<&str> = records
            .iter()
            .map(|record| record.channel_name.as_str())
            .collect();

        let tx = self.conn.transaction().await?;

        let mut channel_ids = HashMap::with_capacity(channel_names.len());
        for name in channel_names {
            tx.execute(
                "INSERT INTO channels (channel_name) VALUES (?1) ON CONFLICT(channel_name) DO NOTHING",
                params![name],
            )
            .await
            .with_context(|| format!("inserting channel {name}"))?;

            let mut rows = tx
                .query("SELECT id FROM channels WHERE channel_name = ?1", params![name])
                .await?;
            let row = rows
                .next()
                .await?
                .with_context(|| format!("channel {name} missing after insert"))?;
            let id: i64 = row.get(0)?;
            channel_ids.insert(name, id);
        }

        let mut inserted = 0u64;
        for record in records {
            let channel_id = channel_ids
                .get(record.channel_name.as_str())
                .copied()
                .with_context(|| format!("no channel id for {}", record.channel_name))?;
            let published_date = record.published_date_iso();
            inserted += tx
                .execute(
                    r#"
                    INSERT INTO videos (
                        channel_id, title, duration, url, published_date, description
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(url) DO NOTHING
                    "#,
                    params![
                        channel_id,
                        record.title.as_str(),
                        record.duration.to_string(),
                        record.url.as_str(),
                        published_date.as_deref(),
                        record.description.as_str(),
                    ],
                )
                .await
                .with_context(|| format!("inserting video {}", record.url))?;
        }

        tx.commit().await?;
        tracing::info!(
            submitted = records.len(),
            inserted,
            skipped = records.len() as u64 - inserted,
            "persisted videos"
        );
        Ok(inserted)
    }
}

/// One row of the dashboard join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogVideo {
    pub id: i64,
    pub channel_name: String,
    pub title: String,
    pub duration: String,
    pub url: String,
    pub published_date: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogChannel {
    pub id: i64,
    pub channel_name: String,
}

/// Read side used by the dashboard and by tests.
#[derive(Clone)]
pub struct CatalogReader {
    conn: Connection,
}

impl CatalogReader {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: open_connection(path.as_ref()).await?,
        })
    }

    /// Every video with its channel name, newest first; unknown dates sort last.
    pub async fn list_videos(&self) -> Result<Vec<CatalogVideo>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT v.id, c.channel_name, v.title, v.duration, v.url,
                       v.published_date, v.description
                FROM videos v
                JOIN channels c ON v.channel_id = c.id
                ORDER BY v.published_date IS NULL, v.published_date DESC, v.id DESC
                "#,
            )
            .await?;

        let mut rows = stmt.query(params![]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_catalog_video(&row)?);
        }
        Ok(videos)
    }

    pub async fn list_channels(&self) -> Result<Vec<CatalogChannel>> {
        let mut rows = self
            .conn
            .query("SELECT id, channel_name FROM channels ORDER BY id", params![])
            .await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(CatalogChannel {
                id: row.get(0)?,
                channel_name: row.get(1)?,
            });
        }
        Ok(channels)
    }
}

fn row_to_catalog_video(row: &Row) -> Result<CatalogVideo> {
    // Column order must match the SELECT in list_videos.
    Ok(CatalogVideo {
        id: row.get(0)?,
        channel_name: row.get(1)?,
        title: row.get(2)?,
        duration: row.get(3)?,
        url: row.get(4)?,
        published_date: row.get(5)?,
        description: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VideoDuration;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sample_video(id: &str, channel: &str) -> VideoRecord {
        VideoRecord {
            title: format!("Video {id}"),
            duration: VideoDuration::from_secs(125),
            url: format!("https://www.youtube.com/watch?v={id}"),
            published_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            description: "desc".into(),
            channel_name: channel.into(),
        }
    }

    /// Fresh store plus reader on a temp DB; the tempdir guard keeps it alive.
    async fn create_store() -> Result<(tempfile::TempDir, VideoStore, CatalogReader, PathBuf)> {
        let dir = tempdir()?;
        let path = dir.path().join("data/videos.db");
        let store = VideoStore::open(&path).await?;
        let reader = CatalogReader::new(&path).await?;
        Ok((dir, store, reader, path))
    }

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let (_temp, store, _reader, path) = create_store().await?;
        assert!(path.exists(), "database file should be created");

        for table in ["channels", "videos"] {
            let mut rows = store
                .conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                )
                .await?;
            let exists: Option<String> = rows
                .next()
                .await?
                .map(|row| row.get::<String>(0))
                .transpose()?;
            assert_eq!(exists.as_deref(), Some(table));
        }

        let mut rows = store.conn.query("PRAGMA foreign_keys", params![]).await?;
        let row = rows.next().await?.context("missing foreign_keys row")?;
        assert_eq!(row.get::<i64>(0)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn persist_links_videos_to_channels() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        let inserted = store
            .persist(&[
                sample_video("a", "@one"),
                sample_video("b", "@one"),
                sample_video("c", "@two"),
            ])
            .await?;
        assert_eq!(inserted, 3);

        let channels = reader.list_channels().await?;
        let names: Vec<&str> = channels.iter().map(|c| c.channel_name.as_str()).collect();
        assert_eq!(names, ["@one", "@two"]);

        let videos = reader.list_videos().await?;
        assert_eq!(videos.len(), 3);
        let c = videos.iter().find(|v| v.url.ends_with("=c")).unwrap();
        assert_eq!(c.channel_name, "@two");
        assert_eq!(c.duration, "00:02:05");
        assert_eq!(c.published_date.as_deref(), Some("2024-01-01"));
        Ok(())
    }

    #[tokio::test]
    async fn persist_twice_is_idempotent() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        let batch = vec![sample_video("a", "@one"), sample_video("b", "@one")];

        assert_eq!(store.persist(&batch).await?, 2);
        assert_eq!(store.persist(&batch).await?, 0);

        assert_eq!(reader.list_channels().await?.len(), 1);
        assert_eq!(reader.list_videos().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn partial_overlap_inserts_only_new_urls() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        store.persist(&[sample_video("a", "@one")]).await?;

        let mut changed = sample_video("a", "@one");
        changed.title = "Renamed".into();
        let inserted = store
            .persist(&[changed, sample_video("b", "@one")])
            .await?;
        assert_eq!(inserted, 1);

        let videos = reader.list_videos().await?;
        assert_eq!(videos.len(), 2);
        let a = videos.iter().find(|v| v.url.ends_with("=a")).unwrap();
        assert_eq!(a.title, "Video a", "first write wins");
        Ok(())
    }

    #[tokio::test]
    async fn shared_url_across_channels_is_stored_once() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        store.persist(&[sample_video("shared", "@first")]).await?;
        let inserted = store
            .persist(&[sample_video("shared", "@second"), sample_video("own", "@second")])
            .await?;
        assert_eq!(inserted, 1);

        let videos = reader.list_videos().await?;
        let shared: Vec<_> = videos.iter().filter(|v| v.url.ends_with("=shared")).collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].channel_name, "@first");
        // the second channel still exists in the dimension
        assert_eq!(reader.list_channels().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn shared_url_within_one_batch_keeps_first_record() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        let inserted = store
            .persist(&[sample_video("dup", "@first"), sample_video("dup", "@second")])
            .await?;
        assert_eq!(inserted, 1);
        let videos = reader.list_videos().await?;
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].channel_name, "@first");
        Ok(())
    }

    #[tokio::test]
    async fn list_videos_orders_newest_first_unknown_last() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        let mut old = sample_video("old", "@c");
        old.published_date = NaiveDate::from_ymd_opt(2023, 1, 1);
        let mut new = sample_video("new", "@c");
        new.published_date = NaiveDate::from_ymd_opt(2024, 5, 1);
        let mut unknown = sample_video("unknown", "@c");
        unknown.published_date = None;
        store.persist(&[unknown, old, new]).await?;

        let urls: Vec<String> = reader
            .list_videos()
            .await?
            .into_iter()
            .map(|v| v.url)
            .collect();
        assert!(urls[0].ends_with("=new"));
        assert!(urls[1].ends_with("=old"));
        assert!(urls[2].ends_with("=unknown"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_records_without_channel_or_url() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        let orphan = sample_video("x", "");
        assert!(store.persist(&[orphan]).await.is_err());

        let mut no_url = sample_video("y", "@c");
        no_url.url.clear();
        assert!(store.persist(&[sample_video("z", "@c"), no_url]).await.is_err());

        assert!(reader.list_videos().await?.is_empty());
        assert_eq!(store.persist(&[]).await?, 0);
        Ok(())
    }
}
