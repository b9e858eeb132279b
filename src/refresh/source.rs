//! Collaborators of the refresh scheduler: where the tracked sources come
//! from, how their latest items are fetched, and where records go.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mediastash_common::{Error, MediaRecord, Result, SourceRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ToolsConfig;
use crate::tools::{self, ToolCommand};

static SHORTS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"youtube\.com/shorts/[A-Za-z0-9_-]{11}").expect("valid regex")
});

/// Provides the set of sources to refresh.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn sources(&self) -> Result<Vec<SourceRef>>;
}

/// Fetches the latest items of one source.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn latest(&self, source: &SourceRef, limit: usize) -> Result<Vec<MediaRecord>>;
}

/// Persists fetched records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store `records` for `source`, returning how many were saved.
    async fn save(&self, source: &SourceRef, records: &[MediaRecord]) -> Result<usize>;
}

/// Sources listed in the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigCatalog {
    sources: Vec<SourceRef>,
}

impl ConfigCatalog {
    pub fn new(sources: Vec<SourceRef>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl SourceCatalog for ConfigCatalog {
    async fn sources(&self) -> Result<Vec<SourceRef>> {
        Ok(self.sources.clone())
    }
}

/// Lists a channel's latest uploads with `yt-dlp --flat-playlist`.
#[derive(Debug, Clone)]
pub struct YtDlpMetadataSource {
    ytdlp: PathBuf,
    cookie_args: Vec<String>,
    timeout: Duration,
}

impl YtDlpMetadataSource {
    pub fn new(config: &ToolsConfig, timeout: Duration) -> Self {
        Self {
            ytdlp: tools::ytdlp_path(config),
            cookie_args: tools::cookie_args(config),
            timeout,
        }
    }
}

#[async_trait]
impl MetadataSource for YtDlpMetadataSource {
    async fn latest(&self, source: &SourceRef, limit: usize) -> Result<Vec<MediaRecord>> {
        let out = ToolCommand::new(&self.ytdlp)
            .arg("--flat-playlist")
            .arg("--playlist-end")
            .arg(limit.to_string())
            .args(["--dump-json", "--no-warnings"])
            .args(self.cookie_args.iter().cloned())
            .arg(source.url.clone())
            .timeout(self.timeout)
            .execute()
            .await?;

        let records = parse_playlist_lines(&out.stdout, source);
        debug!(source = %source.name, records = records.len(), "Listed latest items");
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    #[serde(default)]
    width: Option<u32>,
}

/// One line of `--dump-json` output.
#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

impl PlaylistEntry {
    fn into_record(self, source: &SourceRef) -> MediaRecord {
        let url = self
            .webpage_url
            .or(self.url)
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id));
        let title = self.title.unwrap_or_default();
        let is_short = MediaRecord::title_marks_short(&title) || SHORTS_URL.is_match(&url);
        let published_at = self
            .timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| {
                self.upload_date
                    .as_deref()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc())
            });
        let thumbnail = self
            .thumbnail
            .or_else(|| {
                self.thumbnails
                    .into_iter()
                    .max_by_key(|t| t.width.unwrap_or(0))
                    .map(|t| t.url)
            })
            .or_else(|| Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", self.id)));

        MediaRecord {
            id: self.id,
            title,
            url,
            channel_name: self.channel.or(self.uploader).or_else(|| Some(source.name.clone())),
            duration_secs: self.duration,
            published_at,
            thumbnail,
            is_short,
        }
    }
}

/// Parse JSON-lines output, skipping lines that do not decode.
pub fn parse_playlist_lines(stdout: &str, source: &SourceRef) -> Vec<MediaRecord> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PlaylistEntry>(line) {
            Ok(entry) => Some(entry.into_record(source)),
            Err(e) => {
                debug!(source = %source.name, "Skipping undecodable line: {}", e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    source: String,
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    record: MediaRecord,
}

/// Upserts records by id into a JSON file.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Every stored record, keyed by id.
    pub async fn load(&self) -> Result<BTreeMap<String, MediaRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .map(|(id, stored)| (id, stored.record))
            .collect())
    }

    async fn read_all(&self) -> Result<BTreeMap<String, StoredRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::internal(format!("corrupt records file {:?}: {e}", self.path))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordSink for JsonFileSink {
    async fn save(&self, source: &SourceRef, records: &[MediaRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let mut all = self.read_all().await?;
        let now = Utc::now();
        for record in records {
            all.insert(
                record.id.clone(),
                StoredRecord {
                    source: source.name.clone(),
                    saved_at: now,
                    record: record.clone(),
                },
            );
        }

        let json = serde_json::to_vec_pretty(&all)
            .map_err(|e| Error::internal(format!("failed to encode records: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(path = ?self.path, "Failed to replace records file: {}", e);
            return Err(e.into());
        }
        Ok(records.len())
    }
}
