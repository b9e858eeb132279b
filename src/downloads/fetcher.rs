//! The fetch+mux collaborator.
//!
//! A [`Fetcher`] writes a resource's bytes incrementally to a destination
//! path and reports progress as it goes. The ledger only depends on the
//! trait; [`YtDlpFetcher`] is the production implementation.

use async_trait::async_trait;
use mediastash_common::{CacheKey, Error, Quality, ResourceId, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::tools::{self, ToolCommand};

const CHUNK_SIZE: usize = 64 * 1024;

/// Longest stderr tail kept for error messages.
const STDERR_TAIL: usize = 2048;

/// What to fetch and where to write it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub resource_id: ResourceId,
    pub quality: Quality,
    pub dest: PathBuf,
}

impl FetchRequest {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.resource_id.clone(), self.quality)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Fetching,
    /// All bytes are written; the tool is finalizing.
    Muxing,
}

/// A progress report from a fetcher.
///
/// `bytes_written` must only count bytes already readable at the
/// destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub bytes_written: u64,
    /// Estimated final size, zero if unknown.
    pub bytes_total: u64,
    pub phase: FetchPhase,
}

impl FetchProgress {
    pub fn fetching(bytes_written: u64, bytes_total: u64) -> Self {
        Self {
            bytes_written,
            bytes_total,
            phase: FetchPhase::Fetching,
        }
    }

    pub fn muxing(bytes_written: u64, bytes_total: u64) -> Self {
        Self {
            bytes_written,
            bytes_total,
            phase: FetchPhase::Muxing,
        }
    }
}

/// Progress callback handed to a fetcher.
pub type ProgressFn<'a> = &'a (dyn Fn(FetchProgress) + Send + Sync);

/// Retrieves a resource into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the resource to `request.dest`, calling `progress` as bytes
    /// land. Returns the final byte count.
    async fn fetch(&self, request: &FetchRequest, progress: ProgressFn<'_>) -> Result<u64>;
}

/// Resolves stream URLs with yt-dlp and remuxes them with ffmpeg into a
/// fragmented MP4 written straight to the destination.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    ytdlp: PathBuf,
    ffmpeg: PathBuf,
    cookie_args: Vec<String>,
    resolve_timeout: Duration,
}

impl YtDlpFetcher {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            ytdlp: tools::ytdlp_path(config),
            ffmpeg: tools::ffmpeg_path(config),
            cookie_args: tools::cookie_args(config),
            resolve_timeout: Duration::from_secs(120),
        }
    }

    /// Ask yt-dlp for the direct stream URLs of a resource.
    async fn resolve(&self, request: &FetchRequest) -> Result<ResolvedStreams> {
        let out = ToolCommand::new(&self.ytdlp)
            .args(["-J", "--no-playlist", "--no-warnings", "--force-ipv4"])
            .arg("--format")
            .arg(format_selector(request.quality))
            .args(self.cookie_args.iter().cloned())
            .arg(watch_url(&request.resource_id))
            .timeout(self.resolve_timeout)
            .execute()
            .await?;

        let info: InfoJson = serde_json::from_str(&out.stdout)
            .map_err(|e| Error::tool(tools::YTDLP, format!("unparseable JSON: {e}")))?;
        ResolvedStreams::from_info(info)
            .ok_or_else(|| Error::fetch(request.key(), "yt-dlp returned no stream URLs"))
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressFn<'_>) -> Result<u64> {
        let key = request.key();
        let streams = self.resolve(request).await?;
        debug!(
            key = %key,
            inputs = streams.urls.len(),
            estimated = streams.estimated_size,
            "Resolved stream URLs"
        );

        let mut cmd = ToolCommand::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        for url in &streams.urls {
            cmd.arg("-i").arg(url.clone());
        }
        if streams.urls.len() > 1 {
            cmd.args(["-map", "0:v:0", "-map", "1:a:0"]);
        }
        cmd.args([
            "-c",
            "copy",
            "-f",
            "mp4",
            "-movflags",
            "frag_keyframe+empty_moov",
            "pipe:1",
        ]);

        let mut child = cmd
            .command()
            .spawn()
            .map_err(|e| Error::tool(tools::FFMPEG, format!("failed to spawn: {e}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("ffmpeg stdout not captured"))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                let text = String::from_utf8_lossy(&buf).to_string();
                let start = text.len().saturating_sub(STDERR_TAIL);
                text.get(start..).unwrap_or_default().trim().to_string()
            })
        });

        let mut file = tokio::fs::File::create(&request.dest).await?;
        let total = streams.estimated_size;
        let mut written: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            file.flush().await?;
            written += n as u64;
            progress(FetchProgress::fetching(written, total.max(written)));
        }

        progress(FetchProgress::muxing(written, total.max(written)));
        let status = child.wait().await?;
        file.sync_all().await?;

        if !status.success() {
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            return Err(Error::fetch(
                key,
                format!("ffmpeg exited with status {status}: {stderr}"),
            ));
        }
        if written == 0 {
            return Err(Error::fetch(key, "ffmpeg produced no output"));
        }

        info!(key = %key, bytes = written, "Fetch finished");
        Ok(written)
    }
}

fn watch_url(resource_id: &ResourceId) -> String {
    format!("https://www.youtube.com/watch?v={resource_id}")
}

/// yt-dlp format selector for a quality. Up to 1080p prefers H.264 for
/// player compatibility; higher tiers accept any codec.
pub fn format_selector(quality: Quality) -> String {
    match quality {
        Quality::Audio => "bestaudio[ext=m4a]/bestaudio".to_string(),
        Quality::Best => "bestvideo+bestaudio/best".to_string(),
        q => {
            let h = q.height().unwrap_or(720);
            if h <= 1080 {
                format!(
                    "bestvideo[height<={h}][vcodec^=avc1]+bestaudio/bestvideo[height<={h}]+bestaudio/best[height<={h}]"
                )
            } else {
                format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FormatJson {
    url: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

impl FormatJson {
    fn size(&self) -> u64 {
        self.filesize.or(self.filesize_approx).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    requested_formats: Vec<FormatJson>,
    #[serde(flatten)]
    single: FormatJson,
}

#[derive(Debug, PartialEq)]
struct ResolvedStreams {
    urls: Vec<String>,
    estimated_size: u64,
}

impl ResolvedStreams {
    fn from_info(info: InfoJson) -> Option<Self> {
        let formats = if info.requested_formats.is_empty() {
            vec![info.single]
        } else {
            info.requested_formats
        };
        let estimated_size = formats.iter().map(FormatJson::size).sum();
        let urls: Vec<String> = formats.into_iter().filter_map(|f| f.url).collect();
        (!urls.is_empty()).then_some(Self {
            urls,
            estimated_size,
        })
    }
}
