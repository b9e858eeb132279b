use mediastash_common::SourceRef;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub downloads: DownloadsConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding completed and in-flight files
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Container extension of cached files (default: "mp4")
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Age after which a completed entry expires (default: 1h)
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Age after which an abandoned temp file is removed (default: 30m)
    #[serde(default = "default_orphan_ttl")]
    pub orphan_ttl_secs: u64,

    /// Total size budget for completed entries (default: 5 GiB)
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/mediastash-cache")
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn default_ttl() -> u64 {
    3600
}

fn default_orphan_ttl() -> u64 {
    1800
}

fn default_max_size() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            extension: default_extension(),
            ttl_secs: default_ttl(),
            orphan_ttl_secs: default_orphan_ttl(),
            max_size_bytes: default_max_size(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    /// Fetches allowed to run at once; later ones queue
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long /stream waits for the buffer threshold
    #[serde(default = "default_buffer_timeout")]
    pub buffer_timeout_secs: u64,

    /// Minimum spacing of incremental progress events
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Queue bound per progress subscriber
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    #[serde(default = "default_terminal_send_timeout")]
    pub terminal_send_timeout_secs: u64,

    /// Hard cap on a single fetch (default: 3h)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_buffer_timeout() -> u64 {
    60
}

fn default_progress_interval() -> u64 {
    250
}

fn default_subscriber_capacity() -> usize {
    10
}

fn default_terminal_send_timeout() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    3 * 60 * 60
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            buffer_timeout_secs: default_buffer_timeout(),
            progress_interval_ms: default_progress_interval(),
            subscriber_capacity: default_subscriber_capacity(),
            terminal_send_timeout_secs: default_terminal_send_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl DownloadsConfig {
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_secs(self.buffer_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn terminal_send_timeout(&self) -> Duration {
        Duration::from_secs(self.terminal_send_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between scheduled refresh runs (default: 4h)
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,

    /// Sources fetched in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Latest N records requested per source
    #[serde(default = "default_per_source_limit")]
    pub per_source_limit: usize,

    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    /// JSON file the fetched records are merged into
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,

    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    4 * 60 * 60
}

fn default_workers() -> usize {
    5
}

fn default_per_source_limit() -> usize {
    5
}

fn default_source_timeout() -> u64 {
    60
}

fn default_records_path() -> PathBuf {
    PathBuf::from("mediastash-records.json")
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_refresh_interval(),
            workers: default_workers(),
            per_source_limit: default_per_source_limit(),
            source_timeout_secs: default_source_timeout(),
            records_path: default_records_path(),
            sources: Vec::new(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// yt-dlp binary; looked up on PATH when unset
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// ffmpeg binary; looked up on PATH when unset
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Netscape cookies file handed to yt-dlp when present
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
}
