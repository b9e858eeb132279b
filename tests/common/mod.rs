//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temp cache dir, a test config, a
//! scripted in-process [`Fetcher`], and a full [`AppContext`]. The
//! [`with_server`](TestHarness::with_server) constructor starts Axum on a
//! random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediastash::config::Config;
use mediastash::downloads::{FetchProgress, FetchRequest, Fetcher, ProgressFn};
use mediastash::refresh::{
    ConfigCatalog, MetadataSource, RecordSink, RefreshPool, RefreshScheduler,
};
use mediastash::server::{create_router, AppContext};
use mediastash_common::{paths, CacheKey, Error, MediaRecord, Quality, Result, SourceRef};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

/// Writes `chunks` chunks of `chunk` bytes with a pause before each one,
/// optionally failing after a number of chunks.
pub struct ScriptedFetcher {
    chunks: usize,
    chunk: usize,
    delay: Duration,
    fail_after: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(chunks: usize, chunk: usize, delay: Duration) -> Self {
        Self {
            chunks,
            chunk,
            delay,
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn total_bytes(&self) -> u64 {
        (self.chunks * self.chunk) as u64
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressFn<'_>) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut file = tokio::fs::File::create(&request.dest).await?;
        let total = self.total_bytes();
        let mut written = 0u64;

        for i in 0..self.chunks {
            if self.fail_after == Some(i) {
                return Err(Error::fetch(request.key(), "scripted upstream failure"));
            }
            tokio::time::sleep(self.delay).await;
            file.write_all(&vec![(i % 251) as u8; self.chunk]).await?;
            file.flush().await?;
            written += self.chunk as u64;
            progress(FetchProgress::fetching(written, total));
        }

        progress(FetchProgress::muxing(written, total));
        file.sync_all().await?;
        Ok(written)
    }
}

/// Metadata source returning one record per source, failing for names
/// starting with `broken`.
pub struct ScriptedSource;

#[async_trait]
impl MetadataSource for ScriptedSource {
    async fn latest(&self, source: &SourceRef, limit: usize) -> Result<Vec<MediaRecord>> {
        if source.name.starts_with("broken") {
            return Err(Error::tool("yt-dlp", format!("{} is unavailable", source.name)));
        }
        Ok((0..limit.min(2))
            .map(|i| MediaRecord {
                id: format!("{}-{i}", source.name),
                title: format!("{} upload {i}", source.name),
                url: format!("{}/{i}", source.url),
                channel_name: Some(source.name.clone()),
                duration_secs: Some(60.0),
                published_at: None,
                thumbnail: None,
                is_short: false,
            })
            .collect())
    }
}

/// Record sink keeping everything in memory.
#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<(String, MediaRecord)>>,
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn save(&self, source: &SourceRef, records: &[MediaRecord]) -> Result<usize> {
        let mut stored = self.records.lock();
        stored.extend(records.iter().map(|r| (source.name.clone(), r.clone())));
        Ok(records.len())
    }
}

pub fn sources(names: &[&str]) -> Vec<SourceRef> {
    names
        .iter()
        .map(|name| SourceRef {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
        })
        .collect()
}

/// Config pointing at `dir`, with background refresh turned off.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.cache.dir = dir.path().to_path_buf();
    config.downloads.buffer_timeout_secs = 5;
    config.downloads.progress_interval_ms = 10;
    config.refresh.enabled = false;
    config.refresh.records_path = dir.path().join("records.json");
    config
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// temp cache directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub fetcher: Arc<ScriptedFetcher>,
    pub sink: Arc<MemorySink>,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new(fetcher: ScriptedFetcher) -> Self {
        Self::with_config(fetcher, |_| {})
    }

    /// Create a harness, letting the caller adjust the test config.
    pub fn with_config(fetcher: ScriptedFetcher, adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = test_config(&dir);
        adjust(&mut config);

        let fetcher = Arc::new(fetcher);
        let sink = Arc::new(MemorySink::default());
        let scheduler = RefreshScheduler::new(
            Arc::new(ConfigCatalog::new(config.refresh.sources.clone())),
            Arc::new(ScriptedSource),
            sink.clone(),
            RefreshPool::new(
                config.refresh.workers,
                config.refresh.per_source_limit,
                config.refresh.source_timeout(),
            ),
            config.refresh.interval(),
        );

        let ctx = AppContext::new(config, fetcher.clone(), scheduler)
            .expect("failed to build app context");

        Self {
            ctx,
            fetcher,
            sink,
            dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(fetcher: ScriptedFetcher) -> (Self, SocketAddr) {
        Self::with_server_config(fetcher, |_| {}).await
    }

    pub async fn with_server_config(
        fetcher: ScriptedFetcher,
        adjust: impl FnOnce(&mut Config),
    ) -> (Self, SocketAddr) {
        let harness = Self::with_config(fetcher, adjust);
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Place a completed file of `bytes` into the cache.
    pub fn cache_file(&self, resource_id: &str, quality: Quality, bytes: &[u8]) -> CacheKey {
        let key = CacheKey::new(resource_id.parse().expect("valid resource id"), quality);
        let name = paths::final_file_name(&key, &self.ctx.config.cache.extension);
        std::fs::write(self.dir.path().join(name), bytes).expect("failed to write cache file");
        key
    }

    /// Wait until nothing is in flight.
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.ctx.downloads.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("downloads did not settle");
    }
}
