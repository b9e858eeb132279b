use mediastash_common::{CacheKey, Error, ProgressEvent, Quality, ResourceId, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::download::Download;
use super::fetcher::{FetchProgress, FetchRequest, Fetcher};
use crate::cache::{CacheEntry, CacheLease, CacheStore, Lookup};
use crate::config::DownloadsConfig;
use crate::events::ProgressBroadcaster;

/// Result of [`DownloadManager::start_or_join`].
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// Already cached; nothing was started.
    Cached(CacheEntry),
    /// A new fetch was launched.
    Started(Arc<Download>),
    /// An identical fetch was already running.
    Joined(Arc<Download>),
}

impl StartOutcome {
    /// The in-flight download, if any.
    pub fn download(&self) -> Option<&Arc<Download>> {
        match self {
            Self::Cached(_) => None,
            Self::Started(d) | Self::Joined(d) => Some(d),
        }
    }
}

/// The download ledger.
///
/// Owns the map of in-flight fetches and the bounded executor they run on.
/// The cache lookup, the map lookup and the insert of a new download all
/// happen under one lock, and so does the removal after a fetch ends, which
/// is what keeps a key from ever being fetched twice at once.
pub struct DownloadManager {
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    events: ProgressBroadcaster,
    active: Mutex<HashMap<CacheKey, Arc<Download>>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    progress_interval: Duration,
    fetch_timeout: Duration,
}

impl DownloadManager {
    pub fn new(
        config: &DownloadsConfig,
        cache: Arc<CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        events: ProgressBroadcaster,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            fetcher,
            events,
            active: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            progress_interval: config.progress_interval(),
            fetch_timeout: config.fetch_timeout(),
        })
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn events(&self) -> &ProgressBroadcaster {
        &self.events
    }

    /// Return the cached file, join the running fetch, or start a new one.
    pub fn start_or_join(self: &Arc<Self>, resource: &ResourceId, quality: Quality) -> Result<StartOutcome> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let key = CacheKey::new(resource.clone(), quality);

        let (download, lease, stale) = {
            let mut active = self.active.lock();
            // Only a stat happens under the lock; a stale file is deleted
            // after it is released.
            let stale = match self.cache.lookup(&key) {
                Lookup::Hit(entry) => {
                    debug!(key = %key, "Cache hit");
                    return Ok(StartOutcome::Cached(entry));
                }
                Lookup::Stale(entry) => Some(entry),
                Lookup::Miss => None,
            };
            if let Some(existing) = active.get(&key) {
                debug!(key = %key, "Joining in-flight download");
                return Ok(StartOutcome::Joined(existing.clone()));
            }

            let lease = self.cache.lease(&key);
            let download = Arc::new(Download::new(
                key.clone(),
                self.cache.temp_path(&key),
                self.cache.final_path(&key),
                self.progress_interval,
            ));
            active.insert(key.clone(), download.clone());
            (download, lease, stale)
        };

        // The new fetch holds one lease; anyone else still reading keeps the
        // old file until the rename replaces it.
        if let Some(entry) = stale {
            self.cache.remove_stale(&entry, 1);
        }

        info!(
            resource_id = %resource,
            quality = %quality,
            threshold = download.buffer_threshold(),
            "Starting download"
        );
        self.tracker
            .spawn(self.clone().run_fetch(download.clone(), lease));

        Ok(StartOutcome::Started(download))
    }

    /// The in-flight download for a key, if any.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Download>> {
        self.active.lock().get(key).cloned()
    }

    /// Snapshot of every in-flight quality of a resource.
    pub fn status(&self, resource: &ResourceId) -> BTreeMap<Quality, ProgressEvent> {
        self.active
            .lock()
            .values()
            .filter(|d| d.resource_id() == resource)
            .map(|d| (d.quality(), d.event()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Stop accepting work, cancel running fetches and wait for their tasks.
    pub async fn shutdown(&self) {
        info!(active = self.active_count(), "Shutting down download manager");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn run_fetch(self: Arc<Self>, download: Arc<Download>, lease: CacheLease) {
        let key = download.key().clone();

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.ok(),
            _ = self.shutdown.cancelled() => None,
        };

        let result = match permit {
            None => Err(Error::ShuttingDown),
            Some(_permit) => {
                let request = FetchRequest {
                    resource_id: download.resource_id().clone(),
                    quality: download.quality(),
                    dest: download.temp_path().to_path_buf(),
                };
                let on_progress = |update: FetchProgress| self.on_progress(&download, update);
                tokio::select! {
                    result = tokio::time::timeout(
                        self.fetch_timeout,
                        self.fetcher.fetch(&request, &on_progress),
                    ) => result.unwrap_or_else(|_| {
                        Err(Error::fetch(&key, format!("timed out after {:?}", self.fetch_timeout)))
                    }),
                    _ = self.shutdown.cancelled() => Err(Error::ShuttingDown),
                }
            }
        };

        match result {
            Ok(bytes) => self.finish(&download, bytes).await,
            Err(e) => self.fail(&download, e).await,
        }
        drop(lease);
    }

    fn on_progress(&self, download: &Download, update: FetchProgress) {
        if download.update_progress(update) {
            self.events.offer(download.resource_id(), &download.event());
        }
    }

    async fn finish(&self, download: &Arc<Download>, bytes: u64) {
        let key = download.key();
        if let Err(e) = tokio::fs::rename(download.temp_path(), download.final_path()).await {
            self.fail(download, Error::from(e)).await;
            return;
        }

        {
            let mut active = self.active.lock();
            download.complete(bytes);
            retire(&mut active, download);
        }

        info!(key = %key, bytes, "Download complete");
        self.events
            .publish(download.resource_id(), ProgressEvent::complete(download.quality(), bytes))
            .await;
    }

    async fn fail(&self, download: &Arc<Download>, err: Error) {
        let key = download.key();
        let message = match &err {
            Error::Fetch { message, .. } => message.clone(),
            other => other.to_string(),
        };

        match tokio::fs::remove_file(download.temp_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, "Failed to remove temp file: {}", e),
        }

        {
            let mut active = self.active.lock();
            download.fail(message.clone());
            retire(&mut active, download);
        }

        if matches!(err, Error::ShuttingDown) {
            info!(key = %key, "Download cancelled by shutdown");
        } else {
            error!(key = %key, error = %message, "Download failed");
        }
        self.events
            .publish(
                download.resource_id(),
                ProgressEvent::failed(download.quality(), download.bytes_written(), message),
            )
            .await;
    }
}

/// Remove `download` from the ledger if it is still the registered entry.
fn retire(active: &mut HashMap<CacheKey, Arc<Download>>, download: &Arc<Download>) {
    if active
        .get(download.key())
        .is_some_and(|current| Arc::ptr_eq(current, download))
    {
        active.remove(download.key());
    }
}
