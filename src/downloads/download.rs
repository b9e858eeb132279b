//! A single in-flight fetch as seen by its waiters.

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use mediastash_common::{
    CacheKey, DownloadStatus, Error, ProgressEvent, Quality, ResourceId, Result,
};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use super::fetcher::{FetchPhase, FetchProgress};

/// Live counters of a download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub status: DownloadStatus,
    pub bytes_written: u64,
    pub bytes_total: u64,
    pub error: Option<String>,
}

/// Shared descriptor of one fetch.
///
/// Only the owning fetch task mutates it. Counters live in a `watch`
/// channel so any number of waiters can block on their own threshold,
/// while the buffer-ready gate is a separate one-shot that opens once the
/// quality's threshold is crossed or the download ends.
pub struct Download {
    key: CacheKey,
    temp_path: PathBuf,
    final_path: PathBuf,
    started_at: DateTime<Utc>,
    threshold: u64,
    progress: watch::Sender<Progress>,
    ready: watch::Sender<bool>,
    throttle: DefaultDirectRateLimiter,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("key", &self.key)
            .field("progress", &*self.progress.borrow())
            .field("ready", &*self.ready.borrow())
            .finish_non_exhaustive()
    }
}

impl Download {
    pub fn new(key: CacheKey, temp_path: PathBuf, final_path: PathBuf, progress_interval: Duration) -> Self {
        let quota = Quota::with_period(progress_interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        let threshold = key.quality().buffer_threshold();
        Self {
            key,
            temp_path,
            final_path,
            started_at: Utc::now(),
            threshold,
            progress: watch::Sender::new(Progress::default()),
            ready: watch::Sender::new(false),
            throttle: RateLimiter::direct(quota),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn resource_id(&self) -> &ResourceId {
        self.key.resource_id()
    }

    pub fn quality(&self) -> Quality {
        self.key.quality()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Bytes needed before playback of this download may start.
    pub fn buffer_threshold(&self) -> u64 {
        self.threshold
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Where the bytes currently live: the temp file while in flight, the
    /// cache file once complete.
    pub fn readable_path(&self) -> &Path {
        if self.status() == DownloadStatus::Complete {
            &self.final_path
        } else {
            &self.temp_path
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress.borrow().clone()
    }

    pub fn status(&self) -> DownloadStatus {
        self.progress.borrow().status
    }

    /// Bytes that are safe to read right now.
    pub fn bytes_written(&self) -> u64 {
        self.progress.borrow().bytes_written
    }

    pub fn bytes_total(&self) -> u64 {
        self.progress.borrow().bytes_total
    }

    pub fn error(&self) -> Option<String> {
        self.progress.borrow().error.clone()
    }

    pub fn is_buffer_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Snapshot as a wire event.
    pub fn event(&self) -> ProgressEvent {
        let p = self.progress.borrow();
        let mut event = ProgressEvent::new(self.quality(), p.status, p.bytes_written, p.bytes_total);
        event.error = p.error.clone();
        if p.status == DownloadStatus::Complete {
            event.percent = 100.0;
        }
        event
    }

    /// Record a progress report from the fetcher.
    ///
    /// Returns whether an event should be forwarded to subscribers: phase
    /// changes always are, plain byte updates at most once per throttle
    /// period.
    pub fn update_progress(&self, update: FetchProgress) -> bool {
        let status = match update.phase {
            FetchPhase::Fetching => DownloadStatus::Fetching,
            FetchPhase::Muxing => DownloadStatus::Muxing,
        };
        let mut phase_changed = false;
        let mut crossed = false;
        self.progress.send_if_modified(|p| {
            if p.status.is_terminal() {
                return false;
            }
            phase_changed = p.status != status;
            p.status = status;
            p.bytes_written = p.bytes_written.max(update.bytes_written);
            p.bytes_total = update.bytes_total;
            crossed = p.bytes_written >= self.threshold;
            true
        });
        if crossed {
            self.open_gate();
        }
        phase_changed || self.throttle.check().is_ok()
    }

    /// Mark the fetch finished with `bytes` in the final file.
    pub(crate) fn complete(&self, bytes: u64) {
        self.progress.send_modify(|p| {
            p.status = DownloadStatus::Complete;
            p.bytes_written = p.bytes_written.max(bytes);
            p.bytes_total = p.bytes_written;
        });
        self.open_gate();
    }

    /// Mark the fetch failed.
    pub(crate) fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.progress.send_modify(|p| {
            p.status = DownloadStatus::Error;
            p.error = Some(message);
        });
        self.open_gate();
    }

    /// Open the buffer-ready gate. Returns true only for the call that
    /// actually opened it.
    fn open_gate(&self) -> bool {
        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Block until `threshold` bytes are readable or the download ends.
    ///
    /// A completed download always satisfies the wait; a failed one yields
    /// [`Error::Fetch`]. Expiry of `timeout` only ends this caller's wait.
    pub async fn wait_for_buffer(&self, threshold: u64, timeout: Duration) -> Result<()> {
        let mut rx = self.progress.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|p| p.status.is_terminal() || p.bytes_written >= threshold)
                .await
                .map(|p| (*p).clone())
        })
        .await;

        match waited {
            Err(_) => Err(Error::BufferTimeout {
                key: self.key.to_string(),
                waited: timeout,
            }),
            Ok(Err(_)) => Err(Error::internal("download state dropped")),
            Ok(Ok(p)) if p.status == DownloadStatus::Error => Err(Error::fetch(
                &self.key,
                p.error.unwrap_or_else(|| "fetch failed".to_string()),
            )),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Wait for the buffer-ready gate using this download's own threshold.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.ready.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|opened| opened.map(|_| ()));
        match waited {
            Err(_) => Err(Error::BufferTimeout {
                key: self.key.to_string(),
                waited: timeout,
            }),
            Ok(Err(_)) => Err(Error::internal("download state dropped")),
            Ok(Ok(_)) => match self.progress() {
                Progress {
                    status: DownloadStatus::Error,
                    error,
                    ..
                } => Err(Error::fetch(
                    &self.key,
                    error.unwrap_or_else(|| "fetch failed".to_string()),
                )),
                _ => Ok(()),
            },
        }
    }
}
