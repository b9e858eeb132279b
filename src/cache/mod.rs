//! Filesystem-backed cache of completed media files.
//!
//! Completed entries live at `{dir}/{key}.{ext}`, fetches in progress at
//! `{key}.{ext}.tmp`. Entries are added implicitly when a fetch renames its
//! temp file into place; this module looks them up, expires them, and keeps
//! the directory within its size budget.

mod lease;
pub mod sweep;

pub use lease::{CacheLease, LeaseTable};
pub use sweep::{CachedFile, RemovalReason, SweepPlan, SweepPolicy};

use mediastash_common::{paths, CacheKey};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

/// A completed, unexpired cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

/// Result of [`CacheStore::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(CacheEntry),
    /// The file exists but is empty or past its TTL.
    Stale(CacheEntry),
    Miss,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub orphans_removed: usize,
    pub expired_removed: usize,
    pub evicted: usize,
    pub skipped_in_use: usize,
    pub bytes_freed: u64,
    pub files_remaining: usize,
    pub bytes_remaining: u64,
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub temp_files: usize,
    pub temp_bytes: u64,
    pub max_size_bytes: u64,
    pub active_leases: usize,
}

/// The cache directory plus its expiry and budget policy.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    extension: String,
    policy: SweepPolicy,
    leases: LeaseTable,
}

impl CacheStore {
    /// Open the cache, creating its directory if needed.
    pub fn open(config: &CacheConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        Ok(Self {
            dir: config.dir.clone(),
            extension: config.extension.clone(),
            policy: SweepPolicy {
                ttl: config.ttl(),
                orphan_ttl: config.orphan_ttl(),
                max_size_bytes: config.max_size_bytes,
            },
            leases: LeaseTable::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn final_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(paths::final_file_name(key, &self.extension))
    }

    pub fn temp_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(paths::temp_file_name(key, &self.extension))
    }

    /// Take a lease that keeps `key`'s files from being deleted.
    pub fn lease(&self, key: &CacheKey) -> CacheLease {
        self.leases.acquire(key)
    }

    pub fn is_leased(&self, key: &CacheKey) -> bool {
        self.leases.is_leased(&key.to_string())
    }

    /// Stat the completed file for `key` without touching it.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let path = self.final_path(key);
        let Ok(meta) = std::fs::metadata(&path) else {
            return Lookup::Miss;
        };
        let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        let entry = CacheEntry {
            key: key.clone(),
            path,
            size_bytes: meta.len(),
            modified_at: modified,
        };

        if meta.len() == 0 || age > self.policy.ttl {
            debug!(key = %key, size = meta.len(), age_secs = age.as_secs(), "Stale cache entry");
            Lookup::Stale(entry)
        } else {
            Lookup::Hit(entry)
        }
    }

    /// Look up a completed entry.
    ///
    /// Missing, empty and expired files are misses; the latter two are
    /// deleted unless leased.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.lookup(key) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Stale(entry) => {
                self.remove_stale(&entry, 0);
                None
            }
            Lookup::Miss => None,
        }
    }

    /// Delete a stale entry unless leases beyond the caller's own `held`
    /// ones are outstanding. Returns whether the file was removed.
    pub fn remove_stale(&self, entry: &CacheEntry, held: usize) -> bool {
        let key = &entry.key;
        if self.leases.count(&key.to_string()) > held {
            debug!(key = %key, "Stale cache entry is in use, leaving it");
            return false;
        }
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                debug!(key = %key, size = entry.size_bytes, "Removed stale cache entry");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(key = %key, "Failed to remove stale cache entry: {}", e);
                false
            }
        }
    }

    /// Run all three sweep passes now.
    pub fn sweep(&self) -> std::io::Result<SweepReport> {
        self.sweep_at(SystemTime::now())
    }

    /// Run a sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: SystemTime) -> std::io::Result<SweepReport> {
        let files = self.list_files()?;
        let plan = sweep::plan_sweep(files, now, &self.policy, |key| self.leases.is_leased(key));

        let mut report = SweepReport {
            skipped_in_use: plan.skipped_in_use.len(),
            files_remaining: plan.files_remaining,
            bytes_remaining: plan.bytes_remaining,
            ..Default::default()
        };

        for file in &plan.skipped_in_use {
            debug!(key = %file.key, path = ?file.path, "Sweep skipped file in use");
        }

        for removal in plan.removals {
            let file = &removal.file;
            // A fetch may have leased the key after the listing was taken.
            if self.leases.is_leased(&file.key) {
                debug!(key = %file.key, path = ?file.path, "Sweep skipped file in use");
                report.skipped_in_use += 1;
                if !file.temp {
                    report.files_remaining += 1;
                    report.bytes_remaining += file.size;
                }
                continue;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = ?file.path, "Failed to remove cache file: {}", e);
                    continue;
                }
            }
            info!(
                key = %file.key,
                size = file.size,
                reason = %removal.reason,
                "Removed cache file"
            );
            report.bytes_freed += file.size;
            match removal.reason {
                RemovalReason::Orphan => report.orphans_removed += 1,
                RemovalReason::Expired => report.expired_removed += 1,
                RemovalReason::Size => report.evicted += 1,
            }
        }

        info!(
            orphans = report.orphans_removed,
            expired = report.expired_removed,
            evicted = report.evicted,
            skipped = report.skipped_in_use,
            remaining_bytes = report.bytes_remaining,
            "Cache sweep finished"
        );

        Ok(report)
    }

    /// Current usage of the cache directory.
    pub fn stats(&self) -> std::io::Result<CacheStats> {
        let files = self.list_files()?;
        let (temp, done): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| f.temp);
        Ok(CacheStats {
            entries: done.len(),
            total_bytes: done.iter().map(|f| f.size).sum(),
            temp_files: temp.len(),
            temp_bytes: temp.iter().map(|f| f.size).sum(),
            max_size_bytes: self.policy.max_size_bytes,
            active_leases: self.leases.active(),
        })
    }

    /// Run one sweep immediately and then every `interval` until cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let store = self.clone();
                match tokio::task::spawn_blocking(move || store.sweep()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Cache sweep failed: {}", e),
                    Err(e) => warn!("Cache sweep task panicked: {}", e),
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    fn list_files(&self) -> std::io::Result<Vec<CachedFile>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(key) = paths::key_from_file_name(name, &self.extension) else {
                continue;
            };
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            files.push(CachedFile {
                path: entry.path().to_path_buf(),
                key: key.to_string(),
                size: meta.len(),
                modified: meta.modified()?,
                temp: paths::is_temp_file(entry.path()),
            });
        }
        Ok(files)
    }
}
