//! Sweep planning.
//!
//! Planning is pure: it takes a listing of the cache directory and decides
//! what to delete, so the three passes can be tested without touching disk.
//! Passes run in order: orphaned temp files, expired entries, then
//! oldest-first eviction until completed entries fit the size budget.

use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// One file found in the cache directory.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub path: PathBuf,
    /// Cache-key string the file belongs to.
    pub key: String,
    pub size: u64,
    pub modified: SystemTime,
    pub temp: bool,
}

impl CachedFile {
    fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }
}

/// Limits a sweep enforces.
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    pub ttl: Duration,
    pub orphan_ttl: Duration,
    pub max_size_bytes: u64,
}

/// Why a file was removed. Ordered by the pass that removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalReason {
    Orphan,
    Expired,
    Size,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orphan => write!(f, "orphaned temp file"),
            Self::Expired => write!(f, "expired"),
            Self::Size => write!(f, "over size budget"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Removal {
    pub file: CachedFile,
    pub reason: RemovalReason,
}

#[derive(Debug, Default)]
pub struct SweepPlan {
    pub removals: Vec<Removal>,
    /// Files that qualified for removal but are leased.
    pub skipped_in_use: Vec<CachedFile>,
    /// Completed entries left after the plan is applied.
    pub files_remaining: usize,
    pub bytes_remaining: u64,
}

/// Decide which files a sweep removes.
pub fn plan_sweep<F>(
    files: Vec<CachedFile>,
    now: SystemTime,
    policy: &SweepPolicy,
    is_leased: F,
) -> SweepPlan
where
    F: Fn(&str) -> bool,
{
    let mut plan = SweepPlan::default();
    let mut survivors = Vec::new();

    for file in files {
        let reason = if file.temp {
            (file.age(now) > policy.orphan_ttl).then_some(RemovalReason::Orphan)
        } else {
            (file.age(now) > policy.ttl).then_some(RemovalReason::Expired)
        };

        match reason {
            Some(_) if is_leased(&file.key) => {
                if !file.temp {
                    survivors.push(file.clone());
                }
                plan.skipped_in_use.push(file);
            }
            Some(reason) => plan.removals.push(Removal { file, reason }),
            None if file.temp => {}
            None => survivors.push(file),
        }
    }

    plan.removals.sort_by_key(|r| r.reason);

    let mut total: u64 = survivors.iter().map(|f| f.size).sum();
    if total > policy.max_size_bytes {
        survivors.sort_by_key(|f| f.modified);
        let mut kept = Vec::with_capacity(survivors.len());
        for file in survivors {
            if total <= policy.max_size_bytes {
                kept.push(file);
            } else if is_leased(&file.key) {
                if !plan.skipped_in_use.iter().any(|s| s.path == file.path) {
                    plan.skipped_in_use.push(file.clone());
                }
                kept.push(file);
            } else {
                total -= file.size;
                plan.removals.push(Removal {
                    file,
                    reason: RemovalReason::Size,
                });
            }
        }
        survivors = kept;
    }

    plan.files_remaining = survivors.len();
    plan.bytes_remaining = total;
    plan
}
