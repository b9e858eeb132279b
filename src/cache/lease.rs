//! In-memory leases protecting cache files from deletion.
//!
//! A lease is held by whoever depends on a key's file staying on disk: the
//! ledger for the whole lifetime of a fetch, and the partial-file server
//! while it copies bytes out. Sweeps and expiry checks consult the table and
//! leave leased keys alone.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use mediastash_common::CacheKey;

/// Reference counts of outstanding leases, keyed by cache-key string.
#[derive(Debug, Default, Clone)]
pub struct LeaseTable {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a lease on `key`. Released when the returned guard drops.
    pub fn acquire(&self, key: &CacheKey) -> CacheLease {
        let key = key.to_string();
        *self.inner.lock().entry(key.clone()).or_insert(0) += 1;
        CacheLease {
            table: self.clone(),
            key,
        }
    }

    /// Whether any lease is outstanding for the given key string.
    pub fn is_leased(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Outstanding leases on the given key string.
    pub fn count(&self, key: &str) -> usize {
        self.inner.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of distinct keys currently leased.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }

    fn release(&self, key: &str) {
        let mut map = self.inner.lock();
        if let Some(count) = map.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                map.remove(key);
            }
        }
    }
}

/// RAII guard for a lease on one cache key.
#[derive(Debug)]
pub struct CacheLease {
    table: LeaseTable,
    key: String,
}

impl CacheLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}
