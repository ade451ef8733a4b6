use crate::{error::Result, types::ResourceAcls};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::RwLock as AsyncRwLock;
use tokio::time::Instant;
use tracing::debug;

/// Snapshot of every ACL in the cluster, grouped by resource
pub type AclSnapshot = Arc<Vec<ResourceAcls>>;

#[derive(Default)]
struct CacheState {
    valid: bool,
    snapshot: AclSnapshot,
}

/// Cached full ACL scan.
///
/// Readers take the read lock and return the snapshot when it is valid.
/// On a miss the write lock is taken and validity is checked again before
/// scanning: a concurrent caller may have filled the cache between the two
/// lock acquisitions, and skipping that re-check lets every waiter run its
/// own scan. At most one scan runs at a time and no reader ever sees a
/// partially filled snapshot.
#[derive(Default)]
pub struct AclCache {
    state: AsyncRwLock<CacheState>,
    cache_metrics: Mutex<CacheMetrics>,
}

impl std::fmt::Debug for AclCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclCache")
            .field("metrics", &*self.cache_metrics.lock())
            .finish_non_exhaustive()
    }
}

impl AclCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached snapshot, running `scan` to refill it when invalid
    pub async fn get_or_fill<F, Fut>(&self, scan: F) -> Result<AclSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ResourceAcls>>>,
    {
        {
            let state = self.state.read().await;
            if state.valid {
                self.cache_metrics.lock().record_hit();
                return Ok(Arc::clone(&state.snapshot));
            }
        }

        let mut state = self.state.write().await;
        // Mandatory re-check: another caller may have filled the cache while
        // we waited for the write lock.
        if state.valid {
            self.cache_metrics.lock().record_hit();
            return Ok(Arc::clone(&state.snapshot));
        }

        let start = Instant::now();
        let snapshot = Arc::new(scan().await?);
        self.cache_metrics.lock().record_scan(start.elapsed());
        debug!(resources = snapshot.len(), "ACL cache filled");

        state.snapshot = Arc::clone(&snapshot);
        state.valid = true;
        Ok(snapshot)
    }

    /// Drop the snapshot so the next read scans the cluster
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.valid = false;
        state.snapshot = AclSnapshot::default();
        self.cache_metrics.lock().record_invalidation();
    }

    pub async fn is_valid(&self) -> bool {
        self.state.read().await.valid
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.cache_metrics.lock().clone()
    }
}

/// Counters for cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub scans: u64,
    pub invalidations: u64,
    pub total_scan_time: Duration,
}

impl CacheMetrics {
    fn record_hit(&mut self) {
        self.hits += 1;
    }

    fn record_scan(&mut self, duration: Duration) {
        self.scans += 1;
        self.total_scan_time += duration;
    }

    fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }

    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.scans == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.scans) as f64
        }
    }
}
