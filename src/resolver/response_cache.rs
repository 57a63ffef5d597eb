use crate::protocol::QueryKey;
use hickory_proto::rr::Record;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Entries never live shorter than this, whatever the upstream TTLs say
pub const DEFAULT_MIN_TTL: u32 = 10;

pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(10);

/// Answers to previous questions, each entry valid until its TTL runs out.
///
/// Expired entries are dropped lazily when read, and in bulk by the purge task
/// started with [`ResponseCache::spawn_purge`].
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<QueryKey, CacheEntry>>>,
    min_ttl: u32,
}

struct CacheEntry {
    expires_at: Instant,
    records: Vec<Record>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

impl ResponseCache {
    pub fn new(min_ttl: u32) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            min_ttl,
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Vec<Record>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = entries.get(key)?;
        if entry.is_expired(now) {
            trace!(%key, "Removing expired cache entry");
            entries.remove(key);
            return None;
        }
        Some(entry.records.clone())
    }

    /// Rewrites the TTL of every record to the reconciled entry TTL and caches
    /// a copy. Empty answers are never cached.
    pub fn put(&self, key: QueryKey, records: &mut [Record]) {
        if records.is_empty() {
            return;
        }

        let ttl = reconcile_ttl(records, self.min_ttl);
        for record in records.iter_mut() {
            record.set_ttl(ttl);
        }

        let entry = CacheEntry {
            expires_at: Instant::now() + Duration::from_secs(ttl.into()),
            records: records.to_vec(),
        };
        self.entries.lock().insert(key, entry);
    }

    /// Removes every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Purges expired entries every `period` until `shutdown` is cancelled or
    /// the cache is dropped.
    pub fn spawn_purge(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);
        tokio::spawn(purge_loop(entries, period, shutdown))
    }
}

async fn purge_loop(
    entries: Weak<Mutex<HashMap<QueryKey, CacheEntry>>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let purged = purge(&entries);
                if purged > 0 {
                    debug!(purged, "Purged expired cache entries");
                }
            }
        }
    }
    debug!("Cache purge task stopped");
}

// Liveness is decided under the same lock as the delete, so a concurrent put
// can never be lost to the sweep
fn purge(entries: &Mutex<HashMap<QueryKey, CacheEntry>>) -> usize {
    let now = Instant::now();
    let mut entries = entries.lock();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

/// The entry TTL is the smallest record TTL, raised to at least `floor`
pub fn reconcile_ttl(records: &[Record], floor: u32) -> u32 {
    records
        .iter()
        .map(Record::ttl)
        .min()
        .map_or(floor, |ttl| ttl.max(floor))
}
