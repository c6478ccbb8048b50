//! Result cache with single-flight deduplication.
//!
//! Wraps an optional [`CacheStore`] backend. A lookup resolves to one of:
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | [`CacheLookup::Hit`] | A live stored entry; the store has already touched it |
//! | [`CacheLookup::Attached`] | Another caller computed the result while this one waited |
//! | [`CacheLookup::Lead`] | This caller must compute, then call [`ResultCache::complete`] |
//!
//! For each fingerprint at most one caller holds the lead at a time. The
//! lead is a [`FlightGuard`]; dropping it without completing (error,
//! timeout, cancellation) hands the lead to the next waiting caller.
//!
//! Store failures are logged and degrade to a miss. They never fail a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use study_distill_core::fingerprint::short;
use study_distill_core::models::CacheEntry;
use study_distill_core::store::{CacheStats, CacheStore};

use crate::config::CacheConfig;

/// Per-fingerprint rendezvous. Holds the published result once the leader
/// completes.
type Slot = Arc<AsyncMutex<Option<String>>>;
type FlightMap = Arc<Mutex<HashMap<String, Slot>>>;

pub enum CacheLookup {
    Hit(CacheEntry),
    Attached(String),
    Lead(FlightGuard),
}

/// Exclusive right to compute one fingerprint.
pub struct FlightGuard {
    fingerprint: String,
    slot: OwnedMutexGuard<Option<String>>,
    flights: FlightMap,
}

impl FlightGuard {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // The map holds one reference, the guard another; anything beyond
        // that is a caller waiting on this slot.
        let mut flights = lock_flights(&self.flights);
        release_slot(&mut flights, &self.fingerprint, 2);
    }
}

fn lock_flights(flights: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove the slot for `fingerprint` if no caller besides the current
/// holders (`holders`, counting the map) references it.
fn release_slot(flights: &mut HashMap<String, Slot>, fingerprint: &str, holders: usize) {
    if let Some(slot) = flights.get(fingerprint) {
        if Arc::strong_count(slot) <= holders {
            flights.remove(fingerprint);
        }
    }
}

pub struct ResultCache {
    store: Option<Arc<dyn CacheStore>>,
    retention_ms: i64,
    max_entries: usize,
    flights: FlightMap,
}

impl ResultCache {
    pub fn new(store: Option<Arc<dyn CacheStore>>, config: &CacheConfig) -> Self {
        let store = if config.enabled { store } else { None };
        Self {
            store,
            retention_ms: config.retention_ms(),
            max_entries: config.max_entries,
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.retention_ms)
    }

    /// Look up `fingerprint`, waiting behind an in-flight leader if there
    /// is one.
    pub async fn lookup(&self, fingerprint: &str) -> CacheLookup {
        if let Some(entry) = self.stored(fingerprint).await {
            return CacheLookup::Hit(entry);
        }

        let slot = {
            let mut flights = lock_flights(&self.flights);
            Arc::clone(
                flights
                    .entry(fingerprint.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(None))),
            )
        };

        let guard = slot.lock_owned().await;
        if let Some(result) = guard.as_ref() {
            debug!(fingerprint = short(fingerprint), "attached to in-flight result");
            let result = result.clone();
            let mut flights = lock_flights(&self.flights);
            // Map plus this caller's guard.
            release_slot(&mut flights, fingerprint, 2);
            drop(flights);
            drop(guard);
            return CacheLookup::Attached(result);
        }

        // The previous leader may have finished between our store read and
        // taking the slot without anyone waiting; re-check the store.
        if let Some(entry) = self.stored(fingerprint).await {
            let mut flights = lock_flights(&self.flights);
            release_slot(&mut flights, fingerprint, 2);
            drop(flights);
            drop(guard);
            return CacheLookup::Hit(entry);
        }

        CacheLookup::Lead(FlightGuard {
            fingerprint: fingerprint.to_string(),
            slot: guard,
            flights: Arc::clone(&self.flights),
        })
    }

    async fn stored(&self, fingerprint: &str) -> Option<CacheEntry> {
        let store = self.store.as_ref()?;
        let now = now_ms();
        match store.get(fingerprint, now, self.cutoff(now)).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(fingerprint = short(fingerprint), error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    /// Persist the leader's result and hand it to every waiting caller.
    pub async fn complete(&self, mut guard: FlightGuard, result: String) {
        if let Some(store) = &self.store {
            let now = now_ms();
            let entry = CacheEntry {
                fingerprint: guard.fingerprint.clone(),
                result: result.clone(),
                created_at: now,
                accessed_at: now,
                access_count: 1,
            };
            if let Err(e) = store.put(&entry).await {
                warn!(fingerprint = short(&guard.fingerprint), error = %e, "cache write failed");
            } else if let Err(e) = self.enforce_limits(store.as_ref(), now).await {
                warn!(error = %e, "cache maintenance failed");
            }
        }
        *guard.slot = Some(result);
    }

    /// Drop a stored entry, e.g. one that no longer deserializes.
    pub async fn invalidate(&self, fingerprint: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(fingerprint).await {
                warn!(fingerprint = short(fingerprint), error = %e, "cache invalidation failed");
            }
        }
    }

    async fn enforce_limits(&self, store: &dyn CacheStore, now: i64) -> Result<(u64, u64)> {
        let expired = store.prune_expired(self.cutoff(now)).await?;
        let evicted = store.evict_lru(self.max_entries).await?;
        if expired + evicted > 0 {
            debug!(expired, evicted, "cache pruned");
        }
        Ok((expired, evicted))
    }

    /// Remove expired entries, then enforce the LRU cap. Returns
    /// `(expired, evicted)`.
    pub async fn prune(&self) -> Result<(u64, u64)> {
        match &self.store {
            Some(store) => self.enforce_limits(store.as_ref(), now_ms()).await,
            None => Ok((0, 0)),
        }
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        match &self.store {
            Some(store) => store.stats().await,
            None => Ok(CacheStats::default()),
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        lock_flights(&self.flights).len()
    }

    pub async fn close(&self) {
        if let Some(store) = &self.store {
            store.close().await;
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
