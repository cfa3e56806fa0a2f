//! Notes cache keyed by (fingerprint, tier) with single-flight production.
//!
//! Concurrent misses for the same key coalesce onto one producer: the first caller
//! registers a broadcast channel in the in-flight table and runs the producer, later
//! callers subscribe and wait for its outcome. The table mutex only guards map
//! bookkeeping and is never held across an await, so unrelated keys never contend on a
//! production. Failed or timed-out productions are broadcast to their waiters and then
//! forgotten, so the next call starts a fresh production.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::{PipelineError, PipelineResult};
use super::generation::with_deadline;
use super::types::{ContentFingerprint, GeneratedNotes, NotesArtifact, Tier};

type CacheKey = (ContentFingerprint, Tier);
type Outcome = PipelineResult<Arc<NotesArtifact>>;

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub artifact: Arc<NotesArtifact>,
    pub was_cache_hit: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub failures: u64,
}

#[derive(Default)]
struct CacheTable {
    entries: HashMap<CacheKey, Arc<NotesArtifact>>,
    in_flight: HashMap<CacheKey, broadcast::Sender<Outcome>>,
}

enum Slot {
    Hit(Arc<NotesArtifact>),
    Wait(broadcast::Receiver<Outcome>),
    Produce(broadcast::Sender<Outcome>),
}

pub struct ContentCache {
    table: Mutex<CacheTable>,
    production_timeout: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl ContentCache {
    pub fn new(production_timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(CacheTable::default()),
            production_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Returns the artifact for `(fingerprint, tier)`, running `producer` at most once per
    /// key across concurrent callers when it is missing.
    pub async fn get_or_create<F, Fut>(
        &self,
        fingerprint: &ContentFingerprint,
        tier: Tier,
        producer: F,
    ) -> PipelineResult<CacheLookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<GeneratedNotes>>,
    {
        let key: CacheKey = (fingerprint.clone(), tier);

        let slot = {
            let mut table = self.table.lock();
            if let Some(artifact) = table.entries.get(&key) {
                Slot::Hit(Arc::clone(artifact))
            } else if let Some(sender) = table.in_flight.get(&key) {
                Slot::Wait(sender.subscribe())
            } else {
                let (sender, _) = broadcast::channel(1);
                table.in_flight.insert(key.clone(), sender.clone());
                Slot::Produce(sender)
            }
        };

        match slot {
            Slot::Hit(artifact) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.short(), %tier, "notes cache hit");
                Ok(CacheLookup {
                    artifact,
                    was_cache_hit: true,
                })
            }
            Slot::Wait(mut receiver) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.short(), %tier, "waiting on in-flight notes production");
                match receiver.recv().await {
                    Ok(outcome) => outcome.map(|artifact| CacheLookup {
                        artifact,
                        was_cache_hit: false,
                    }),
                    Err(_) => Err(PipelineError::generation(
                        "in-flight notes production was abandoned",
                    )),
                }
            }
            Slot::Produce(sender) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let guard = InFlightGuard {
                    cache: self,
                    key: Some(key),
                };
                let started = Instant::now();

                let produced = with_deadline(self.production_timeout, "notes production", producer()).await;
                let outcome: Outcome = produced.and_then(|notes| {
                    if notes.text.trim().is_empty() {
                        Err(PipelineError::generation("summarizer returned empty notes"))
                    } else {
                        Ok(Arc::new(NotesArtifact {
                            fingerprint: fingerprint.clone(),
                            tier,
                            title: notes.title,
                            text: notes.text,
                            created_at: Utc::now(),
                        }))
                    }
                });

                guard.complete(&outcome);
                match &outcome {
                    Ok(_) => debug!(
                        fingerprint = %fingerprint.short(),
                        %tier,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        waiters = sender.receiver_count(),
                        "notes produced"
                    ),
                    Err(err) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            fingerprint = %fingerprint.short(),
                            %tier,
                            error = %err,
                            waiters = sender.receiver_count(),
                            "notes production failed"
                        );
                    }
                }

                let _ = sender.send(outcome.clone());
                outcome.map(|artifact| CacheLookup {
                    artifact,
                    was_cache_hit: false,
                })
            }
        }
    }

    pub fn get(&self, fingerprint: &ContentFingerprint, tier: Tier) -> Option<Arc<NotesArtifact>> {
        self.table
            .lock()
            .entries
            .get(&(fingerprint.clone(), tier))
            .cloned()
    }

    /// Drops a stored artifact. Eviction policy itself belongs to the caller.
    pub fn invalidate(&self, fingerprint: &ContentFingerprint, tier: Tier) -> bool {
        self.table
            .lock()
            .entries
            .remove(&(fingerprint.clone(), tier))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = {
            let table = self.table.lock();
            (table.entries.len(), table.in_flight.len())
        };
        CacheStats {
            entries,
            in_flight,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-flight marker even when the producing future is dropped mid-flight,
/// which closes the channel and releases every waiter.
struct InFlightGuard<'a> {
    cache: &'a ContentCache,
    key: Option<CacheKey>,
}

impl InFlightGuard<'_> {
    fn complete(mut self, outcome: &Outcome) {
        if let Some(key) = self.key.take() {
            let mut table = self.cache.table.lock();
            table.in_flight.remove(&key);
            if let Ok(artifact) = outcome {
                table.entries.insert(key, Arc::clone(artifact));
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.table.lock().in_flight.remove(&key);
        }
    }
}
