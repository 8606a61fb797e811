//! # Preload Cache
//!
//! Keeps upcoming playlist entries in memory as object URLs so the next file
//! starts without a network round trip.
//!
//! ## Policy
//!
//! - Count based: the engine preloads the next `preload_count` entries one
//!   after another, never in parallel.
//! - An entry is fresh for `cache_expiration_ms` after it was fetched. Stale
//!   entries stop being served immediately and are removed by the periodic
//!   sweep.
//! - A fetch in flight for a file is tracked so a second caller gets `None`
//!   instead of issuing a duplicate request.
//! - Every object URL is revoked exactly once: on eviction, on sweep, on
//!   `clear()`, or by the session that took it over through [`PreloadCache::take`].
//! - Fetches that complete after `clear()` are discarded.
//! - The in-flight mark is released when the fetching future finishes or is
//!   dropped, so an aborted preload task never blocks later preloads.
//! - The file the session is currently playing is never cached; a preload of
//!   it that completes late is discarded.

use bridge_traits::{Clock, MediaHost};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EvictionReason};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::source::AudioFetch;
use crate::types::PlaylistEntry;

/// A preloaded file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub file_id: String,
    pub data: Bytes,
    pub blob_url: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashSet<String>,
    /// File the session resolved last; preloading it would duplicate its blob.
    current: Option<String>,
    /// Bumped by `clear()`; fetches started under an older epoch are dropped.
    epoch: u64,
}

/// Releases a file's in-flight mark on every exit path of `preload`,
/// including cancellation of the owning task.
struct InFlight<'a> {
    state: &'a Mutex<CacheState>,
    file_id: String,
    epoch: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        // After clear() the set was already emptied and may hold a newer fetch.
        if state.epoch == self.epoch {
            state.in_flight.remove(&self.file_id);
        }
    }
}

pub struct PreloadCache {
    fetcher: Arc<dyn AudioFetch>,
    host: Arc<dyn MediaHost>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    event_bus: Option<Arc<EventBus>>,
    state: Mutex<CacheState>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl PreloadCache {
    pub fn new(
        fetcher: Arc<dyn AudioFetch>,
        host: Arc<dyn MediaHost>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            host,
            clock,
            ttl,
            event_bus: None,
            state: Mutex::new(CacheState::default()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.elapsed_since(entry.created_at) < self.ttl
    }

    /// Fetches `entry` into the cache.
    ///
    /// Returns the object URL when the file is (now) cached, `None` when a
    /// fetch for it is already running, the fetch failed, the file is the one
    /// currently playing, or the cache was cleared meanwhile.
    #[instrument(skip(self, entry), fields(file_id = %entry.id))]
    pub async fn preload(&self, entry: &PlaylistEntry) -> Option<String> {
        let in_flight = {
            let mut state = self.state.lock();
            if state.current.as_deref() == Some(entry.id.as_str()) {
                debug!("Skipping preload of the current file");
                return None;
            }
            if let Some(existing) = state.entries.get(&entry.id) {
                if self.is_fresh(existing) {
                    return Some(existing.blob_url.clone());
                }
            }
            if let Some(stale) = state.entries.remove(&entry.id) {
                self.host.revoke_object_url(&stale.blob_url);
                self.emit(CacheEvent::Evicted {
                    file_id: stale.file_id,
                    reason: EvictionReason::Expired,
                });
            }
            if !state.in_flight.insert(entry.id.clone()) {
                debug!("Preload already in flight");
                return None;
            }
            InFlight {
                state: &self.state,
                file_id: entry.id.clone(),
                epoch: state.epoch,
            }
        };
        let epoch = in_flight.epoch;

        let fetched = self.fetcher.fetch(entry).await;

        if self.state.lock().epoch != epoch {
            debug!("Cache cleared during preload; discarding result");
            return None;
        }

        let audio = match fetched {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "Preload failed");
                self.emit(CacheEvent::PreloadFailed {
                    file_id: entry.id.clone(),
                    message: e.to_string(),
                });
                return None;
            }
        };

        let blob_url = match self.host.create_object_url(audio.data.clone(), &audio.mime_type) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Could not create object URL for preload");
                self.emit(CacheEvent::PreloadFailed {
                    file_id: entry.id.clone(),
                    message: e.to_string(),
                });
                return None;
            }
        };

        let bytes = audio.data.len() as u64;
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                drop(state);
                self.host.revoke_object_url(&blob_url);
                return None;
            }
            if state.current.as_deref() == Some(entry.id.as_str()) {
                drop(state);
                debug!("File started playing during preload; discarding result");
                self.host.revoke_object_url(&blob_url);
                return None;
            }
            state.entries.insert(
                entry.id.clone(),
                CacheEntry {
                    file_id: entry.id.clone(),
                    data: audio.data,
                    blob_url: blob_url.clone(),
                    mime_type: audio.mime_type,
                    created_at: self.clock.now(),
                },
            );
        }

        debug!(bytes, "Preloaded");
        self.emit(CacheEvent::Preloaded {
            file_id: entry.id.clone(),
            bytes,
        });
        Some(blob_url)
    }

    /// Preloads `entries` one at a time.
    pub async fn preload_upcoming(&self, entries: &[PlaylistEntry]) {
        for entry in entries {
            self.preload(entry).await;
        }
    }

    /// Records the file the session is about to play. Late preloads of it
    /// are dropped instead of cached.
    pub fn set_current(&self, file_id: Option<&str>) {
        self.state.lock().current = file_id.map(str::to_string);
    }

    /// Cache hit only; never fetches.
    pub fn get(&self, file_id: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .entries
            .get(file_id)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.blob_url.clone())
    }

    /// Removes a fresh entry and hands its object URL to the caller, who
    /// becomes responsible for revoking it.
    pub fn take(&self, file_id: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let entry = state.entries.remove(file_id)?;
        if self.is_fresh(&entry) {
            return Some(entry);
        }
        drop(state);
        self.host.revoke_object_url(&entry.blob_url);
        self.emit(CacheEvent::Evicted {
            file_id: entry.file_id,
            reason: EvictionReason::Expired,
        });
        None
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.state.lock().entries.contains_key(file_id)
    }

    pub fn is_in_flight(&self, file_id: &str) -> bool {
        self.state.lock().in_flight.contains(file_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evict(&self, file_id: &str) -> bool {
        let removed = self.state.lock().entries.remove(file_id);
        match removed {
            Some(entry) => {
                self.host.revoke_object_url(&entry.blob_url);
                self.emit(CacheEvent::Evicted {
                    file_id: entry.file_id,
                    reason: EvictionReason::Explicit,
                });
                true
            }
            None => false,
        }
    }

    /// Removes every expired entry. Returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let expired: Vec<CacheEntry> = {
            let mut state = self.state.lock();
            let ids: Vec<String> = state
                .entries
                .values()
                .filter(|entry| !self.is_fresh(entry))
                .map(|entry| entry.file_id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| state.entries.remove(id))
                .collect()
        };

        for entry in &expired {
            self.host.revoke_object_url(&entry.blob_url);
            self.emit(CacheEvent::Evicted {
                file_id: entry.file_id.clone(),
                reason: EvictionReason::Expired,
            });
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Swept expired preload entries");
        }
        expired.len()
    }

    /// Revokes everything and forgets in-flight fetches.
    pub fn clear(&self) {
        let drained: Vec<CacheEntry> = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.in_flight.clear();
            state.current = None;
            state.entries.drain().map(|(_, entry)| entry).collect()
        };

        for entry in drained {
            self.host.revoke_object_url(&entry.blob_url);
            self.emit(CacheEvent::Evicted {
                file_id: entry.file_id,
                reason: EvictionReason::Cleared,
            });
        }
    }

    /// Starts the periodic expiry sweep. The task stops on its own once the
    /// cache is dropped.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stops the sweeper and clears the cache.
    pub fn shutdown(&self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
        self.clear();
        info!("Preload cache shut down");
    }
}

impl Drop for PreloadCache {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlaybackError, Result};
    use crate::source::FetchedAudio;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{ManualClock, MediaElement};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingHost {
        created: AtomicUsize,
        revoked: Mutex<Vec<String>>,
    }

    impl MediaHost for CountingHost {
        fn create_element(&self) -> BridgeResult<Arc<dyn MediaElement>> {
            Err(bridge_traits::BridgeError::NotAvailable("unused".into()))
        }

        fn create_object_url(&self, _data: Bytes, _mime_type: &str) -> BridgeResult<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("blob:{}", n))
        }

        fn revoke_object_url(&self, url: &str) {
            self.revoked.lock().push(url.to_string());
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        calls: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl AudioFetch for FakeFetcher {
        async fn fetch(&self, entry: &PlaylistEntry) -> Result<FetchedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(PlaybackError::SourceUnavailable(entry.id.clone()));
            }
            Ok(FetchedAudio {
                data: Bytes::from_static(b"ID3"),
                mime_type: "audio/mpeg".into(),
            })
        }
    }

    fn entry(id: &str) -> PlaylistEntry {
        PlaylistEntry::new(id, format!("{}.mp3", id), "mp3")
    }

    fn cache_with(
        fetcher: Arc<FakeFetcher>,
    ) -> (Arc<PreloadCache>, Arc<CountingHost>, Arc<ManualClock>) {
        let host = Arc::new(CountingHost::default());
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(PreloadCache::new(
            fetcher,
            host.clone(),
            clock.clone(),
            Duration::from_secs(3600),
        ));
        (cache, host, clock)
    }

    #[tokio::test]
    async fn test_preload_then_get() {
        let fetcher = Arc::new(FakeFetcher::default());
        let (cache, _host, _clock) = cache_with(fetcher.clone());

        let url = cache.preload(&entry("a")).await.unwrap();
        assert_eq!(cache.get("a"), Some(url.clone()));

        // Second preload is a no-op.
        assert_eq!(cache.preload(&entry("a")).await, Some(url));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("missing"), None);
    }

    #[tokio::test]
    async fn test_ttl_boundary_and_sweep() {
        let (cache, host, clock) = cache_with(Arc::new(FakeFetcher::default()));
        cache.preload(&entry("x")).await.unwrap();

        clock.advance(Duration::from_secs(3599));
        assert!(cache.get("x").is_some());

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("x").is_none());
        assert!(cache.contains("x"));

        assert_eq!(cache.sweep_expired(), 1);
        assert!(!cache.contains("x"));
        assert_eq!(host.revoked.lock().as_slice(), ["blob:0"]);
    }

    #[tokio::test]
    async fn test_concurrent_preload_returns_none_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (cache, _host, _clock) = cache_with(fetcher.clone());

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload(&entry("a")).await })
        };
        tokio::task::yield_now().await;
        assert!(cache.is_in_flight("a"));
        assert_eq!(cache.preload(&entry("a")).await, None);

        gate.notify_one();
        assert!(first.await.unwrap().is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_result() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (cache, host, _clock) = cache_with(fetcher);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload(&entry("a")).await })
        };
        tokio::task::yield_now().await;
        cache.clear();
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), None);
        assert!(!cache.contains("a"));
        assert_eq!(host.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_aborted_preload_releases_in_flight_mark() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (cache, _host, _clock) = cache_with(fetcher.clone());

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload_upcoming(&[entry("c")]).await })
        };
        tokio::task::yield_now().await;
        assert!(cache.is_in_flight("c"));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!cache.is_in_flight("c"));

        let retry = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload(&entry("c")).await })
        };
        tokio::task::yield_now().await;
        gate.notify_one();
        assert!(retry.await.unwrap().is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn test_preload_finishing_after_file_starts_playing_is_dropped() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (cache, host, _clock) = cache_with(fetcher);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload(&entry("b")).await })
        };
        tokio::task::yield_now().await;
        cache.set_current(Some("b"));
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), None);
        assert!(!cache.contains("b"));
        assert!(!cache.is_in_flight("b"));
        assert_eq!(host.revoked.lock().as_slice(), ["blob:0"]);

        // The playing file is not preloaded again either.
        assert_eq!(cache.preload(&entry("b")).await, None);
        assert_eq!(host.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_take_transfers_ownership() {
        let (cache, host, _clock) = cache_with(Arc::new(FakeFetcher::default()));
        cache.preload(&entry("a")).await.unwrap();

        let taken = cache.take("a").unwrap();
        assert_eq!(taken.blob_url, "blob:0");
        assert!(!cache.contains("a"));

        cache.clear();
        assert!(host.revoked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_preload_is_not_cached() {
        let fetcher = Arc::new(FakeFetcher {
            fail: true,
            ..Default::default()
        });
        let (cache, _host, _clock) = cache_with(fetcher.clone());
        assert_eq!(cache.preload(&entry("a")).await, None);
        assert!(!cache.is_in_flight("a"));

        // A later attempt fetches again.
        cache.preload(&entry("a")).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_and_clear_revoke_once() {
        let (cache, host, _clock) = cache_with(Arc::new(FakeFetcher::default()));
        cache
            .preload_upcoming(&[entry("a"), entry("b"), entry("c")])
            .await;
        assert_eq!(cache.len(), 3);

        assert!(cache.evict("b"));
        assert!(!cache.evict("b"));
        cache.clear();
        cache.clear();

        let mut revoked = host.revoked.lock().clone();
        revoked.sort();
        assert_eq!(revoked, vec!["blob:0", "blob:1", "blob:2"]);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_periodically() {
        let (cache, _host, clock) = cache_with(Arc::new(FakeFetcher::default()));
        cache.preload(&entry("a")).await.unwrap();
        cache.start_sweeper(Duration::from_secs(600));

        clock.advance(Duration::from_secs(3601));
        tokio::time::sleep(Duration::from_secs(601)).await;
        assert!(!cache.contains("a"));

        cache.shutdown();
    }
}
