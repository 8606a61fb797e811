//! # Audio Session
//!
//! Owns the media handle behind the playback surface.
//!
//! ## Loading
//!
//! `load` first consults the [`HandleRegistry`]: if the slot already holds a
//! handle for the same `(collection, file)` it is adopted as-is, with no
//! teardown, fetch or seek. Otherwise the previous handle is torn down, a
//! start offset is resolved (caller hint, else stored progress, completed
//! files restart at 0), a source is resolved through the [`SourceResolver`]
//! and a new element is created and registered.
//!
//! ## Teardown
//!
//! A handle is torn down (paused, source cleared, object URL revoked) only by
//! the session the registry names as its owner, and only once: the registry
//! entry is removed as part of the teardown. A session whose handle was handed
//! to another session only drops its listeners.
//!
//! ## Events
//!
//! Element notifications are forwarded to the sink tagged with the load
//! generation. The owner feeds them back through [`AudioSession::handle_event`],
//! which ignores anything from an older generation.

use async_trait::async_trait;
use bridge_traits::{MediaElement, MediaEvent, MediaHost, PlayRejection, ReadyState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::autoplay::PlaybackTarget;
use crate::error::{PlaybackError, Result};
use crate::navigator::NavigationTarget;
use crate::progress::ProgressStore;
use crate::registry::{HandleKey, HandleRegistry, RegisteredHandle, SessionId};
use crate::source::SourceResolver;
use crate::subscription::{Subscription, SubscriptionSet};
use crate::types::PlaylistEntry;

/// Receives element notifications tagged with the load generation.
pub type EventSink = Arc<dyn Fn(u64, MediaEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadOptions {
    /// Explicit start offset. `None` or 0 defers to stored progress.
    pub start_time: Option<f64>,
    /// Skip registry reuse and build a fresh handle.
    pub force_reload: bool,
}

impl LoadOptions {
    pub fn at(start_time: f64) -> Self {
        Self {
            start_time: Some(start_time),
            force_reload: false,
        }
    }

    pub fn reload_at(start_time: f64) -> Self {
        Self {
            start_time: Some(start_time),
            force_reload: true,
        }
    }
}

pub struct LoadOutcome {
    pub handle: Arc<dyn MediaElement>,
    pub start_time: f64,
    pub blob_url: Option<String>,
    pub reused: bool,
    pub generation: u64,
}

impl std::fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOutcome")
            .field("start_time", &self.start_time)
            .field("blob_url", &self.blob_url)
            .field("reused", &self.reused)
            .field("generation", &self.generation)
            .finish()
    }
}

struct CurrentHandle {
    key: HandleKey,
    element: Arc<dyn MediaElement>,
    blob_url: Option<String>,
    subscriptions: SubscriptionSet,
}

struct SessionState {
    current: Option<CurrentHandle>,
    pending_seek: Option<f64>,
    loading: bool,
    playing: bool,
    volume: f64,
    rate: f64,
    disposed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current: None,
            pending_seek: None,
            loading: false,
            playing: false,
            volume: 1.0,
            rate: 1.0,
            disposed: false,
        }
    }
}

pub struct AudioSession {
    id: SessionId,
    collection: String,
    host: Arc<dyn MediaHost>,
    registry: Arc<HandleRegistry>,
    resolver: Arc<SourceResolver>,
    progress: Arc<ProgressStore>,
    sink: EventSink,
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

fn teardown_handle(host: &Arc<dyn MediaHost>, element: &Arc<dyn MediaElement>, blob_url: Option<&str>) {
    element.pause();
    element.clear_source();
    if let Some(url) = blob_url {
        host.revoke_object_url(url);
    }
}

impl AudioSession {
    pub fn new(
        collection: impl Into<String>,
        host: Arc<dyn MediaHost>,
        registry: Arc<HandleRegistry>,
        resolver: Arc<SourceResolver>,
        progress: Arc<ProgressStore>,
        sink: EventSink,
    ) -> Self {
        Self {
            id: SessionId::new(),
            collection: collection.into(),
            host,
            registry,
            resolver,
            progress,
            sink,
            generation: AtomicU64::new(0),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn subscribe(&self, element: &Arc<dyn MediaElement>, generation: u64) -> SubscriptionSet {
        let sink = Arc::clone(&self.sink);
        let mut set = SubscriptionSet::new();
        set.push(Subscription::new(element, move |event| sink(generation, event)));
        set
    }

    // ========================================================================
    // Load
    // ========================================================================

    #[instrument(skip(self, entry, options), fields(file_id = %entry.id, session = %self.id))]
    pub async fn load(&self, entry: &PlaylistEntry, options: LoadOptions) -> Result<LoadOutcome> {
        if self.state.lock().disposed {
            return Err(PlaybackError::Disposed);
        }

        let key = HandleKey::new(self.collection.clone(), entry.id.clone());

        if !options.force_reload {
            if let Some(outcome) = self.try_reuse(&key) {
                return Ok(outcome);
            }
        }

        let generation = self.next_generation();
        self.teardown_current();
        {
            let mut state = self.state.lock();
            state.loading = true;
            state.playing = false;
            state.pending_seek = None;
        }

        let start_time = match options.start_time {
            Some(t) if t.is_finite() && t > 0.0 => t,
            _ => self.progress.resume_position(&entry.id).await,
        };

        let source = self.resolver.resolve(entry).await;
        let owned_url = source.owns_object_url().then(|| source.url.clone());

        if self.generation() != generation || self.state.lock().disposed {
            if let Some(url) = &owned_url {
                self.host.revoke_object_url(url);
            }
            debug!("Load superseded before attach");
            return Err(PlaybackError::Superseded(entry.id.clone()));
        }

        let element = match self.host.create_element() {
            Ok(element) => element,
            Err(e) => {
                if let Some(url) = &owned_url {
                    self.host.revoke_object_url(url);
                }
                self.state.lock().loading = false;
                return Err(PlaybackError::MediaHost(e.to_string()));
            }
        };

        let subscriptions = self.subscribe(&element, generation);
        let (volume, rate) = {
            let state = self.state.lock();
            (state.volume, state.rate)
        };
        element.set_volume(volume);
        element.set_playback_rate(rate);
        element.set_source(&source.url);
        element.load();

        {
            let mut state = self.state.lock();
            state.pending_seek = (start_time > 0.0).then_some(start_time);
            state.current = Some(CurrentHandle {
                key: key.clone(),
                element: Arc::clone(&element),
                blob_url: owned_url.clone(),
                subscriptions,
            });
        }

        let displaced = self.registry.install(RegisteredHandle {
            key,
            owner: Some(self.id),
            element: Arc::clone(&element),
            blob_url: owned_url.clone(),
        });
        if let Some(displaced) = displaced {
            debug!(file_id = %displaced.key.file_id, "Tearing down displaced handle");
            teardown_handle(&self.host, &displaced.element, displaced.blob_url.as_deref());
        }

        info!(start_time, source = ?source.kind, "Audio loaded");
        Ok(LoadOutcome {
            handle: element,
            start_time,
            blob_url: owned_url,
            reused: false,
            generation,
        })
    }

    fn try_reuse(&self, key: &HandleKey) -> Option<LoadOutcome> {
        {
            let mut state = self.state.lock();
            let own = state
                .current
                .as_ref()
                .filter(|current| &current.key == key && self.registry.is_owned_by(key, self.id))
                .map(|current| (Arc::clone(&current.element), current.blob_url.clone()));
            if let Some((element, blob_url)) = own {
                state.loading = false;
                debug!("Current handle already matches; reusing");
                return Some(LoadOutcome {
                    start_time: element.current_time(),
                    handle: element,
                    blob_url,
                    reused: true,
                    generation: self.generation(),
                });
            }
        }

        let handle = self.registry.try_acquire(key, self.id)?;
        let generation = self.next_generation();

        // Drop our own previous handle unless it is the one being adopted.
        let previous = self.state.lock().current.take();
        if let Some(mut previous) = previous {
            previous.subscriptions.clear();
            if !Arc::ptr_eq(&previous.element, &handle.element) {
                if let Some(own) = self.registry.remove(&previous.key, self.id) {
                    teardown_handle(&self.host, &own.element, own.blob_url.as_deref());
                }
            }
        }

        let subscriptions = self.subscribe(&handle.element, generation);
        {
            let mut state = self.state.lock();
            state.loading = false;
            state.playing = !handle.element.is_paused();
            state.pending_seek = None;
            state.current = Some(CurrentHandle {
                key: key.clone(),
                element: Arc::clone(&handle.element),
                blob_url: handle.blob_url.clone(),
                subscriptions,
            });
        }

        info!("Adopted live handle from registry");
        Some(LoadOutcome {
            start_time: handle.element.current_time(),
            handle: handle.element,
            blob_url: handle.blob_url,
            reused: true,
            generation,
        })
    }

    /// Tears down the current handle if this session still owns it.
    fn teardown_current(&self) {
        let current = self.state.lock().current.take();
        let Some(mut current) = current else {
            return;
        };
        current.subscriptions.clear();
        match self.registry.remove(&current.key, self.id) {
            Some(own) => teardown_handle(&self.host, &own.element, own.blob_url.as_deref()),
            None => debug!(file_id = %current.key.file_id, "Handle no longer ours; skipping teardown"),
        }
    }

    // ========================================================================
    // Element events
    // ========================================================================

    /// Applies an element notification. Returns `false` for stale events.
    pub fn handle_event(&self, generation: u64, event: &MediaEvent) -> bool {
        if generation != self.generation() {
            return false;
        }

        let mut state = self.state.lock();
        let Some(element) = state.current.as_ref().map(|c| Arc::clone(&c.element)) else {
            return false;
        };

        match event {
            MediaEvent::LoadedMetadata => {
                if let Some(position) = state.pending_seek.take() {
                    element.set_current_time(clamp_to_duration(position, element.duration()));
                }
            }
            MediaEvent::CanPlay | MediaEvent::CanPlayThrough => {
                if let Some(position) = state.pending_seek.take() {
                    element.set_current_time(clamp_to_duration(position, element.duration()));
                }
                state.loading = false;
            }
            MediaEvent::Playing => {
                state.loading = false;
                state.playing = true;
            }
            MediaEvent::Waiting => state.loading = true,
            MediaEvent::Paused | MediaEvent::Ended => state.playing = false,
            MediaEvent::Error(code) => {
                warn!(code = code.0, "Media element error");
                state.loading = false;
                state.playing = false;
            }
            MediaEvent::Stalled | MediaEvent::TimeUpdate => {}
        }
        true
    }

    // ========================================================================
    // Transport
    // ========================================================================

    fn element(&self) -> Option<Arc<dyn MediaElement>> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|current| Arc::clone(&current.element))
    }

    pub async fn play(&self) -> std::result::Result<(), PlayRejection> {
        let element = self
            .element()
            .ok_or_else(|| PlayRejection::Other("no source loaded".to_string()))?;
        element.play().await?;
        self.state.lock().playing = true;
        Ok(())
    }

    pub fn pause(&self) {
        if let Some(element) = self.element() {
            element.pause();
        }
        self.state.lock().playing = false;
    }

    /// Seeks now if metadata is available, otherwise once it arrives.
    pub fn seek(&self, position: f64) {
        if !position.is_finite() {
            return;
        }
        let position = position.max(0.0);
        let mut state = self.state.lock();
        let Some(element) = state.current.as_ref().map(|c| Arc::clone(&c.element)) else {
            return;
        };
        if element.ready_state() >= ReadyState::HaveMetadata {
            element.set_current_time(clamp_to_duration(position, element.duration()));
            state.pending_seek = None;
        } else {
            state.pending_seek = Some(position);
        }
    }

    pub fn set_volume(&self, volume: f64) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.state.lock().volume = volume;
        if let Some(element) = self.element() {
            element.set_volume(volume);
        }
    }

    pub fn set_rate(&self, rate: f64) {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate.clamp(0.25, 4.0)
        } else {
            1.0
        };
        self.state.lock().rate = rate;
        if let Some(element) = self.element() {
            element.set_playback_rate(rate);
        }
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn current_file_id(&self) -> Option<String> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|current| current.key.file_id.clone())
    }

    pub fn current_time(&self) -> f64 {
        self.element().map(|e| e.current_time()).unwrap_or(0.0)
    }

    pub fn duration(&self) -> Option<f64> {
        self.element()
            .and_then(|e| e.duration())
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.element()
            .map(|e| e.ready_state())
            .unwrap_or(ReadyState::HaveNothing)
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Marks loading finished without a readiness event, e.g. after an error.
    pub fn clear_loading(&self) {
        self.state.lock().loading = false;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Gives up this session's claim on the handle without stopping it. A new
    /// session loading the same file adopts it through the registry.
    pub fn detach(&self) {
        let current = {
            let mut state = self.state.lock();
            state.playing = false;
            state.loading = false;
            state.pending_seek = None;
            state.current.take()
        };
        if let Some(mut current) = current {
            current.subscriptions.clear();
            self.registry.release(&current.key, self.id);
            info!(file_id = %current.key.file_id, "Detached live handle");
        }
        self.next_generation();
    }

    /// Full teardown. Safe to call any number of times.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed && state.current.is_none() {
                return;
            }
            state.disposed = true;
            state.playing = false;
            state.loading = false;
            state.pending_seek = None;
        }
        self.next_generation();
        self.teardown_current();
        debug!(session = %self.id, "Session disposed");
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn clamp_to_duration(position: f64, duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => position.clamp(0.0, d),
        _ => position.max(0.0),
    }
}

#[async_trait]
impl PlaybackTarget for AudioSession {
    fn ready_state(&self) -> ReadyState {
        AudioSession::ready_state(self)
    }

    async fn play(&self) -> std::result::Result<(), PlayRejection> {
        AudioSession::play(self).await
    }

    fn pause(&self) {
        AudioSession::pause(self)
    }

    fn seek(&self, position: f64) {
        AudioSession::seek(self, position)
    }
}

impl NavigationTarget for AudioSession {
    fn current_time(&self) -> f64 {
        AudioSession::current_time(self)
    }

    fn duration(&self) -> Option<f64> {
        AudioSession::duration(self)
    }

    fn is_playing(&self) -> bool {
        AudioSession::is_playing(self)
    }

    fn pause(&self) {
        AudioSession::pause(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_duration() {
        assert_eq!(clamp_to_duration(120.0, Some(60.0)), 60.0);
        assert_eq!(clamp_to_duration(-3.0, None), 0.0);
        assert_eq!(clamp_to_duration(30.0, Some(f64::INFINITY)), 30.0);
    }

    #[test]
    fn test_load_options() {
        assert_eq!(LoadOptions::default().start_time, None);
        assert!(LoadOptions::reload_at(5.0).force_reload);
        assert!(!LoadOptions::at(5.0).force_reload);
    }
}
