//! Host fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    ActionDetails, ActionHandler, BridgeError, DisplayMode, EnvironmentInfo, HostEnvironment,
    HttpClient, HttpRequest, HttpResponse, LifecycleState, ListenerId, MediaElement,
    MediaErrorCode, MediaEvent, MediaHost, MediaListener, Notice, Notifier, NowPlayingMetadata,
    NowPlayingSurface, OperatingSystem, PlayRejection, PositionState, ReadyState,
    SurfacePlaybackState, TransportAction,
};
use bytes::Bytes;
use core_playback::progress::{ProgressApi, ProgressRecord, ProgressUpdate};
use core_playback::source::{AudioFetch, FetchedAudio};
use core_playback::{
    HandleRegistry, InitializeRequest, PlaybackConfig, PlaybackEngine, PlaylistEntry,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventStream, PlaybackEvent};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DURATION: f64 = 600.0;

// ============================================================================
// Media host
// ============================================================================

type SharedListener = Arc<dyn Fn(MediaEvent) + Send + Sync>;

pub struct MockElement {
    pub serial: u64,
    source: Mutex<Option<String>>,
    paused: Mutex<bool>,
    time: Mutex<f64>,
    duration: Mutex<Option<f64>>,
    ready: Mutex<ReadyState>,
    volume: Mutex<f64>,
    rate: Mutex<f64>,
    listeners: Mutex<Vec<(ListenerId, SharedListener)>>,
    next_listener: AtomicU64,
    plays: AtomicU32,
    behaviour: Arc<HostBehaviour>,
}

impl MockElement {
    pub fn emit(&self, event: MediaEvent) {
        let listeners: Vec<SharedListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn set_time(&self, seconds: f64) {
        *self.time.lock() = seconds;
    }

    pub fn time(&self) -> f64 {
        *self.time.lock()
    }

    pub fn set_ready(&self, ready: ReadyState) {
        *self.ready.lock() = ready;
    }

    pub fn plays(&self) -> u32 {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.source.lock().is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn volume(&self) -> f64 {
        *self.volume.lock()
    }

    pub fn rate(&self) -> f64 {
        *self.rate.lock()
    }
}

#[async_trait]
impl MediaElement for MockElement {
    fn set_source(&self, url: &str) {
        *self.source.lock() = Some(url.to_string());
    }

    fn clear_source(&self) {
        *self.source.lock() = None;
    }

    fn source(&self) -> Option<String> {
        self.source.lock().clone()
    }

    fn load(&self) {
        *self.time.lock() = 0.0;
    }

    async fn play(&self) -> Result<(), PlayRejection> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if let Some(rejection) = self.behaviour.next_rejection() {
            return Err(rejection);
        }
        *self.paused.lock() = false;
        self.emit(MediaEvent::Playing);
        Ok(())
    }

    fn pause(&self) {
        let was_playing = {
            let mut paused = self.paused.lock();
            let was_playing = !*paused;
            *paused = true;
            was_playing
        };
        if was_playing {
            self.emit(MediaEvent::Paused);
        }
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    fn current_time(&self) -> f64 {
        *self.time.lock()
    }

    fn set_current_time(&self, seconds: f64) {
        *self.time.lock() = seconds;
    }

    fn duration(&self) -> Option<f64> {
        *self.duration.lock()
    }

    fn ready_state(&self) -> ReadyState {
        *self.ready.lock()
    }

    fn set_volume(&self, volume: f64) {
        *self.volume.lock() = volume;
    }

    fn set_playback_rate(&self, rate: f64) {
        *self.rate.lock() = rate;
    }

    fn error(&self) -> Option<MediaErrorCode> {
        None
    }

    fn add_listener(&self, listener: MediaListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, Arc::from(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Knobs shared by every element a host creates.
pub struct HostBehaviour {
    pub initial_ready: Mutex<ReadyState>,
    pub duration: Mutex<Option<f64>>,
    /// Scripted rejections, consumed one per `play()`.
    pub rejections: Mutex<VecDeque<PlayRejection>>,
    /// Returned by every `play()` once the script is empty.
    pub always_reject: Mutex<Option<PlayRejection>>,
}

impl HostBehaviour {
    fn next_rejection(&self) -> Option<PlayRejection> {
        if let Some(rejection) = self.rejections.lock().pop_front() {
            return Some(rejection);
        }
        self.always_reject.lock().clone()
    }
}

impl Default for HostBehaviour {
    fn default() -> Self {
        Self {
            initial_ready: Mutex::new(ReadyState::HaveEnoughData),
            duration: Mutex::new(Some(DURATION)),
            rejections: Mutex::new(VecDeque::new()),
            always_reject: Mutex::new(None),
        }
    }
}

#[derive(Default)]
pub struct MockMediaHost {
    pub behaviour: Arc<HostBehaviour>,
    elements: Mutex<Vec<Arc<MockElement>>>,
    created_urls: Mutex<Vec<String>>,
    revoked_urls: Mutex<Vec<String>>,
    url_counter: AtomicU64,
}

impl MockMediaHost {
    pub fn elements(&self) -> Vec<Arc<MockElement>> {
        self.elements.lock().clone()
    }

    pub fn latest(&self) -> Arc<MockElement> {
        self.elements
            .lock()
            .last()
            .cloned()
            .expect("no element created")
    }

    pub fn live_count(&self) -> usize {
        self.elements.lock().iter().filter(|e| e.is_live()).count()
    }

    pub fn created_urls(&self) -> Vec<String> {
        self.created_urls.lock().clone()
    }

    pub fn revoked_urls(&self) -> Vec<String> {
        self.revoked_urls.lock().clone()
    }

    pub fn reject_every_play(&self, rejection: PlayRejection) {
        *self.behaviour.always_reject.lock() = Some(rejection);
    }

    pub fn allow_play(&self) {
        *self.behaviour.always_reject.lock() = None;
        self.behaviour.rejections.lock().clear();
    }

    pub fn set_initial_ready(&self, ready: ReadyState) {
        *self.behaviour.initial_ready.lock() = ready;
    }
}

impl MediaHost for MockMediaHost {
    fn create_element(&self) -> BridgeResult<Arc<dyn MediaElement>> {
        let mut elements = self.elements.lock();
        let element = Arc::new(MockElement {
            serial: elements.len() as u64,
            source: Mutex::new(None),
            paused: Mutex::new(true),
            time: Mutex::new(0.0),
            duration: Mutex::new(*self.behaviour.duration.lock()),
            ready: Mutex::new(*self.behaviour.initial_ready.lock()),
            volume: Mutex::new(1.0),
            rate: Mutex::new(1.0),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            plays: AtomicU32::new(0),
            behaviour: Arc::clone(&self.behaviour),
        });
        elements.push(Arc::clone(&element));
        Ok(element)
    }

    fn create_object_url(&self, _data: Bytes, _mime_type: &str) -> BridgeResult<String> {
        let n = self.url_counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("blob:test/{}", n);
        self.created_urls.lock().push(url.clone());
        Ok(url)
    }

    fn revoke_object_url(&self, url: &str) {
        self.revoked_urls.lock().push(url.to_string());
    }
}

// ============================================================================
// Network fakes
// ============================================================================

/// Audio downloads that always succeed, unless the file is listed as broken.
#[derive(Default)]
pub struct FakeFetcher {
    pub fetched: Mutex<Vec<String>>,
    pub broken: Mutex<Vec<String>>,
}

#[async_trait]
impl AudioFetch for FakeFetcher {
    async fn fetch(&self, entry: &PlaylistEntry) -> core_playback::Result<FetchedAudio> {
        self.fetched.lock().push(entry.id.clone());
        if self.broken.lock().contains(&entry.id) {
            return Err(core_playback::PlaybackError::SourceUnavailable(entry.id.clone()));
        }
        Ok(FetchedAudio {
            data: Bytes::from_static(b"ID3"),
            mime_type: "audio/mpeg".to_string(),
        })
    }
}

/// Progress server kept in memory.
#[derive(Default)]
pub struct MemoryProgressApi {
    records: Mutex<HashMap<String, ProgressRecord>>,
    latest: Mutex<Option<String>>,
    saves: Mutex<Vec<ProgressUpdate>>,
}

impl MemoryProgressApi {
    pub fn seed(&self, file_id: &str, current_time: f64, progress: f64) {
        self.records.lock().insert(
            file_id.to_string(),
            ProgressRecord {
                file_id: file_id.to_string(),
                current_time,
                duration: Some(DURATION),
                progress,
                is_new_file: false,
            },
        );
    }

    pub fn set_latest(&self, file_id: &str) {
        *self.latest.lock() = Some(file_id.to_string());
    }

    pub fn saves(&self) -> Vec<ProgressUpdate> {
        self.saves.lock().clone()
    }

    pub fn saved_ids(&self) -> Vec<String> {
        self.saves.lock().iter().map(|u| u.file_id.clone()).collect()
    }
}

#[async_trait]
impl ProgressApi for MemoryProgressApi {
    async fn fetch(&self, file_id: &str) -> core_playback::Result<Option<ProgressRecord>> {
        Ok(self.records.lock().get(file_id).cloned())
    }

    async fn fetch_latest(&self) -> core_playback::Result<Option<ProgressRecord>> {
        let latest = self.latest.lock().clone();
        Ok(latest.and_then(|id| self.records.lock().get(&id).cloned()))
    }

    async fn save(&self, update: ProgressUpdate) -> core_playback::Result<()> {
        let progress = if update.duration > 0.0 {
            update.current_time / update.duration * 100.0
        } else {
            0.0
        };
        self.records.lock().insert(
            update.file_id.clone(),
            ProgressRecord {
                file_id: update.file_id.clone(),
                current_time: update.current_time,
                duration: (update.duration > 0.0).then_some(update.duration),
                progress,
                is_new_file: false,
            },
        );
        *self.latest.lock() = Some(update.file_id.clone());
        self.saves.lock().push(update);
        Ok(())
    }
}

/// HTTP client returning queued responses and recording requests.
#[derive(Default)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn push(&self, response: BridgeResult<HttpResponse>) {
        self.responses.lock().push_back(response);
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::NotAvailable("offline".to_string())))
    }
}

// ============================================================================
// Host surfaces
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[derive(Default)]
pub struct RecordingNowPlaying {
    handlers: Mutex<HashMap<TransportAction, ActionHandler>>,
    pub metadata: Mutex<Option<NowPlayingMetadata>>,
    pub states: Mutex<Vec<SurfacePlaybackState>>,
    pub positions: Mutex<Vec<Option<PositionState>>>,
}

impl RecordingNowPlaying {
    pub fn fire(&self, action: TransportAction) {
        self.fire_with(action, ActionDetails::default());
    }

    pub fn fire_with(&self, action: TransportAction, details: ActionDetails) {
        let handler = self.handlers.lock().get(&action).cloned();
        if let Some(handler) = handler {
            handler(details);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn last_state(&self) -> Option<SurfacePlaybackState> {
        self.states.lock().last().copied()
    }
}

impl NowPlayingSurface for RecordingNowPlaying {
    fn is_supported(&self) -> bool {
        true
    }

    fn set_metadata(&self, metadata: Option<NowPlayingMetadata>) {
        *self.metadata.lock() = metadata;
    }

    fn set_playback_state(&self, state: SurfacePlaybackState) {
        self.states.lock().push(state);
    }

    fn set_position_state(&self, state: Option<PositionState>) {
        self.positions.lock().push(state);
    }

    fn set_action_handler(&self, action: TransportAction, handler: Option<ActionHandler>) {
        let mut handlers = self.handlers.lock();
        match handler {
            Some(handler) => {
                handlers.insert(action, handler);
            }
            None => {
                handlers.remove(&action);
            }
        }
    }
}

pub struct TestEnvironment {
    info: EnvironmentInfo,
}

impl TestEnvironment {
    pub fn browser() -> Self {
        Self {
            info: EnvironmentInfo::default(),
        }
    }

    pub fn installed_ios() -> Self {
        Self {
            info: EnvironmentInfo {
                display_mode: DisplayMode::Standalone,
                os: OperatingSystem::Ios,
                embedded_webview: false,
            },
        }
    }

    pub fn embedded_webview() -> Self {
        Self {
            info: EnvironmentInfo {
                display_mode: DisplayMode::Browser,
                os: OperatingSystem::Android,
                embedded_webview: true,
            },
        }
    }
}

impl HostEnvironment for TestEnvironment {
    fn describe(&self) -> EnvironmentInfo {
        self.info
    }

    fn lifecycle_state(&self) -> LifecycleState {
        LifecycleState::Foreground
    }
}

// ============================================================================
// Engine harness
// ============================================================================

pub fn playlist(ids: &[&str]) -> Vec<PlaylistEntry> {
    ids.iter()
        .map(|id| PlaylistEntry::new(*id, format!("{}.mp3", id), "mp3"))
        .collect()
}

pub struct Harness {
    pub engine: PlaybackEngine,
    pub host: Arc<MockMediaHost>,
    pub progress: Arc<MemoryProgressApi>,
    pub fetcher: Arc<FakeFetcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub surface: Arc<RecordingNowPlaying>,
    pub registry: Arc<HandleRegistry>,
    events: Mutex<EventStream>,
}

impl Harness {
    pub fn new(environment: TestEnvironment) -> Self {
        Self::with_config(environment, PlaybackConfig::default())
    }

    pub fn with_config(environment: TestEnvironment, playback: PlaybackConfig) -> Self {
        let host = Arc::new(MockMediaHost::default());
        let progress = Arc::new(MemoryProgressApi::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let surface = Arc::new(RecordingNowPlaying::default());
        let registry = Arc::new(HandleRegistry::new());

        let engine = build_engine(
            environment,
            playback,
            &host,
            &progress,
            &fetcher,
            &notifier,
            &surface,
            &registry,
        );
        let events = Mutex::new(engine.playback_events());

        Self {
            engine,
            host,
            progress,
            fetcher,
            notifier,
            surface,
            registry,
            events,
        }
    }

    /// A second engine sharing this harness's host, registry and backends,
    /// as a page navigation would create on the same document.
    pub fn successor(&self) -> PlaybackEngine {
        build_engine(
            TestEnvironment::browser(),
            PlaybackConfig::default(),
            &self.host,
            &self.progress,
            &self.fetcher,
            &self.notifier,
            &self.surface,
            &self.registry,
        )
    }

    pub async fn start(&self, ids: &[&str], autoplay: bool) {
        self.engine
            .initialize(InitializeRequest::new(playlist(ids)).with_autoplay(autoplay))
            .await
            .expect("initialize");
        settle().await;
    }

    /// Playback events emitted since the last call.
    pub fn playback_events(&self) -> Vec<PlaybackEvent> {
        let mut rx = self.events.lock();
        let mut events = Vec::new();
        while let Some(Ok(event)) = rx.try_recv() {
            if let CoreEvent::Playback(event) = event {
                events.push(event);
            }
        }
        events
    }
}

#[allow(clippy::too_many_arguments)]
fn build_engine(
    environment: TestEnvironment,
    playback: PlaybackConfig,
    host: &Arc<MockMediaHost>,
    progress: &Arc<MemoryProgressApi>,
    fetcher: &Arc<FakeFetcher>,
    notifier: &Arc<RecordingNotifier>,
    surface: &Arc<RecordingNowPlaying>,
    registry: &Arc<HandleRegistry>,
) -> PlaybackEngine {
    let config = CoreConfig::builder()
        .base_url("https://books.example.com/api/audio")
        .collection("book-1")
        .media_host(host.clone())
        .http_client(Arc::new(ScriptedHttpClient::default()))
        .notifier(notifier.clone())
        .now_playing(surface.clone())
        .environment(Arc::new(environment))
        .enable_offline_mirror(false)
        .build()
        .expect("valid config");

    PlaybackEngine::new(config, playback)
        .expect("valid playback config")
        .with_registry(registry.clone())
        .with_progress_api(progress.clone())
        .with_fetcher(fetcher.clone())
}

/// Lets queued signals and spawned tasks run. Time is paused in these tests,
/// so short sleeps only advance the clock once everything else is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

pub async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
}
