//! # Playback Engine
//!
//! Host-facing facade over the playback components.
//!
//! ## Architecture
//!
//! ```text
//!  host calls ─┐                                    ┌─> AudioSession
//!  remote ctl ─┼─> mpsc<EngineSignal> ─> EngineLoop ─┼─> AutoplayController
//!  element ev ─┤        (sequential)                 ├─> CompletionWatcher
//!  timers ─────┘                                     ├─> PlaylistNavigator
//!                                                    ├─> ProgressStore / PreloadCache
//!                                                    └─> watch<PlaybackSnapshot>, EventBus
//! ```
//!
//! Every input (transport calls, media element notifications, timer expiries
//! and remote-control actions) becomes an [`EngineSignal`] on one queue. A
//! single task drains it, so handlers never interleave; a handler that awaits
//! the network simply delays the signals behind it.
//!
//! Timers are spawned tasks that sleep and post a signal. Signals carry the
//! load generation they were scheduled for and are dropped when it no longer
//! matches. All timers are aborted on teardown.
//!
//! Transport methods resolve once their command has been applied. They are
//! silent no-ops when the engine is not running, and never return errors:
//! failures end up in the snapshot's `error`, on the event bus and in
//! notices.

use bridge_traits::{LifecycleState, MediaErrorCode, MediaEvent, Notice, Notifier};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, Direction, EventBus, EventStream, PlaybackEvent, Receiver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::autoplay::{ArmDecision, AttemptOutcome, AutoplayController, AutoplayState, AutoplayTrigger};
use crate::classifier::{ErrorClassifier, RecoveryAction};
use crate::completion::{restart_loop, CompletionAction, CompletionWatcher};
use crate::config::PlaybackConfig;
use crate::controls::{ExternalControlSurface, TransportCommand, TransportTarget};
use crate::error::{PlaybackError, Result};
use crate::initializer::{InitialPosition, SessionInitializer};
use crate::navigator::{NavigationCause, NavigationContext, NavigationOutcome, PlaylistNavigator};
use crate::platform::PlatformProfile;
use crate::preload::PreloadCache;
use crate::progress::{HttpProgressApi, ProgressApi, ProgressStore};
use crate::registry::HandleRegistry;
use crate::session::{AudioSession, EventSink, LoadOptions};
use crate::source::{AudioFetch, HttpAudioFetcher, SourceResolver};
use crate::types::{BookInfo, InitializeRequest};

/// A chained advance waits this many retry delays for `canplaythrough`
/// before attempting anyway.
const PLAY_THROUGH_FALLBACK_DELAYS: u32 = 3;

// ============================================================================
// Observables
// ============================================================================

/// Point-in-time view of the engine for UI binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub file_id: Option<String>,
    pub index: usize,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub playing: bool,
    pub loading: bool,
    pub looping: bool,
    pub volume: f64,
    pub rate: f64,
    /// Last user-facing failure, cleared once playback is healthy again.
    pub error: Option<String>,
    pub autoplay: AutoplayState,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            file_id: None,
            index: 0,
            current_time: 0.0,
            duration: None,
            playing: false,
            loading: false,
            looping: false,
            volume: 1.0,
            rate: 1.0,
            error: None,
            autoplay: AutoplayState::Idle,
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Load {
        index: usize,
        start_time: Option<f64>,
        trigger: Option<AutoplayTrigger>,
    },
    Play,
    Pause,
    TogglePlay,
    Next,
    Previous,
    Seek(f64),
    SeekBy(f64),
    SetVolume(f64),
    SetRate(f64),
    ToggleLoop,
    SetLifecycle(LifecycleState),
    Stop,
    Teardown,
    /// Like `Teardown`, but the live handle keeps playing for the next engine.
    Detach,
}

impl From<TransportCommand> for EngineCommand {
    fn from(command: TransportCommand) -> Self {
        match command {
            TransportCommand::Play => EngineCommand::Play,
            TransportCommand::Pause => EngineCommand::Pause,
            TransportCommand::Stop => EngineCommand::Stop,
            TransportCommand::Next => EngineCommand::Next,
            TransportCommand::Previous => EngineCommand::Previous,
            TransportCommand::SeekBy(offset) => EngineCommand::SeekBy(offset),
            TransportCommand::SeekTo(position) => EngineCommand::Seek(position),
        }
    }
}

#[derive(Debug)]
pub enum EngineSignal {
    Media {
        generation: u64,
        event: MediaEvent,
    },
    Command {
        command: EngineCommand,
        reply: Option<oneshot::Sender<()>>,
    },
    AutoplayRetry {
        generation: u64,
    },
    CompletionPoll,
    CompletionConfirm {
        generation: u64,
        file_id: String,
    },
    NetworkRetry {
        generation: u64,
        position: f64,
        resume: bool,
    },
}

type SignalSender = mpsc::UnboundedSender<EngineSignal>;

/// Remote-control target posting onto the engine queue.
struct EngineTransport {
    tx: SignalSender,
    state: watch::Receiver<PlaybackSnapshot>,
}

impl TransportTarget for EngineTransport {
    fn is_playing(&self) -> bool {
        self.state.borrow().playing
    }

    fn dispatch(&self, command: TransportCommand) {
        let _ = self.tx.send(EngineSignal::Command {
            command: command.into(),
            reply: None,
        });
    }
}

// ============================================================================
// Engine facade
// ============================================================================

enum Lifecycle {
    Idle,
    Starting,
    Running {
        tx: SignalSender,
        task: JoinHandle<()>,
    },
}

pub struct PlaybackEngine {
    config: Arc<CoreConfig>,
    playback: PlaybackConfig,
    registry: Arc<HandleRegistry>,
    event_bus: Arc<EventBus>,
    progress_api: Option<Arc<dyn ProgressApi>>,
    fetcher: Option<Arc<dyn AudioFetch>>,
    state: Arc<watch::Sender<PlaybackSnapshot>>,
    lifecycle: Mutex<Lifecycle>,
}

impl PlaybackEngine {
    /// Validates `playback` and binds the engine to the process-wide handle
    /// registry.
    pub fn new(config: CoreConfig, playback: PlaybackConfig) -> Result<Self> {
        config.validate()?;
        playback.validate().map_err(PlaybackError::InvalidConfig)?;
        let (state, _) = watch::channel(PlaybackSnapshot::default());
        Ok(Self {
            config: Arc::new(config),
            playback,
            registry: HandleRegistry::global(),
            event_bus: Arc::new(EventBus::default()),
            progress_api: None,
            fetcher: None,
            state: Arc::new(state),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn with_registry(mut self, registry: Arc<HandleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Replaces the HTTP progress client.
    pub fn with_progress_api(mut self, api: Arc<dyn ProgressApi>) -> Self {
        self.progress_api = Some(api);
        self
    }

    /// Replaces the HTTP audio fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn AudioFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Only the playback lifecycle events, skipping progress and cache chatter.
    pub fn playback_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)))
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    /// Resolves the starting point, loads it and starts the engine loop.
    #[instrument(skip(self, request), fields(entries = request.playlist.len()))]
    pub async fn initialize(&self, request: InitializeRequest) -> Result<InitialPosition> {
        if request.playlist.is_empty() {
            return Err(PlaybackError::EmptyPlaylist);
        }
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Idle) {
                return Err(PlaybackError::AlreadyInitialized);
            }
            *lifecycle = Lifecycle::Starting;
        }

        let autoplay = request.autoplay;
        let (tx, rx) = mpsc::unbounded_channel();
        let (engine_loop, position) = match self.build(request, tx.clone()).await {
            Ok(built) => built,
            Err(e) => {
                *self.lifecycle.lock() = Lifecycle::Idle;
                return Err(e);
            }
        };

        let task = tokio::spawn(engine_loop.run(rx));
        *self.lifecycle.lock() = Lifecycle::Running { tx, task };

        let trigger = if autoplay {
            Some(AutoplayTrigger::UserRequested)
        } else if position.start_time > 0.0 {
            Some(AutoplayTrigger::Resume)
        } else {
            None
        };
        self.request(EngineCommand::Load {
            index: position.index,
            start_time: Some(position.start_time),
            trigger,
        })
        .await;

        info!(file_id = %position.file_id, start_time = position.start_time, "Engine initialized");
        Ok(position)
    }

    async fn build(
        &self,
        request: InitializeRequest,
        tx: SignalSender,
    ) -> Result<(EngineLoop, InitialPosition)> {
        let config = &self.config;
        let playback = &self.playback;

        let api = self.progress_api.clone().or_else(|| {
            config
                .features
                .enable_remote_progress
                .then(|| Arc::new(HttpProgressApi::new(Arc::clone(config))) as Arc<dyn ProgressApi>)
        });
        let mirror = config
            .features
            .enable_offline_mirror
            .then(|| config.settings_store.clone())
            .flatten();
        let progress = Arc::new(
            ProgressStore::new(
                config.collection_id.clone(),
                api,
                mirror,
                playback.progress_save_interval(),
            )
            .with_event_bus(Arc::clone(&self.event_bus)),
        );

        let fetcher: Arc<dyn AudioFetch> = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(HttpAudioFetcher::new(Arc::clone(config))),
        };
        let cache = Arc::new(
            PreloadCache::new(
                Arc::clone(&fetcher),
                Arc::clone(&config.media_host),
                Arc::clone(&config.clock),
                playback.cache_expiration(),
            )
            .with_event_bus(Arc::clone(&self.event_bus)),
        );
        let resolver = Arc::new(SourceResolver::new(
            Arc::clone(config),
            fetcher,
            Some(Arc::clone(&cache)),
        ));

        let position = SessionInitializer::new(&progress)
            .resolve(&request.playlist, &request.hints)
            .await?;

        let (info, lifecycle) = match &config.environment {
            Some(env) => (env.describe(), env.lifecycle_state()),
            None => (Default::default(), LifecycleState::Foreground),
        };
        let profile = PlatformProfile::resolve(&info, playback);
        info!(platform = %profile.class, "Platform profile resolved");

        let sink_tx = tx.clone();
        let sink: EventSink = Arc::new(move |generation, event| {
            let _ = sink_tx.send(EngineSignal::Media { generation, event });
        });
        let session = Arc::new(AudioSession::new(
            config.collection_id.clone(),
            Arc::clone(&config.media_host),
            Arc::clone(&self.registry),
            resolver,
            Arc::clone(&progress),
            sink,
        ));

        let navigator = PlaylistNavigator::new(request.playlist);
        navigator.jump_to(position.index);

        let controls = ExternalControlSurface::new(
            config.now_playing.clone(),
            config.features.enable_now_playing,
            playback.skip_interval_secs,
        );
        controls.register(Arc::new(EngineTransport {
            tx: tx.clone(),
            state: self.state.subscribe(),
        }));

        cache.start_sweeper(playback.cache_sweep_interval());

        let engine_loop = EngineLoop {
            tx,
            playback: playback.clone(),
            book: request.book,
            notifier: config.notifier.clone(),
            event_bus: Arc::clone(&self.event_bus),
            state: Arc::clone(&self.state),
            session,
            cache,
            progress,
            navigator,
            autoplay: AutoplayController::new(profile),
            completion: CompletionWatcher::new(profile),
            classifier: ErrorClassifier::new(playback),
            controls,
            profile,
            looping: false,
            foreground: lifecycle.is_foreground(),
            last_position: 0.0,
            error: None,
            timers: Timers::default(),
            stopped: false,
        };
        Ok((engine_loop, position))
    }

    fn sender(&self) -> Option<SignalSender> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running { tx, .. } => Some(tx.clone()),
            _ => None,
        }
    }

    /// Posts `command` and waits until the loop has applied it.
    async fn request(&self, command: EngineCommand) {
        let Some(tx) = self.sender() else {
            debug!(?command, "Engine not running; command ignored");
            return;
        };
        let (reply, done) = oneshot::channel();
        if tx
            .send(EngineSignal::Command {
                command,
                reply: Some(reply),
            })
            .is_err()
        {
            return;
        }
        let _ = done.await;
    }

    pub async fn toggle_play(&self) {
        self.request(EngineCommand::TogglePlay).await
    }

    pub async fn play(&self) {
        self.request(EngineCommand::Play).await
    }

    pub async fn pause(&self) {
        self.request(EngineCommand::Pause).await
    }

    pub async fn next(&self) {
        self.request(EngineCommand::Next).await
    }

    pub async fn previous(&self) {
        self.request(EngineCommand::Previous).await
    }

    pub async fn seek(&self, position: f64) {
        self.request(EngineCommand::Seek(position)).await
    }

    pub async fn seek_by(&self, offset: f64) {
        self.request(EngineCommand::SeekBy(offset)).await
    }

    pub async fn set_volume(&self, volume: f64) {
        self.request(EngineCommand::SetVolume(volume)).await
    }

    pub async fn set_rate(&self, rate: f64) {
        self.request(EngineCommand::SetRate(rate)).await
    }

    pub async fn toggle_loop(&self) {
        self.request(EngineCommand::ToggleLoop).await
    }

    pub async fn set_lifecycle(&self, state: LifecycleState) {
        self.request(EngineCommand::SetLifecycle(state)).await
    }

    pub async fn stop(&self) {
        self.request(EngineCommand::Stop).await
    }

    /// Jumps to a playlist entry, starting from its stored position.
    pub async fn load_index(&self, index: usize) {
        self.request(EngineCommand::Load {
            index,
            start_time: None,
            trigger: None,
        })
        .await
    }

    /// Saves the position, releases every resource and stops the loop.
    /// Safe to call more than once.
    pub async fn teardown(&self) {
        self.finish(EngineCommand::Teardown).await;
        info!("Engine torn down");
    }

    /// Stops the loop but leaves the current handle playing, unowned, in the
    /// handle registry. An engine sharing that registry adopts it when it
    /// initializes on the same file, so a rebuilt UI continues without a gap.
    pub async fn detach(&self) {
        self.finish(EngineCommand::Detach).await;
        info!("Engine detached from its handle");
    }

    async fn finish(&self, command: EngineCommand) {
        let (tx, task) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
                Lifecycle::Running { tx, task } => (tx, task),
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };
        let (reply, done) = oneshot::channel();
        if tx
            .send(EngineSignal::Command {
                command,
                reply: Some(reply),
            })
            .is_ok()
        {
            let _ = done.await;
        }
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!(error = %e, "Engine loop ended abnormally");
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if let Lifecycle::Running { task, .. } = self.lifecycle.get_mut() {
            task.abort();
        }
    }
}

// ============================================================================
// Engine loop
// ============================================================================

#[derive(Default)]
struct Timers {
    autoplay: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    confirm: Option<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
    preload: Option<JoinHandle<()>>,
}

fn abort(slot: &mut Option<JoinHandle<()>>) {
    if let Some(task) = slot.take() {
        task.abort();
    }
}

impl Timers {
    fn abort_all(&mut self) {
        abort(&mut self.autoplay);
        abort(&mut self.poll);
        abort(&mut self.confirm);
        abort(&mut self.network);
        abort(&mut self.preload);
    }
}

struct EngineLoop {
    tx: SignalSender,
    playback: PlaybackConfig,
    book: BookInfo,
    notifier: Option<Arc<dyn Notifier>>,
    event_bus: Arc<EventBus>,
    state: Arc<watch::Sender<PlaybackSnapshot>>,
    session: Arc<AudioSession>,
    cache: Arc<PreloadCache>,
    progress: Arc<ProgressStore>,
    navigator: PlaylistNavigator,
    autoplay: AutoplayController,
    completion: CompletionWatcher,
    classifier: ErrorClassifier,
    controls: ExternalControlSurface,
    profile: PlatformProfile,
    looping: bool,
    foreground: bool,
    /// Last position reported by the element, or the load offset before that.
    last_position: f64,
    error: Option<String>,
    timers: Timers,
    stopped: bool,
}

impl EngineLoop {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineSignal>) {
        debug!("Engine loop started");
        while let Some(signal) = rx.recv().await {
            let stop = self.handle(signal).await;
            self.publish();
            if stop {
                break;
            }
        }
        self.shutdown(false).await;
        debug!("Engine loop finished");
    }

    async fn handle(&mut self, signal: EngineSignal) -> bool {
        match signal {
            EngineSignal::Media { generation, event } => {
                self.on_media(generation, event).await;
            }
            EngineSignal::Command { command, reply } => {
                let stop = self.on_command(command).await;
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return stop;
            }
            EngineSignal::AutoplayRetry { generation } => {
                self.timers.autoplay = None;
                if generation == self.session.generation() {
                    self.attempt_autoplay(generation).await;
                }
            }
            EngineSignal::CompletionPoll => self.on_poll(),
            EngineSignal::CompletionConfirm {
                generation,
                file_id,
            } => {
                self.timers.confirm = None;
                self.on_confirm(generation, file_id).await;
            }
            EngineSignal::NetworkRetry {
                generation,
                position,
                resume,
            } => {
                self.timers.network = None;
                if generation == self.session.generation() {
                    let index = self.navigator.current_index();
                    let trigger = resume.then_some(AutoplayTrigger::UserRequested);
                    self.load_entry(index, Some(position), trigger, true).await;
                }
            }
        }
        false
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.event_bus.emit(CoreEvent::Playback(event));
    }

    fn notify(&self, notice: Notice) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(notice);
        }
    }

    fn publish(&self) {
        let current_time = match self.session.current_file_id() {
            Some(_) => self.session.current_time(),
            None => self.last_position,
        };
        self.state.send_replace(PlaybackSnapshot {
            file_id: self.session.current_file_id(),
            index: self.navigator.current_index(),
            current_time,
            duration: self.session.duration(),
            playing: self.session.is_playing(),
            loading: self.session.is_loading(),
            looping: self.looping,
            volume: self.session.volume(),
            rate: self.session.rate(),
            error: self.error.clone(),
            autoplay: self.autoplay.state(),
        });
    }

    fn schedule(&self, delay: Duration, signal: EngineSignal) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(signal);
        })
    }

    fn schedule_autoplay(&mut self, generation: u64, delay: Duration) {
        abort(&mut self.timers.autoplay);
        self.timers.autoplay = Some(self.schedule(delay, EngineSignal::AutoplayRetry { generation }));
    }

    fn update_polling(&mut self) {
        let wanted = !self.stopped
            && self.session.current_file_id().is_some()
            && self.completion.should_poll(self.foreground);
        if !wanted {
            abort(&mut self.timers.poll);
            return;
        }
        if self.timers.poll.is_some() {
            return;
        }
        let tx = self.tx.clone();
        let every = self.completion.poll_interval();
        self.timers.poll = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(EngineSignal::CompletionPoll).is_err() {
                    break;
                }
            }
        }));
        debug!(interval_ms = every.as_millis() as u64, "Completion polling on");
    }

    fn spawn_preload(&mut self) {
        abort(&mut self.timers.preload);
        let upcoming = self.navigator.upcoming(self.playback.preload_count);
        if upcoming.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        self.timers.preload = Some(tokio::spawn(async move {
            cache.preload_upcoming(&upcoming).await;
        }));
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn load_entry(
        &mut self,
        index: usize,
        start_time: Option<f64>,
        trigger: Option<AutoplayTrigger>,
        force_reload: bool,
    ) {
        let Some(entry) = self.navigator.jump_to(index).cloned() else {
            warn!(index, "Load requested past the end of the playlist");
            return;
        };

        abort(&mut self.timers.autoplay);
        abort(&mut self.timers.confirm);
        self.completion.reset();
        if !force_reload {
            abort(&mut self.timers.network);
            self.classifier.reset();
            self.error = None;
        }

        let options = LoadOptions {
            start_time,
            force_reload,
        };
        let outcome = match self.session.load(&entry, options).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_superseded() => {
                debug!(file_id = %entry.id, "Load superseded");
                return;
            }
            Err(e) => {
                error!(file_id = %entry.id, error = %e, "Load failed");
                let message = e.to_string();
                self.emit(PlaybackEvent::Error {
                    file_id: Some(entry.id.clone()),
                    kind: "load".to_string(),
                    message: message.clone(),
                    recoverable: e.is_transient(),
                });
                if !self.autoplay.is_chained() {
                    self.notify(Notice::error("This file could not be loaded."));
                }
                self.error = Some(message);
                self.session.clear_loading();
                return;
            }
        };

        self.last_position = outcome.start_time;
        self.emit(PlaybackEvent::FileLoaded {
            file_id: entry.id.clone(),
            index,
            start_position_ms: (outcome.start_time * 1000.0) as u64,
            reused: outcome.reused,
        });
        self.controls.publish_metadata(&self.book, &entry);
        if !force_reload {
            self.spawn_preload();
        }
        self.update_polling();

        if outcome.reused && self.session.is_playing() {
            self.autoplay.mark_playing();
            self.controls.publish_state(true);
            return;
        }
        match trigger {
            Some(trigger) => self.arm_autoplay(trigger, outcome.generation).await,
            None => self.autoplay.cancel(),
        }
    }

    // ------------------------------------------------------------------------
    // Autoplay
    // ------------------------------------------------------------------------

    async fn arm_autoplay(&mut self, trigger: AutoplayTrigger, generation: u64) {
        match self
            .autoplay
            .arm(trigger, generation, self.session.ready_state())
        {
            ArmDecision::AttemptNow => self.attempt_autoplay(generation).await,
            ArmDecision::WaitForPlayThrough => {
                let fallback = self.autoplay.retry_delay() * PLAY_THROUGH_FALLBACK_DELAYS;
                self.schedule_autoplay(generation, fallback);
            }
        }
    }

    async fn attempt_autoplay(&mut self, generation: u64) {
        let session = Arc::clone(&self.session);
        let outcome = self.autoplay.attempt(session.as_ref(), generation).await;
        let file_id = session.current_file_id().unwrap_or_default();

        match outcome {
            AttemptOutcome::Started => {
                abort(&mut self.timers.autoplay);
                self.error = None;
                self.controls.publish_state(true);
            }
            AttemptOutcome::RetryAfter(delay) => self.schedule_autoplay(generation, delay),
            AttemptOutcome::Blocked => {
                self.session.clear_loading();
                self.emit(PlaybackEvent::AutoplayBlocked { file_id });
                self.controls.publish_state(false);
                if self.profile.requires_user_gesture_on_block() {
                    self.notify(Notice::info("Tap play to continue listening."));
                }
            }
            AttemptOutcome::Exhausted { attempts } => {
                self.session.clear_loading();
                self.emit(PlaybackEvent::AutoplayExhausted { file_id, attempts });
                self.controls.publish_state(false);
                self.notify(Notice::warning(
                    "Playback couldn't start automatically. Press play to continue.",
                ));
            }
            AttemptOutcome::Stale => {}
        }
    }

    // ------------------------------------------------------------------------
    // Media events
    // ------------------------------------------------------------------------

    async fn on_media(&mut self, generation: u64, event: MediaEvent) {
        let was_playing = self.session.is_playing();
        if !self.session.handle_event(generation, &event) {
            return;
        }
        let Some(file_id) = self.session.current_file_id() else {
            return;
        };

        match event {
            MediaEvent::TimeUpdate => {
                let position = self.session.current_time();
                if position > 0.0 {
                    self.last_position = position;
                }
                self.progress
                    .save(&file_id, position, self.session.duration());
            }
            MediaEvent::LoadedMetadata => {
                self.controls.publish_position(
                    self.last_position,
                    self.session.duration(),
                    self.session.rate(),
                );
            }
            MediaEvent::Playing => {
                abort(&mut self.timers.autoplay);
                self.classifier.reset();
                self.autoplay.mark_playing();
                self.error = None;
                self.emit(PlaybackEvent::Started { file_id });
                self.controls.publish_state(true);
            }
            MediaEvent::Paused => {
                let position = self.session.current_time();
                self.progress
                    .save(&file_id, position, self.session.duration());
                self.emit(PlaybackEvent::Paused {
                    file_id,
                    position_ms: (position * 1000.0) as u64,
                });
                self.controls.publish_state(false);
            }
            MediaEvent::CanPlayThrough => {
                if self.autoplay.wants_attempt_on(&event) {
                    abort(&mut self.timers.autoplay);
                    self.attempt_autoplay(generation).await;
                }
            }
            MediaEvent::Ended => self.on_completion(file_id).await,
            MediaEvent::Error(code) => self.on_media_error(code, generation, file_id, was_playing).await,
            MediaEvent::CanPlay | MediaEvent::Waiting | MediaEvent::Stalled => {}
        }
    }

    async fn on_media_error(
        &mut self,
        code: MediaErrorCode,
        generation: u64,
        file_id: String,
        was_playing: bool,
    ) {
        let chained = self.autoplay.is_chained();
        let classification = self.classifier.classify(code, chained);
        self.emit(PlaybackEvent::Error {
            file_id: Some(file_id.clone()),
            kind: classification.kind.as_str().to_string(),
            message: classification.message.clone(),
            recoverable: classification.action.is_recoverable(),
        });
        if let Some(notice) = classification.notice.clone() {
            self.notify(notice);
        }

        match classification.action {
            RecoveryAction::Ignore => {}
            RecoveryAction::Retry { delay, attempt } => {
                info!(file_id = %file_id, attempt, delay_ms = delay.as_millis() as u64, "Reloading after media error");
                self.error = Some(classification.message);
                let resume = was_playing || chained || self.autoplay.state() == AutoplayState::Attempting;
                abort(&mut self.timers.network);
                self.timers.network = Some(self.schedule(
                    delay,
                    EngineSignal::NetworkRetry {
                        generation,
                        position: self.last_position,
                        resume,
                    },
                ));
            }
            RecoveryAction::MarkFailed => {
                self.error = Some(classification.message);
                self.navigator.mark_failed(&file_id);
                self.autoplay.cancel();
                self.session.clear_loading();
                if (chained || was_playing) && !self.navigator.is_last() {
                    self.navigate(Direction::Next, NavigationCause::Completion)
                        .await;
                }
            }
            RecoveryAction::ResetToPaused => {
                self.error = Some(classification.message);
                self.autoplay.cancel();
                self.autoplay.set_chained(false);
                self.session.pause();
                self.session.clear_loading();
                self.controls.publish_state(false);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    fn on_poll(&mut self) {
        if !self.session.is_playing() || self.timers.confirm.is_some() {
            return;
        }
        let Some(file_id) = self.session.current_file_id() else {
            return;
        };
        if !self
            .completion
            .is_near_end(self.session.current_time(), self.session.duration())
        {
            return;
        }
        if self.completion.note_near_end(&file_id) {
            debug!(file_id = %file_id, "Near end; confirming");
            let generation = self.session.generation();
            self.timers.confirm = Some(self.schedule(
                self.completion.confirm_delay(),
                EngineSignal::CompletionConfirm {
                    generation,
                    file_id,
                },
            ));
        }
    }

    async fn on_confirm(&mut self, generation: u64, file_id: String) {
        if !self.completion.take_confirmation(&file_id) || generation != self.session.generation() {
            return;
        }
        let near_end = self
            .completion
            .is_near_end(self.session.current_time(), self.session.duration());
        if near_end {
            info!(file_id = %file_id, "Completion detected by polling");
            self.on_completion(file_id).await;
        }
    }

    async fn on_completion(&mut self, file_id: String) {
        let Some(_guard) = self.completion.begin(&file_id) else {
            return;
        };
        self.completion.reset();
        abort(&mut self.timers.confirm);
        self.emit(PlaybackEvent::Completed {
            file_id: file_id.clone(),
        });

        match CompletionWatcher::action(self.looping, self.navigator.is_last()) {
            CompletionAction::RestartLoop => {
                let session = Arc::clone(&self.session);
                let restarted = restart_loop(
                    session.as_ref(),
                    self.playback.loop_restart_attempts,
                    self.autoplay.retry_delay(),
                )
                .await;
                if restarted {
                    self.last_position = 0.0;
                    self.emit(PlaybackEvent::LoopRestarted { file_id });
                } else {
                    warn!(file_id = %file_id, "Loop restart gave up");
                    self.controls.publish_state(false);
                }
            }
            CompletionAction::Advance => {
                self.navigate(Direction::Next, NavigationCause::Completion)
                    .await;
            }
            CompletionAction::FinishPlaylist => self.finish_playlist(&file_id).await,
        }
    }

    async fn finish_playlist(&mut self, file_id: &str) {
        if !self.navigator.is_failed(file_id) {
            let duration = self.session.duration();
            let position = duration.unwrap_or_else(|| self.session.current_time());
            self.progress.force_save(file_id, position, duration).await;
        }
        abort(&mut self.timers.autoplay);
        self.session.pause();
        self.autoplay.cancel();
        self.autoplay.set_chained(false);
        self.controls.publish_state(false);
        self.emit(PlaybackEvent::PlaylistFinished);
        self.notify(Notice::success("Playback complete."));
        info!("Playlist finished");
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    async fn navigate(&mut self, direction: Direction, cause: NavigationCause) {
        let session = Arc::clone(&self.session);
        let notifier = self.notifier.clone();
        let outcome = {
            let ctx = NavigationContext {
                progress: &self.progress,
                target: session.as_ref(),
                autoplay: &self.autoplay,
                notifier: notifier.as_deref(),
                cause,
            };
            match direction {
                Direction::Next => self.navigator.advance(&ctx).await,
                Direction::Previous => self.navigator.retreat(&ctx).await,
            }
        };

        match outcome {
            NavigationOutcome::Moved {
                from,
                to,
                index,
                chained,
                resume_at,
            } => {
                self.emit(PlaybackEvent::Advanced {
                    from,
                    to: to.id.clone(),
                    direction,
                    chained,
                });
                let trigger = chained.then_some(AutoplayTrigger::ChainedAdvance);
                self.load_entry(index, Some(resume_at), trigger, false).await;
            }
            NavigationOutcome::Exhausted => {
                if let Some(file_id) = self.session.current_file_id() {
                    self.finish_playlist(&file_id).await;
                }
            }
            NavigationOutcome::Boundary(direction) => {
                self.emit(PlaybackEvent::BoundaryReached { direction });
                if direction == Direction::Next {
                    abort(&mut self.timers.autoplay);
                    self.autoplay.cancel();
                    self.controls.publish_state(false);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn user_play(&mut self) {
        if self.session.current_file_id().is_none() {
            return;
        }
        abort(&mut self.timers.autoplay);
        match self.session.play().await {
            Ok(()) => {
                self.autoplay.mark_playing();
                self.error = None;
                self.controls.publish_state(true);
            }
            Err(rejection) => {
                warn!(%rejection, "Play refused");
                self.error = Some(rejection.to_string());
                self.emit(PlaybackEvent::Error {
                    file_id: self.session.current_file_id(),
                    kind: "play_rejected".to_string(),
                    message: rejection.to_string(),
                    recoverable: true,
                });
            }
        }
    }

    fn user_pause(&mut self) {
        abort(&mut self.timers.autoplay);
        self.autoplay.cancel();
        self.autoplay.set_chained(false);
        self.session.pause();
        self.controls.publish_state(false);
    }

    fn seek_to(&mut self, position: f64) {
        let Some(file_id) = self.session.current_file_id() else {
            return;
        };
        if !position.is_finite() {
            return;
        }
        let position = match self.session.duration() {
            Some(duration) => position.clamp(0.0, duration),
            None => position.max(0.0),
        };
        self.session.seek(position);
        self.last_position = position;
        self.completion.reset();
        abort(&mut self.timers.confirm);
        self.emit(PlaybackEvent::Seeked {
            file_id,
            position_ms: (position * 1000.0) as u64,
        });
        self.controls
            .publish_position(position, self.session.duration(), self.session.rate());
    }

    async fn on_command(&mut self, command: EngineCommand) -> bool {
        if self.stopped {
            return matches!(command, EngineCommand::Teardown | EngineCommand::Detach);
        }
        match command {
            EngineCommand::Load {
                index,
                start_time,
                trigger,
            } => self.load_entry(index, start_time, trigger, false).await,
            EngineCommand::Play => self.user_play().await,
            EngineCommand::Pause => self.user_pause(),
            EngineCommand::TogglePlay => {
                if self.session.is_playing() {
                    self.user_pause();
                } else {
                    self.user_play().await;
                }
            }
            EngineCommand::Next => self.navigate(Direction::Next, NavigationCause::User).await,
            EngineCommand::Previous => {
                self.navigate(Direction::Previous, NavigationCause::User)
                    .await
            }
            EngineCommand::Seek(position) => self.seek_to(position),
            EngineCommand::SeekBy(offset) => {
                let position = self.session.current_time() + offset;
                self.seek_to(position);
            }
            EngineCommand::SetVolume(volume) => self.session.set_volume(volume),
            EngineCommand::SetRate(rate) => {
                self.session.set_rate(rate);
                self.controls.publish_position(
                    self.session.current_time(),
                    self.session.duration(),
                    self.session.rate(),
                );
            }
            EngineCommand::ToggleLoop => {
                self.looping = !self.looping;
                debug!(looping = self.looping, "Loop toggled");
            }
            EngineCommand::SetLifecycle(state) => self.on_lifecycle(state).await,
            EngineCommand::Stop => {
                if let Some(file_id) = self.session.current_file_id() {
                    let position = self.session.current_time();
                    self.progress
                        .force_save(&file_id, position, self.session.duration())
                        .await;
                }
                self.user_pause();
            }
            EngineCommand::Teardown => {
                self.shutdown(false).await;
                return true;
            }
            EngineCommand::Detach => {
                self.shutdown(true).await;
                return true;
            }
        }
        false
    }

    async fn on_lifecycle(&mut self, state: LifecycleState) {
        let foreground = state.is_foreground();
        if foreground == self.foreground {
            return;
        }
        self.foreground = foreground;
        debug!(?state, "Lifecycle changed");
        self.update_polling();

        if !foreground {
            if let Some(file_id) = self.session.current_file_id() {
                self.progress
                    .save(&file_id, self.session.current_time(), self.session.duration());
            }
            self.progress.flush().await;
            return;
        }

        let generation = self.session.generation();
        if self.autoplay.rearm(generation) {
            self.attempt_autoplay(generation).await;
        }
    }

    /// Releases everything the loop owns. With `hand_off` the session only
    /// detaches, so its handle stays live in the registry.
    async fn shutdown(&mut self, hand_off: bool) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.timers.abort_all();

        if let Some(file_id) = self.session.current_file_id() {
            let position = match self.session.current_time() {
                t if t > 0.0 => t,
                _ => self.last_position,
            };
            self.progress
                .force_save(&file_id, position, self.session.duration())
                .await;
        }
        self.progress.cancel_pending();
        self.controls.dispose();
        self.autoplay.cancel();
        if hand_off {
            self.session.detach();
        } else {
            self.session.dispose();
        }
        self.cache.shutdown();
        self.publish();
        info!("Engine resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_commands_map_onto_engine_commands() {
        assert_eq!(EngineCommand::from(TransportCommand::Play), EngineCommand::Play);
        assert_eq!(
            EngineCommand::from(TransportCommand::SeekTo(12.0)),
            EngineCommand::Seek(12.0)
        );
        assert_eq!(
            EngineCommand::from(TransportCommand::SeekBy(-30.0)),
            EngineCommand::SeekBy(-30.0)
        );
    }

    #[test]
    fn test_default_snapshot() {
        let snapshot = PlaybackSnapshot::default();
        assert_eq!(snapshot.volume, 1.0);
        assert_eq!(snapshot.autoplay, AutoplayState::Idle);
        assert!(snapshot.file_id.is_none());
    }

    #[tokio::test]
    async fn test_transport_reports_watch_state() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(PlaybackSnapshot::default());
        let transport = EngineTransport {
            tx,
            state: state.subscribe(),
        };

        assert!(!transport.is_playing());
        state.send_replace(PlaybackSnapshot {
            playing: true,
            ..Default::default()
        });
        assert!(transport.is_playing());

        transport.dispatch(TransportCommand::Next);
        assert!(matches!(
            rx.recv().await,
            Some(EngineSignal::Command {
                command: EngineCommand::Next,
                reply: None
            })
        ));
    }
}
