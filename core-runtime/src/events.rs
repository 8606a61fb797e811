//! # Event Bus System
//!
//! Typed notifications emitted by the playback engine over a
//! `tokio::sync::broadcast` channel. Hosts subscribe to drive UI, analytics or
//! diagnostics without reaching into engine internals.
//!
//! ```text
//! ┌──────────────┐   emit    ┌───────────┐  subscribe  ┌────────────┐
//! │ AudioSession ├──────────>│           ├────────────>│ UI shell   │
//! ├──────────────┤           │ EventBus  │             └────────────┘
//! │ ProgressStore├──────────>│ (broadcast│  subscribe  ┌────────────┐
//! ├──────────────┤           │  channel) ├────────────>│ Diagnostics│
//! │ PreloadCache ├──────────>│           │             └────────────┘
//! └──────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Started {
//!     file_id: "ch-01.mp3".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Playback(_))));
//! # }
//! ```
//!
//! Emitting with no subscribers is not an error worth reporting; the engine
//! ignores the `SendError` it gets back in that case. Slow subscribers observe
//! `RecvError::Lagged` and keep going.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 128;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Playback(PlaybackEvent),
    Progress(ProgressEvent),
    Cache(CacheEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Progress(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { recoverable, .. }) => {
                if *recoverable {
                    EventSeverity::Warning
                } else {
                    EventSeverity::Error
                }
            }
            CoreEvent::Playback(PlaybackEvent::AutoplayBlocked { .. })
            | CoreEvent::Playback(PlaybackEvent::AutoplayExhausted { .. })
            | CoreEvent::Progress(ProgressEvent::SaveFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::FileLoaded { .. })
            | CoreEvent::Playback(PlaybackEvent::PlaylistFinished)
            | CoreEvent::Playback(PlaybackEvent::Advanced { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Direction of a playlist move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
}

/// Events related to the active audio session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A file was attached to the playback surface.
    FileLoaded {
        file_id: String,
        index: usize,
        start_position_ms: u64,
        /// The existing handle was adopted instead of fetching again.
        reused: bool,
    },
    Started {
        file_id: String,
    },
    Paused {
        file_id: String,
        position_ms: u64,
    },
    Seeked {
        file_id: String,
        position_ms: u64,
    },
    /// The current file reached its end.
    Completed {
        file_id: String,
    },
    /// Loop mode restarted the current file from the top.
    LoopRestarted {
        file_id: String,
    },
    /// The playlist moved to another entry.
    Advanced {
        from: String,
        to: String,
        direction: Direction,
        /// Playback should resume on the target without a user gesture.
        chained: bool,
    },
    /// A move was requested past either end of the playlist.
    BoundaryReached {
        direction: Direction,
    },
    /// The last entry finished and nothing follows.
    PlaylistFinished,
    /// Host autoplay policy refused playback; a user gesture is required.
    AutoplayBlocked {
        file_id: String,
    },
    AutoplayExhausted {
        file_id: String,
        attempts: u32,
    },
    Error {
        file_id: Option<String>,
        kind: String,
        message: String,
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::FileLoaded { .. } => "File loaded",
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Seeked { .. } => "Position changed",
            PlaybackEvent::Completed { .. } => "File completed",
            PlaybackEvent::LoopRestarted { .. } => "Loop restarted",
            PlaybackEvent::Advanced { .. } => "Playlist moved",
            PlaybackEvent::BoundaryReached { .. } => "Playlist boundary reached",
            PlaybackEvent::PlaylistFinished => "Playlist finished",
            PlaybackEvent::AutoplayBlocked { .. } => "Autoplay blocked",
            PlaybackEvent::AutoplayExhausted { .. } => "Autoplay retries exhausted",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Progress Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    /// A position was written to the progress API.
    Saved {
        file_id: String,
        position_ms: u64,
        forced: bool,
    },
    /// The remote write failed; the offline mirror still holds the value.
    SaveFailed {
        file_id: String,
        message: String,
    },
}

impl ProgressEvent {
    fn description(&self) -> &str {
        match self {
            ProgressEvent::Saved { .. } => "Progress saved",
            ProgressEvent::SaveFailed { .. } => "Progress save failed",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Expired,
    Explicit,
    Cleared,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    Preloaded { file_id: String, bytes: u64 },
    PreloadFailed { file_id: String, message: String },
    Evicted { file_id: String, reason: EvictionReason },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Preloaded { .. } => "Entry preloaded",
            CacheEvent::PreloadFailed { .. } => "Preload failed",
            CacheEvent::Evicted { .. } => "Entry evicted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Each call creates an independent receiver of all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let cache_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
