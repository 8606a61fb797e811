//! Media Element Abstraction
//!
//! A [`MediaElement`] is the host's audio output handle: it owns a source,
//! buffers it, and reports progress through [`MediaEvent`]s. The engine never
//! decodes audio itself; it only drives elements created by a [`MediaHost`].
//!
//! Elements are expected to behave like an HTML media element. `play()` may be
//! refused by host policy, `current_time`/`duration` are in seconds and events
//! are delivered on the host's own thread, so listeners must be cheap and
//! thread-safe.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::platform::PlatformSendSync;

/// How much media data the element has buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

impl ReadyState {
    /// Whether enough data is buffered for `play()` to start immediately.
    pub fn can_play(self) -> bool {
        self >= ReadyState::HaveFutureData
    }
}

/// Numeric media error code as reported by the element.
///
/// Codes 1 through 4 follow the HTML media error convention: aborted, network,
/// decode and source-not-supported. Anything else is host specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaErrorCode(pub u16);

impl MediaErrorCode {
    pub const ABORTED: MediaErrorCode = MediaErrorCode(1);
    pub const NETWORK: MediaErrorCode = MediaErrorCode(2);
    pub const DECODE: MediaErrorCode = MediaErrorCode(3);
    pub const SRC_NOT_SUPPORTED: MediaErrorCode = MediaErrorCode(4);
}

impl fmt::Display for MediaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media error {}", self.0)
    }
}

/// Events emitted by a media element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MediaEvent {
    LoadedMetadata,
    CanPlay,
    CanPlayThrough,
    Playing,
    Paused,
    Waiting,
    Stalled,
    TimeUpdate,
    Ended,
    Error(MediaErrorCode),
}

impl MediaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::LoadedMetadata => "loadedmetadata",
            MediaEvent::CanPlay => "canplay",
            MediaEvent::CanPlayThrough => "canplaythrough",
            MediaEvent::Playing => "playing",
            MediaEvent::Paused => "pause",
            MediaEvent::Waiting => "waiting",
            MediaEvent::Stalled => "stalled",
            MediaEvent::TimeUpdate => "timeupdate",
            MediaEvent::Ended => "ended",
            MediaEvent::Error(_) => "error",
        }
    }
}

/// Reasons a host may refuse `play()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayRejection {
    /// Autoplay policy requires a user gesture.
    NotAllowed,
    /// A newer load or pause interrupted the request.
    Aborted,
    /// The current source cannot be played at all.
    NotSupported,
    /// Buffering failed.
    Network,
    Other(String),
}

impl fmt::Display for PlayRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayRejection::NotAllowed => write!(f, "NotAllowedError"),
            PlayRejection::Aborted => write!(f, "AbortError"),
            PlayRejection::NotSupported => write!(f, "NotSupportedError"),
            PlayRejection::Network => write!(f, "NetworkError"),
            PlayRejection::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Identifier returned by [`MediaElement::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback registered on an element.
pub type MediaListener = Box<dyn Fn(MediaEvent) + Send + Sync>;

/// Host audio element.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait MediaElement: PlatformSendSync {
    /// Point the element at a new source. Does not start loading.
    fn set_source(&self, url: &str);

    /// Drop the current source so the element releases buffered data.
    fn clear_source(&self);

    fn source(&self) -> Option<String>;

    /// Begin (re)loading the current source.
    fn load(&self);

    /// Request playback. Resolves once the host has accepted or refused.
    async fn play(&self) -> std::result::Result<(), PlayRejection>;

    fn pause(&self);

    fn is_paused(&self) -> bool;

    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);

    /// Total duration, `None` until metadata is known or when unbounded.
    fn duration(&self) -> Option<f64>;

    fn ready_state(&self) -> ReadyState;

    fn set_volume(&self, volume: f64);

    fn set_playback_rate(&self, rate: f64);

    /// Last error recorded on the element, if any.
    fn error(&self) -> Option<MediaErrorCode>;

    fn add_listener(&self, listener: MediaListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Factory for media elements and in-memory object URLs.
pub trait MediaHost: PlatformSendSync {
    fn create_element(&self) -> Result<std::sync::Arc<dyn MediaElement>>;

    /// Register fetched bytes under a locally resolvable URL.
    fn create_object_url(&self, data: Bytes, mime_type: &str) -> Result<String>;

    /// Release a URL created by [`MediaHost::create_object_url`]. Unknown URLs
    /// are ignored.
    fn revoke_object_url(&self, url: &str);
}
