//! # Host Bridge Traits
//!
//! Capabilities the audiobook playback engine needs from its host.
//!
//! ## Traits
//!
//! ### Audio output
//! - [`MediaHost`](media::MediaHost) - Creates media elements and object URLs
//! - [`MediaElement`](media::MediaElement) - A single audio output handle
//!
//! ### Platform integration
//! - [`NowPlayingSurface`](now_playing::NowPlayingSurface) - Lock screen and media keys
//! - [`Notifier`](notification::Notifier) - Short user-facing notices
//! - [`HostEnvironment`](environment::HostEnvironment) - Display mode, OS and lifecycle
//!
//! ### Networking & storage
//! - [`HttpClient`](http::HttpClient) - Audio downloads and progress sync
//! - [`SettingsStore`](storage::SettingsStore) - Offline progress mirror
//! - [`CredentialProvider`](storage::CredentialProvider) - Bearer tokens
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The runtime refuses to build a configuration when a required bridge is
//! missing, naming the capability in the error:
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .base_url("https://api.example.com/audio")
//!     .collection("book-1")
//!     .build()?; // Err(CapabilityMissing { capability: "MediaHost", .. })
//! ```
//!
//! ## Thread Safety
//!
//! Every bridge is bound on [`PlatformSendSync`](platform::PlatformSendSync)
//! because the engine calls into it from timer tasks and its signal loop.

pub mod environment;
pub mod error;
pub mod http;
pub mod media;
pub mod notification;
pub mod now_playing;
pub mod platform;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use environment::{DisplayMode, EnvironmentInfo, HostEnvironment, LifecycleState, OperatingSystem};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use media::{
    ListenerId, MediaElement, MediaErrorCode, MediaEvent, MediaHost, MediaListener,
    PlayRejection, ReadyState,
};
pub use notification::{Notice, NoticeLevel, Notifier};
pub use now_playing::{
    ActionDetails, ActionHandler, Artwork, NowPlayingMetadata, NowPlayingSurface, PositionState,
    SurfacePlaybackState, TransportAction,
};
pub use platform::{PlatformSend, PlatformSendSync};
pub use storage::{CredentialProvider, SettingsStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
