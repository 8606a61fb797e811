//! # Audiobook Playback Engine
//!
//! Stateful coordinators behind a single "now playing" surface: one live
//! media handle across file switches, network failures, backgrounded apps and
//! platform autoplay restrictions.
//!
//! ## Overview
//!
//! - [`session::AudioSession`]: owns the media handle; load, play, seek, teardown
//! - [`preload::PreloadCache`]: object-URL cache for upcoming entries
//! - [`progress::ProgressStore`]: throttled and forced position writes
//! - [`classifier::ErrorClassifier`]: media error code to recovery action
//! - [`autoplay::AutoplayController`]: bounded-retry autoplay state machine
//! - [`completion::CompletionWatcher`]: end-of-file detection
//! - [`navigator::PlaylistNavigator`]: next/previous with progress flush
//! - [`controls::ExternalControlSurface`]: lock-screen and media-key bridge
//! - [`initializer::SessionInitializer`]: starting file and offset
//! - [`engine::PlaybackEngine`]: the facade a host shell talks to
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::{InitializeRequest, PlaybackConfig, PlaybackEngine};
//!
//! let engine = PlaybackEngine::new(core_config, PlaybackConfig::default())?;
//! let start = engine.initialize(InitializeRequest::new(playlist)).await?;
//! engine.toggle_play().await;
//! let mut state = engine.subscribe_state();
//! ```

pub mod autoplay;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod controls;
pub mod engine;
pub mod error;
pub mod initializer;
pub mod navigator;
pub mod platform;
pub mod preload;
pub mod progress;
pub mod registry;
pub mod session;
pub mod source;
pub mod subscription;
pub mod types;

pub use autoplay::{AutoplayController, AutoplayState, AutoplayTrigger};
pub use classifier::{ErrorClassifier, MediaErrorKind, RecoveryAction};
pub use completion::CompletionWatcher;
pub use config::{CompletionTuning, CompletionTuningSet, PlaybackConfig};
pub use controls::{ExternalControlSurface, TransportCommand};
pub use engine::{EngineCommand, PlaybackEngine, PlaybackSnapshot};
pub use error::{PlaybackError, Result};
pub use initializer::{InitialPosition, SessionInitializer, StartSource};
pub use navigator::PlaylistNavigator;
pub use platform::{PlatformClass, PlatformProfile};
pub use preload::PreloadCache;
pub use progress::{HttpProgressApi, ProgressApi, ProgressRecord, ProgressStore, ProgressUpdate};
pub use registry::{HandleKey, HandleRegistry, SessionId};
pub use session::{AudioSession, LoadOptions, LoadOutcome};
pub use source::{AudioFetch, FetchedAudio, HttpAudioFetcher, SourceResolver};
pub use types::{BookInfo, InitializeHints, InitializeRequest, PlaylistEntry};
