//! # External Control Surface
//!
//! Bridges lock-screen, notification-shade and media-key controls to the
//! engine through the host's [`NowPlayingSurface`].
//!
//! Handlers never touch playback directly. They turn a [`TransportAction`]
//! into a [`TransportCommand`] and hand it to a [`TransportTarget`], which for
//! the engine posts the same command the in-app buttons post. Play and pause
//! are only forwarded when the engine's current state disagrees.
//!
//! A host without the capability (or with the feature disabled) makes every
//! method a no-op.

use bridge_traits::{
    ActionDetails, ActionHandler, Artwork, NowPlayingMetadata, NowPlayingSurface, PositionState,
    SurfacePlaybackState, TransportAction,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::types::{BookInfo, PlaylistEntry};

/// Commands shared by in-app controls and the external surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    /// Relative seek in seconds; negative moves backwards.
    SeekBy(f64),
    SeekTo(f64),
}

/// Receiver of transport commands.
pub trait TransportTarget: Send + Sync {
    fn is_playing(&self) -> bool;

    fn dispatch(&self, command: TransportCommand);
}

/// Maps a surface action to an engine command. `None` when the action is a
/// no-op for the current state.
pub fn command_for(
    action: TransportAction,
    details: ActionDetails,
    playing: bool,
    skip_interval: f64,
) -> Option<TransportCommand> {
    match action {
        TransportAction::Play if !playing => Some(TransportCommand::Play),
        TransportAction::Pause if playing => Some(TransportCommand::Pause),
        TransportAction::Play | TransportAction::Pause => None,
        TransportAction::Stop => Some(TransportCommand::Stop),
        TransportAction::NextTrack => Some(TransportCommand::Next),
        TransportAction::PreviousTrack => Some(TransportCommand::Previous),
        TransportAction::SeekBackward => Some(TransportCommand::SeekBy(
            -details.seek_offset.unwrap_or(skip_interval).abs(),
        )),
        TransportAction::SeekForward => Some(TransportCommand::SeekBy(
            details.seek_offset.unwrap_or(skip_interval).abs(),
        )),
        TransportAction::SeekTo => details.seek_time.map(TransportCommand::SeekTo),
    }
}

/// Builds surface metadata: the title is the file name without extension.
pub fn metadata_for(book: &BookInfo, entry: &PlaylistEntry) -> NowPlayingMetadata {
    let title = match entry.file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => entry.file_name.clone(),
    };
    let album = if book.title.is_empty() {
        None
    } else {
        Some(book.title.clone())
    };
    let artwork = book
        .cover_url
        .iter()
        .map(|src| Artwork {
            src: src.clone(),
            sizes: None,
            mime_type: None,
        })
        .collect();

    NowPlayingMetadata {
        title,
        artist: book.author.clone(),
        album,
        artwork,
    }
}

pub struct ExternalControlSurface {
    surface: Option<Arc<dyn NowPlayingSurface>>,
    skip_interval: f64,
    registered: Mutex<bool>,
}

impl ExternalControlSurface {
    pub fn new(
        surface: Option<Arc<dyn NowPlayingSurface>>,
        enabled: bool,
        skip_interval: f64,
    ) -> Self {
        let surface = surface.filter(|s| enabled && s.is_supported());
        if surface.is_none() {
            debug!("Now-playing surface unavailable, remote controls disabled");
        }
        Self {
            surface,
            skip_interval,
            registered: Mutex::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.surface.is_some()
    }

    pub fn register(&self, target: Arc<dyn TransportTarget>) {
        let Some(surface) = &self.surface else {
            return;
        };
        for action in TransportAction::ALL {
            let target = Arc::clone(&target);
            let skip = self.skip_interval;
            let handler: ActionHandler = Arc::new(move |details: ActionDetails| {
                match command_for(action, details, target.is_playing(), skip) {
                    Some(command) => {
                        debug!(?action, ?command, "Remote control");
                        target.dispatch(command);
                    }
                    None => trace!(?action, "Remote control ignored, state already matches"),
                }
            });
            surface.set_action_handler(action, Some(handler));
        }
        *self.registered.lock() = true;
    }

    pub fn publish_metadata(&self, book: &BookInfo, entry: &PlaylistEntry) {
        if let Some(surface) = &self.surface {
            surface.set_metadata(Some(metadata_for(book, entry)));
        }
    }

    pub fn publish_state(&self, playing: bool) {
        if let Some(surface) = &self.surface {
            surface.set_playback_state(if playing {
                SurfacePlaybackState::Playing
            } else {
                SurfacePlaybackState::Paused
            });
        }
    }

    pub fn publish_position(&self, position: f64, duration: Option<f64>, rate: f64) {
        let Some(surface) = &self.surface else {
            return;
        };
        let state = duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|duration| PositionState {
                duration,
                position: position.clamp(0.0, duration),
                playback_rate: rate,
            });
        surface.set_position_state(state);
    }

    /// Clears handlers and published state. Safe to call more than once.
    pub fn dispose(&self) {
        let Some(surface) = &self.surface else {
            return;
        };
        let mut registered = self.registered.lock();
        if !*registered {
            return;
        }
        for action in TransportAction::ALL {
            surface.set_action_handler(action, None);
        }
        surface.set_metadata(None);
        surface.set_position_state(None);
        surface.set_playback_state(SurfacePlaybackState::None);
        *registered = false;
    }
}

impl Drop for ExternalControlSurface {
    fn drop(&mut self) {
        self.dispose();
    }
}
