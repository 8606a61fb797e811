//! Now-Playing Surface
//!
//! Lock screens, notification shades and hardware media keys. The host shows
//! metadata and forwards transport actions back into the engine through
//! registered handlers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::platform::PlatformSendSync;

/// Artwork entry shown next to the title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub src: String,
    pub sizes: Option<String>,
    pub mime_type: Option<String>,
}

/// Metadata published for the current entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Vec<Artwork>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfacePlaybackState {
    None,
    Paused,
    Playing,
}

/// Position information for scrubbers on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub duration: f64,
    pub position: f64,
    pub playback_rate: f64,
}

/// Transport actions the host may forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportAction {
    Play,
    Pause,
    Stop,
    PreviousTrack,
    NextTrack,
    SeekBackward,
    SeekForward,
    SeekTo,
}

impl TransportAction {
    pub const ALL: [TransportAction; 8] = [
        TransportAction::Play,
        TransportAction::Pause,
        TransportAction::Stop,
        TransportAction::PreviousTrack,
        TransportAction::NextTrack,
        TransportAction::SeekBackward,
        TransportAction::SeekForward,
        TransportAction::SeekTo,
    ];
}

/// Arguments delivered with an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDetails {
    /// Requested offset in seconds for seek backward/forward.
    pub seek_offset: Option<f64>,
    /// Absolute target in seconds for seek-to.
    pub seek_time: Option<f64>,
}

pub type ActionHandler = Arc<dyn Fn(ActionDetails) + Send + Sync>;

/// Host-owned now-playing surface.
///
/// A host without such a surface returns `false` from
/// [`NowPlayingSurface::is_supported`] and the engine skips every other call.
pub trait NowPlayingSurface: PlatformSendSync {
    fn is_supported(&self) -> bool;

    fn set_metadata(&self, metadata: Option<NowPlayingMetadata>);

    fn set_playback_state(&self, state: SurfacePlaybackState);

    fn set_position_state(&self, state: Option<PositionState>);

    /// Install or clear (`None`) the handler for an action.
    fn set_action_handler(&self, action: TransportAction, handler: Option<ActionHandler>);
}
