//! # Playback Error Types
//!
//! Errors surfaced by the playback components. Transport operations on the
//! engine never return these to the host; they are resolved into snapshot
//! state, events and notices. Only engine construction and `initialize`
//! report failures directly.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// Neither the cache, the authenticated fetch nor the fallback produced a
    /// playable source.
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// A newer load replaced this one while it was in flight.
    #[error("Load superseded for {0}")]
    Superseded(String),

    // ========================================================================
    // Host Errors
    // ========================================================================
    /// The host could not create a media element or object URL.
    #[error("Media host error: {0}")]
    MediaHost(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    // ========================================================================
    // Progress Errors
    // ========================================================================
    #[error("Progress API error: {0}")]
    ProgressApi(String),

    // ========================================================================
    // Lifecycle / Configuration Errors
    // ========================================================================
    #[error("Invalid playback configuration: {0}")]
    InvalidConfig(String),

    #[error("Playlist is empty")]
    EmptyPlaylist,

    #[error("Engine already initialized")]
    AlreadyInitialized,

    #[error("Session disposed")]
    Disposed,

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl PlaybackError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::SourceUnavailable(_) | PlaybackError::ProgressApi(_) => true,
            PlaybackError::Bridge(err) => err.is_network(),
            _ => false,
        }
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        match self {
            PlaybackError::SourceUnavailable(_) => true,
            PlaybackError::Bridge(BridgeError::Http { .. }) => true,
            _ => false,
        }
    }

    /// A stale result that callers should drop silently.
    pub fn is_superseded(&self) -> bool {
        matches!(self, PlaybackError::Superseded(_) | PlaybackError::Disposed)
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PlaybackError::SourceUnavailable("x".into()).is_transient());
        assert!(PlaybackError::Bridge(BridgeError::Http {
            status: 503,
            message: "busy".into()
        })
        .is_network_error());
        assert!(!PlaybackError::EmptyPlaylist.is_transient());
        assert!(PlaybackError::Superseded("a".into()).is_superseded());
    }
}
