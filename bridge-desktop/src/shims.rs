//! Small adapters for hosts without a native counterpart: fixed credentials,
//! notices routed into `tracing`, a static environment description and a
//! now-playing surface that reports itself unsupported.

use async_trait::async_trait;
use bridge_traits::{
    environment::{EnvironmentInfo, HostEnvironment, LifecycleState},
    error::Result,
    notification::{Notice, NoticeLevel, Notifier},
    now_playing::{
        ActionHandler, NowPlayingMetadata, NowPlayingSurface, PositionState,
        SurfacePlaybackState, TransportAction,
    },
    storage::CredentialProvider,
};
use parking_lot::RwLock;
use tracing::{error, info, warn};

/// Credential provider holding a token set by the host shell.
#[derive(Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }
}

/// Notifier that logs notices instead of displaying them.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                info!(target: "notice", message = %notice.message)
            }
            NoticeLevel::Warning => warn!(target: "notice", message = %notice.message),
            NoticeLevel::Error => error!(target: "notice", message = %notice.message),
        }
    }
}

/// Environment with a fixed description and a host-updated lifecycle state.
pub struct FixedEnvironment {
    info: EnvironmentInfo,
    lifecycle: RwLock<LifecycleState>,
}

impl FixedEnvironment {
    pub fn new(info: EnvironmentInfo) -> Self {
        Self {
            info,
            lifecycle: RwLock::new(LifecycleState::Foreground),
        }
    }

    pub fn set_lifecycle(&self, state: LifecycleState) {
        *self.lifecycle.write() = state;
    }
}

impl Default for FixedEnvironment {
    fn default() -> Self {
        Self::new(EnvironmentInfo::default())
    }
}

impl HostEnvironment for FixedEnvironment {
    fn describe(&self) -> EnvironmentInfo {
        self.info
    }

    fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.read()
    }
}

/// Desktop has no lock screen integration yet.
#[derive(Debug, Default, Clone)]
pub struct UnsupportedNowPlaying;

impl NowPlayingSurface for UnsupportedNowPlaying {
    fn is_supported(&self) -> bool {
        false
    }

    fn set_metadata(&self, _metadata: Option<NowPlayingMetadata>) {}

    fn set_playback_state(&self, _state: SurfacePlaybackState) {}

    fn set_position_state(&self, _state: Option<PositionState>) {}

    fn set_action_handler(&self, _action: TransportAction, _handler: Option<ActionHandler>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::environment::{DisplayMode, OperatingSystem};

    #[tokio::test]
    async fn test_static_credentials_can_be_replaced() {
        let creds = StaticCredentials::new(Some("a".into()));
        assert_eq!(creds.access_token().await.unwrap().as_deref(), Some("a"));
        creds.set_token(None);
        assert_eq!(creds.access_token().await.unwrap(), None);
    }

    #[test]
    fn test_fixed_environment_lifecycle() {
        let env = FixedEnvironment::new(EnvironmentInfo {
            display_mode: DisplayMode::Standalone,
            os: OperatingSystem::Ios,
            embedded_webview: false,
        });
        assert_eq!(env.describe().os, OperatingSystem::Ios);
        assert!(env.lifecycle_state().is_foreground());
        env.set_lifecycle(LifecycleState::Background);
        assert_eq!(env.lifecycle_state(), LifecycleState::Background);
    }

    #[test]
    fn test_unsupported_surface() {
        assert!(!UnsupportedNowPlaying.is_supported());
    }
}
