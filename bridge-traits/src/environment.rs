//! Host Environment Detection
//!
//! Playback policies differ sharply between a regular browser tab, an
//! installed standalone app and an app embedded in a native webview shell.
//! Hosts describe themselves once through [`HostEnvironment`]; the engine
//! resolves its platform profile from that description at startup.

use serde::{Deserialize, Serialize};

use crate::platform::PlatformSendSync;

/// How the host presents the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Regular browser tab or desktop window.
    Browser,
    /// Installed to the home screen and launched without browser chrome.
    Standalone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingSystem {
    Ios,
    Android,
    Desktop,
    Other,
}

/// Static description of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub display_mode: DisplayMode,
    pub os: OperatingSystem,
    /// Running inside a native app's embedded webview.
    pub embedded_webview: bool,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Browser,
            os: OperatingSystem::Desktop,
            embedded_webview: false,
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Visible and active
    Foreground,
    /// Hidden; timers may be throttled by the host
    Background,
    /// About to be frozen or terminated
    Suspended,
}

impl LifecycleState {
    pub fn is_foreground(self) -> bool {
        matches!(self, LifecycleState::Foreground)
    }
}

/// Describes the host the engine runs in.
pub trait HostEnvironment: PlatformSendSync {
    fn describe(&self) -> EnvironmentInfo;

    fn lifecycle_state(&self) -> LifecycleState {
        LifecycleState::Foreground
    }
}
