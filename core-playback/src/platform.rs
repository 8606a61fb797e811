//! # Platform Profile
//!
//! Autoplay, background execution and completion reporting behave differently
//! in a browser tab, an installed app on a locked-down mobile OS and an app
//! embedded in a native webview. The profile is resolved once per engine from
//! the host's [`EnvironmentInfo`] and every component reads its knobs from
//! here instead of inspecting the environment itself.

use bridge_traits::{DisplayMode, EnvironmentInfo, OperatingSystem, PlayRejection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{CompletionTuning, PlaybackConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformClass {
    /// Desktop or mobile browser tab.
    Browser,
    /// Installed standalone app on a locked-down mobile OS.
    InstalledLockedDown,
    /// Installed standalone app elsewhere. Autoplay behaves like a browser but
    /// `ended` is unreliable.
    InstalledStandalone,
    /// Page hosted inside a native app's webview.
    EmbeddedWebView,
}

impl PlatformClass {
    pub fn detect(info: &EnvironmentInfo) -> Self {
        if info.embedded_webview {
            return PlatformClass::EmbeddedWebView;
        }
        match (info.display_mode, info.os) {
            (DisplayMode::Standalone, OperatingSystem::Ios) => PlatformClass::InstalledLockedDown,
            (DisplayMode::Standalone, _) => PlatformClass::InstalledStandalone,
            (DisplayMode::Browser, _) => PlatformClass::Browser,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformClass::Browser => "browser",
            PlatformClass::InstalledLockedDown => "installed_locked_down",
            PlatformClass::InstalledStandalone => "installed_standalone",
            PlatformClass::EmbeddedWebView => "embedded_webview",
        }
    }
}

impl fmt::Display for PlatformClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the autoplay controller does with a refused `play()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Try again after the retry delay.
    Retry,
    /// Stop and wait for a user gesture.
    Block,
    /// Give up on this load.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformProfile {
    pub class: PlatformClass,
    pub max_autoplay_retries: u32,
    pub retry_delay: Duration,
    pub background_poll_interval: Duration,
    pub near_end_threshold_secs: f64,
    pub confirm_delay: Duration,
    /// Poll for completion even in the foreground.
    pub poll_always: bool,
    /// Insert a pause/resume cycle when resuming a chained advance.
    pub stagger_chained: bool,
    pub stagger_delay: Duration,
    /// Keep the chained flag when the host demands a user gesture, so the
    /// lock screen play button resumes the advance.
    pub preserve_chained_on_block: bool,
    /// Keep the chained flag when retries run out.
    pub preserve_chained_on_exhaust: bool,
    /// An exhausted controller may be re-armed once the app is foregrounded.
    pub allow_rearm: bool,
}

impl PlatformProfile {
    pub fn resolve(info: &EnvironmentInfo, config: &PlaybackConfig) -> Self {
        Self::for_class(PlatformClass::detect(info), config)
    }

    pub fn for_class(class: PlatformClass, config: &PlaybackConfig) -> Self {
        let tuning: CompletionTuning = match class {
            PlatformClass::Browser => config.completion.browser,
            PlatformClass::InstalledLockedDown | PlatformClass::InstalledStandalone => {
                config.completion.standalone
            }
            PlatformClass::EmbeddedWebView => config.completion.embedded,
        };

        Self {
            class,
            max_autoplay_retries: config.max_autoplay_retries,
            retry_delay: config.retry_delay(),
            background_poll_interval: tuning.poll_interval(),
            near_end_threshold_secs: tuning.near_end_threshold_secs,
            confirm_delay: tuning.confirm_delay(),
            poll_always: class != PlatformClass::Browser,
            stagger_chained: class == PlatformClass::InstalledLockedDown,
            stagger_delay: config.stagger_delay(),
            preserve_chained_on_block: class == PlatformClass::InstalledLockedDown,
            preserve_chained_on_exhaust: class == PlatformClass::EmbeddedWebView,
            allow_rearm: class == PlatformClass::EmbeddedWebView,
        }
    }

    /// Classifies a refused `play()` for this platform.
    pub fn on_rejection(&self, rejection: &PlayRejection) -> RejectionPolicy {
        match self.class {
            PlatformClass::InstalledLockedDown => match rejection {
                PlayRejection::NotAllowed => RejectionPolicy::Block,
                PlayRejection::NotSupported => RejectionPolicy::Fail,
                _ => RejectionPolicy::Retry,
            },
            // Webviews report spurious failures for almost everything.
            PlatformClass::EmbeddedWebView => match rejection {
                PlayRejection::NotSupported => RejectionPolicy::Fail,
                _ => RejectionPolicy::Retry,
            },
            PlatformClass::Browser | PlatformClass::InstalledStandalone => match rejection {
                PlayRejection::NotAllowed => RejectionPolicy::Block,
                PlayRejection::Aborted | PlayRejection::Network => RejectionPolicy::Retry,
                PlayRejection::NotSupported | PlayRejection::Other(_) => RejectionPolicy::Fail,
            },
        }
    }

    /// A blocked attempt needs a user gesture before playback can start.
    pub fn requires_user_gesture_on_block(&self) -> bool {
        self.class != PlatformClass::EmbeddedWebView
    }

    /// Whether the completion poller should run in the given lifecycle state.
    pub fn should_poll(&self, foreground: bool) -> bool {
        self.poll_always || !foreground
    }
}
