//! # Core Configuration Module
//!
//! Wires host bridges and server coordinates into a [`CoreConfig`].
//!
//! ## Required Dependencies
//!
//! - `MediaHost` - Audio output; there is no default on any platform
//! - `HttpClient` - Audio downloads and progress sync (desktop default: reqwest)
//!
//! ## Optional Dependencies
//!
//! - `SettingsStore` - Offline progress mirror (desktop default: JSON file)
//! - `CredentialProvider` - Bearer tokens; requests go out unauthenticated without one
//! - `Notifier` - User-facing notices (desktop default: logged through `tracing`)
//! - `NowPlayingSurface` - Lock screen and media keys
//! - `HostEnvironment` - Display mode and OS class (default: desktop browser)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .base_url("https://books.example.com/api/audio")
//!     .collection("the-hobbit")
//!     .media_host(Arc::new(MyMediaHost))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing required bridges produce [`Error::CapabilityMissing`] naming the
//! capability; malformed values produce [`Error::Config`].

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, CredentialProvider, HostEnvironment, HttpClient, MediaHost, Notifier,
    NowPlayingSurface, SettingsStore, SystemClock,
};
use std::sync::Arc;

/// Application name used for default on-disk locations.
pub const APP_NAME: &str = "audiobook-player";

/// Core configuration for the playback engine.
#[derive(Clone)]
pub struct CoreConfig {
    /// Audio API root, e.g. `https://host/api/audio`. No trailing slash.
    pub base_url: String,

    /// Identifier of the book whose files make up the playlist.
    pub collection_id: String,

    pub media_host: Arc<dyn MediaHost>,

    pub http_client: Arc<dyn HttpClient>,

    pub settings_store: Option<Arc<dyn SettingsStore>>,

    pub credentials: Option<Arc<dyn CredentialProvider>>,

    pub notifier: Option<Arc<dyn Notifier>>,

    pub now_playing: Option<Arc<dyn NowPlayingSurface>>,

    pub environment: Option<Arc<dyn HostEnvironment>>,

    pub clock: Arc<dyn Clock>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("base_url", &self.base_url)
            .field("collection_id", &self.collection_id)
            .field("media_host", &"MediaHost { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field(
                "settings_store",
                &self.settings_store.as_ref().map(|_| "SettingsStore { ... }"),
            )
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "CredentialProvider { ... }"),
            )
            .field("notifier", &self.notifier.as_ref().map(|_| "Notifier { ... }"))
            .field(
                "now_playing",
                &self.now_playing.as_ref().map(|_| "NowPlayingSurface { ... }"),
            )
            .field(
                "environment",
                &self.environment.as_ref().map(|_| "HostEnvironment { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Mirror every progress write into the `SettingsStore` and use it as a
    /// fallback source on startup. Requires a settings store.
    pub enable_offline_mirror: bool,

    /// Read and write the remote progress API.
    pub enable_remote_progress: bool,

    /// Publish metadata and register transport handlers on the now-playing
    /// surface when one is provided.
    pub enable_now_playing: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_offline_mirror: true,
            enable_remote_progress: true,
            enable_now_playing: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// URL of a single audio file.
    pub fn file_url(&self, file_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(&self.collection_id),
            urlencoding::encode(file_id)
        )
    }

    /// URL of the progress endpoint for this collection.
    pub fn progress_url(&self) -> String {
        format!(
            "{}/{}/progress",
            self.base_url,
            urlencoding::encode(&self.collection_id)
        )
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config("Base URL cannot be empty".to_string()));
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Base URL must be absolute http(s), got '{}'",
                self.base_url
            )));
        }

        if self.collection_id.trim().is_empty() {
            return Err(Error::Config("Collection id cannot be empty".to_string()));
        }

        if self.features.enable_offline_mirror && self.settings_store.is_none() {
            return Err(Error::Config(
                "Offline progress mirror enabled but no SettingsStore provided. \
                 Disable the feature or inject a SettingsStore implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn media_host_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "MediaHost",
        hint: "audio output needs a MediaHost. \
               Web: wrap HTMLAudioElement and URL.createObjectURL. \
               Native shells: wrap the platform player.",
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient",
        hint: "audio downloads and progress sync need an HttpClient. \
               Desktop: enable the 'desktop-shims' feature for ReqwestHttpClient. \
               Other hosts: inject a platform HTTP adapter.",
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()?))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store() -> Option<Arc<dyn SettingsStore>> {
    match bridge_desktop::JsonFileSettingsStore::default_location(APP_NAME) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(error = %e, "No default settings location; offline mirror unavailable");
            None
        }
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store() -> Option<Arc<dyn SettingsStore>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_notifier() -> Option<Arc<dyn Notifier>> {
    Some(Arc::new(bridge_desktop::TracingNotifier))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_notifier() -> Option<Arc<dyn Notifier>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    base_url: Option<String>,
    collection_id: Option<String>,
    media_host: Option<Arc<dyn MediaHost>>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    notifier: Option<Arc<dyn Notifier>>,
    now_playing: Option<Arc<dyn NowPlayingSurface>>,
    environment: Option<Arc<dyn HostEnvironment>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the audio API root. A trailing slash is stripped.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    pub fn media_host(mut self, host: Arc<dyn MediaHost>) -> Self {
        self.media_host = Some(host);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn now_playing(mut self, surface: Arc<dyn NowPlayingSurface>) -> Self {
        self.now_playing = Some(surface);
        self
    }

    pub fn environment(mut self, environment: Arc<dyn HostEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn enable_offline_mirror(mut self, enabled: bool) -> Self {
        self.features.enable_offline_mirror = enabled;
        self
    }

    pub fn enable_remote_progress(mut self, enabled: bool) -> Self {
        self.features.enable_remote_progress = enabled;
        self
    }

    pub fn enable_now_playing(mut self, enabled: bool) -> Self {
        self.features.enable_now_playing = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - Base URL or collection missing or malformed
    /// - `MediaHost` missing, or `HttpClient` missing without `desktop-shims`
    /// - Offline mirror enabled with no `SettingsStore` available
    pub fn build(self) -> Result<CoreConfig> {
        let base_url = self.base_url.ok_or_else(|| {
            Error::Config("Base URL is required. Use .base_url() to set it.".to_string())
        })?;

        let collection_id = self.collection_id.ok_or_else(|| {
            Error::Config("Collection id is required. Use .collection() to set it.".to_string())
        })?;

        let media_host = self.media_host.ok_or_else(media_host_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => Some(store),
            None if self.features.enable_offline_mirror => provide_default_settings_store(),
            None => None,
        };

        let config = CoreConfig {
            base_url,
            collection_id,
            media_host,
            http_client,
            settings_store,
            credentials: self.credentials,
            notifier: self.notifier.or_else(provide_default_notifier),
            now_playing: self.now_playing,
            environment: self.environment,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
