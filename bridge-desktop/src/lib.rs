//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `SettingsStore` as a JSON file in the platform data directory
//! - `CredentialProvider`, `Notifier`, `HostEnvironment` and
//!   `NowPlayingSurface` shims
//!
//! Audio output (`MediaHost`) has no desktop adapter here; the shell embedding
//! the engine supplies its own.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{JsonFileSettingsStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let settings = Arc::new(JsonFileSettingsStore::default_location("audiobooks")?);
//! ```

mod http;
mod settings;
mod shims;

pub use http::ReqwestHttpClient;
pub use settings::JsonFileSettingsStore;
pub use shims::{FixedEnvironment, StaticCredentials, TracingNotifier, UnsupportedNowPlaying};
