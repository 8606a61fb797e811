//! Settings and Credential Abstractions
//!
//! The engine keeps an offline mirror of listening progress in a key-value
//! [`SettingsStore`] and obtains bearer tokens from a [`CredentialProvider`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::platform::PlatformSendSync;

/// Key-value settings storage trait
///
/// Backed by localStorage on web, UserDefaults / SharedPreferences on mobile
/// and a JSON file on desktop.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember(store: &dyn SettingsStore) -> Result<()> {
///     store.set_string("last_file:book-1", "chapter-03.mp3").await?;
///     Ok(())
/// }
/// ```
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait SettingsStore: PlatformSendSync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}

/// Store a serializable value as JSON under `key`.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn SettingsStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    store.set_string(key, &encoded).await
}

/// Read a JSON value stored under `key`. Malformed entries are reported as
/// serialization errors.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get_string(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Supplies the bearer token used for audio and progress requests.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait CredentialProvider: PlatformSendSync {
    /// Current access token, `None` when the user is signed out.
    async fn access_token(&self) -> Result<Option<String>>;
}
