//! Settings Storage backed by a JSON file

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const FILE_NAME: &str = "settings.json";

/// Key-value settings persisted as a flat JSON object.
///
/// The whole map is loaded on first access and rewritten on every mutation
/// through a temporary file plus rename, so a crash mid-write leaves the
/// previous contents intact. A corrupt file is treated as empty.
pub struct JsonFileSettingsStore {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    /// `settings.json` under the platform data directory for `app_name`.
    pub fn default_location(app_name: &str) -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            BridgeError::NotAvailable("platform data directory".to_string())
        })?;
        Ok(Self::new(base.join(app_name).join(FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => Ok(map),
                Err(e) => {
                    warn!(path = ?path, error = %e, "Discarding unreadable settings file");
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn persist(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = ?self.path, keys = map.len(), "Persisted settings");
        Ok(())
    }

    async fn with_entries<R>(
        &self,
        mutate: bool,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> R,
    ) -> Result<R> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        let map = guard.get_or_insert_with(BTreeMap::new);
        let result = f(map);
        if mutate {
            self.persist(map).await?;
        }
        Ok(result)
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(true, |map| {
            map.insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(false, |map| map.get(key).cloned()).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_entries(true, |map| {
            map.remove(key);
        })
        .await
    }
}
