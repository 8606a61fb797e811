//! # Progress Store
//!
//! Reads and writes listening positions.
//!
//! - `save` is throttled: the first call arms a timer of
//!   `progress_save_interval_ms`, later calls only replace the pending value,
//!   and the timer writes whatever is pending when it fires.
//! - `force_save` writes immediately. A pending write for the same file is
//!   dropped; one for a different file is written first so switching files
//!   never loses the previous position.
//! - Every write is mirrored into the [`SettingsStore`] when one is
//!   configured. The mirror also answers reads when the remote API is down.
//!
//! A record whose `progress` is at or above 100 is complete and resumes at 0.

use async_trait::async_trait;
use bridge_traits::storage::{get_json, set_json};
use bridge_traits::{CredentialProvider, HttpClient, HttpRequest, RetryPolicy, SettingsStore};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, ProgressEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::source::access_token;

/// Stored position for one file, as returned by the progress API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub file_id: String,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub duration: Option<f64>,
    /// Percent complete.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub is_new_file: bool,
}

impl ProgressRecord {
    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0
    }

    /// Where playback of this file should start.
    pub fn resume_position(&self) -> f64 {
        if self.is_complete() || !self.current_time.is_finite() {
            0.0
        } else {
            self.current_time.max(0.0)
        }
    }

    fn from_update(update: &ProgressUpdate) -> Self {
        let progress = if update.duration > 0.0 {
            (update.current_time / update.duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            file_id: update.file_id.clone(),
            current_time: update.current_time,
            duration: (update.duration > 0.0).then_some(update.duration),
            progress,
            is_new_file: false,
        }
    }
}

/// Body of `POST /{collection}/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub file_id: String,
    pub current_time: f64,
    pub duration: f64,
}

impl ProgressUpdate {
    pub fn new(file_id: impl Into<String>, current_time: f64, duration: f64) -> Self {
        Self {
            file_id: file_id.into(),
            current_time,
            duration,
        }
    }
}

// ============================================================================
// Remote API
// ============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressApi: Send + Sync {
    async fn fetch(&self, file_id: &str) -> Result<Option<ProgressRecord>>;

    /// The most recently played file of the collection.
    async fn fetch_latest(&self) -> Result<Option<ProgressRecord>>;

    async fn save(&self, update: ProgressUpdate) -> Result<()>;
}

pub struct HttpProgressApi {
    config: Arc<CoreConfig>,
}

impl HttpProgressApi {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        Self { config }
    }

    fn http(&self) -> &Arc<dyn HttpClient> {
        &self.config.http_client
    }

    fn credentials(&self) -> &Option<Arc<dyn CredentialProvider>> {
        &self.config.credentials
    }

    async fn get_record(&self, url: String) -> Result<Option<ProgressRecord>> {
        let mut request = HttpRequest::get(url);
        if let Some(token) = access_token(self.credentials()).await {
            request = request.bearer_token(token);
        }

        let response = self
            .http()
            .execute_with_retry(request, RetryPolicy::default())
            .await?;
        if response.status == 404 || response.body.is_empty() {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(response.json::<Option<ProgressRecord>>()?)
    }
}

#[async_trait]
impl ProgressApi for HttpProgressApi {
    async fn fetch(&self, file_id: &str) -> Result<Option<ProgressRecord>> {
        let url = format!(
            "{}?fileId={}",
            self.config.progress_url(),
            urlencoding::encode(file_id)
        );
        self.get_record(url).await
    }

    async fn fetch_latest(&self) -> Result<Option<ProgressRecord>> {
        self.get_record(self.config.progress_url()).await
    }

    async fn save(&self, update: ProgressUpdate) -> Result<()> {
        let mut request = HttpRequest::post(self.config.progress_url()).json(&update)?;
        if let Some(token) = access_token(self.credentials()).await {
            request = request.bearer_token(token);
        }

        let response = self
            .http()
            .execute_with_retry(request, RetryPolicy::none())
            .await?;
        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| PlaybackError::ProgressApi(e.to_string()))
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
struct PendingSave {
    update: Option<ProgressUpdate>,
    timer: Option<JoinHandle<()>>,
}

pub struct ProgressStore {
    api: Option<Arc<dyn ProgressApi>>,
    mirror: Option<Arc<dyn SettingsStore>>,
    collection: String,
    interval: Duration,
    event_bus: Option<Arc<EventBus>>,
    pending: Mutex<PendingSave>,
}

impl ProgressStore {
    pub fn new(
        collection: impl Into<String>,
        api: Option<Arc<dyn ProgressApi>>,
        mirror: Option<Arc<dyn SettingsStore>>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            mirror,
            collection: collection.into(),
            interval,
            event_bus: None,
            pending: Mutex::new(PendingSave::default()),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Progress(event));
        }
    }

    fn record_key(&self, file_id: &str) -> String {
        format!("progress:{}:{}", self.collection, file_id)
    }

    fn last_file_key(&self) -> String {
        format!("last_file:{}", self.collection)
    }

    /// Throttled write. Ignored until the duration is known.
    pub fn save(self: &Arc<Self>, file_id: &str, current_time: f64, duration: Option<f64>) {
        let duration = match duration {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => return,
        };
        if !current_time.is_finite() {
            return;
        }

        let mut pending = self.pending.lock();
        pending.update = Some(ProgressUpdate::new(file_id, current_time, duration));
        if pending.timer.is_some() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(store) = weak.upgrade() else {
                return;
            };
            let update = {
                let mut pending = store.pending.lock();
                pending.timer = None;
                pending.update.take()
            };
            if let Some(update) = update {
                store.write(update, false).await;
            }
        }));
    }

    /// Immediate write. An unknown duration is sent as 0.
    #[instrument(skip(self))]
    pub async fn force_save(&self, file_id: &str, current_time: f64, duration: Option<f64>) -> bool {
        let earlier = {
            let mut pending = self.pending.lock();
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.update.take().filter(|update| update.file_id != file_id)
        };

        if let Some(update) = earlier {
            self.write(update, false).await;
        }

        let duration = duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0);
        let current_time = if current_time.is_finite() {
            current_time.max(0.0)
        } else {
            0.0
        };
        self.write(ProgressUpdate::new(file_id, current_time, duration), true)
            .await
    }

    /// Writes any pending throttled value now.
    pub async fn flush(&self) {
        let update = {
            let mut pending = self.pending.lock();
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.update.take()
        };
        if let Some(update) = update {
            self.write(update, false).await;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().update.is_some()
    }

    /// Drops any pending write without sending it.
    pub fn cancel_pending(&self) {
        let mut pending = self.pending.lock();
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.update = None;
    }

    async fn write(&self, update: ProgressUpdate, forced: bool) -> bool {
        self.write_mirror(&update).await;

        let Some(api) = &self.api else {
            return self.mirror.is_some();
        };

        let file_id = update.file_id.clone();
        let position_ms = (update.current_time * 1000.0) as u64;
        match api.save(update).await {
            Ok(()) => {
                debug!(file_id = %file_id, position_ms, forced, "Progress saved");
                self.emit(ProgressEvent::Saved {
                    file_id,
                    position_ms,
                    forced,
                });
                true
            }
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Progress save failed");
                self.emit(ProgressEvent::SaveFailed {
                    file_id,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    async fn write_mirror(&self, update: &ProgressUpdate) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let record = ProgressRecord::from_update(update);
        if let Err(e) = set_json(mirror.as_ref(), &self.record_key(&update.file_id), &record).await {
            warn!(error = %e, "Offline progress mirror write failed");
            return;
        }
        if let Err(e) = mirror
            .set_string(&self.last_file_key(), &update.file_id)
            .await
        {
            warn!(error = %e, "Offline last-file write failed");
        }
    }

    /// Stored record for `file_id`, remote first, then the offline mirror.
    pub async fn record(&self, file_id: &str) -> Option<ProgressRecord> {
        if let Some(api) = &self.api {
            match api.fetch(file_id).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(e) => warn!(file_id, error = %e, "Remote progress unavailable"),
            }
        }
        self.mirror_record(file_id).await
    }

    /// Start position for `file_id`: 0 for unknown or completed files.
    pub async fn resume_position(&self, file_id: &str) -> f64 {
        self.record(file_id)
            .await
            .map(|record| record.resume_position())
            .unwrap_or(0.0)
    }

    /// Last-played record according to the remote API.
    pub async fn remote_latest(&self) -> Option<ProgressRecord> {
        let api = self.api.as_ref()?;
        match api.fetch_latest().await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Remote latest progress unavailable");
                None
            }
        }
    }

    /// Last-played record according to the offline mirror.
    pub async fn offline_latest(&self) -> Option<ProgressRecord> {
        let mirror = self.mirror.as_ref()?;
        let file_id = match mirror.get_string(&self.last_file_key()).await {
            Ok(Some(file_id)) => file_id,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Offline mirror unreadable");
                return None;
            }
        };
        Some(
            self.mirror_record(&file_id)
                .await
                .unwrap_or(ProgressRecord {
                    file_id,
                    current_time: 0.0,
                    duration: None,
                    progress: 0.0,
                    is_new_file: false,
                }),
        )
    }

    async fn mirror_record(&self, file_id: &str) -> Option<ProgressRecord> {
        let mirror = self.mirror.as_ref()?;
        match get_json::<ProgressRecord>(mirror.as_ref(), &self.record_key(file_id)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(file_id, error = %e, "Offline progress record unreadable");
                None
            }
        }
    }
}

impl Drop for ProgressStore {
    fn drop(&mut self) {
        if let Some(timer) = self.pending.get_mut().timer.take() {
            timer.abort();
        }
    }
}
