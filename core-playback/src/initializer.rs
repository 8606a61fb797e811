//! # Session Initializer
//!
//! Picks the file and offset a fresh session starts from. Sources are tried
//! in order and the first one naming a file in the playlist wins:
//!
//! 1. the remote "last played" record,
//! 2. the offline mirror's last file,
//! 3. the caller's file hint,
//! 4. the first playlist entry.
//!
//! A caller-supplied start time above zero overrides the stored position
//! when it refers to the chosen file. Completed files start at 0.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{PlaybackError, Result};
use crate::progress::ProgressStore;
use crate::types::{InitializeHints, PlaylistEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartSource {
    Remote,
    OfflineMirror,
    CallerHint,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialPosition {
    pub index: usize,
    pub file_id: String,
    pub start_time: f64,
    pub source: StartSource,
}

pub struct SessionInitializer<'a> {
    progress: &'a ProgressStore,
}

impl<'a> SessionInitializer<'a> {
    pub fn new(progress: &'a ProgressStore) -> Self {
        Self { progress }
    }

    #[instrument(skip_all, fields(entries = playlist.len()))]
    pub async fn resolve(
        &self,
        playlist: &[PlaylistEntry],
        hints: &InitializeHints,
    ) -> Result<InitialPosition> {
        if playlist.is_empty() {
            return Err(PlaybackError::EmptyPlaylist);
        }
        let index_of = |file_id: &str| playlist.iter().position(|e| e.id == file_id);
        let hinted_start = hints
            .start_time
            .filter(|t| t.is_finite() && *t > 0.0);

        let stored = [
            (StartSource::Remote, self.progress.remote_latest().await),
            (StartSource::OfflineMirror, self.progress.offline_latest().await),
        ];
        for (source, record) in stored {
            let Some(record) = record else {
                continue;
            };
            let Some(index) = index_of(&record.file_id) else {
                debug!(file_id = %record.file_id, ?source, "Stored file is not in this playlist");
                continue;
            };
            let start_time = match hinted_start {
                Some(t) if hints.file_id.as_deref() == Some(record.file_id.as_str()) => t,
                _ => record.resume_position(),
            };
            return Ok(self.chosen(index, record.file_id, start_time, source));
        }

        if let Some(index) = hints.file_id.as_deref().and_then(index_of) {
            let file_id = playlist[index].id.clone();
            let start_time = match hinted_start {
                Some(t) => t,
                None => self.progress.resume_position(&file_id).await,
            };
            return Ok(self.chosen(index, file_id, start_time, StartSource::CallerHint));
        }

        let file_id = playlist[0].id.clone();
        let start_time = match hinted_start {
            Some(t) => t,
            None => self.progress.resume_position(&file_id).await,
        };
        Ok(self.chosen(0, file_id, start_time, StartSource::Default))
    }

    fn chosen(
        &self,
        index: usize,
        file_id: String,
        start_time: f64,
        source: StartSource,
    ) -> InitialPosition {
        info!(file_id = %file_id, index, start_time, ?source, "Initial position resolved");
        InitialPosition {
            index,
            file_id,
            start_time,
            source,
        }
    }
}
