//! Playlist and book descriptors supplied by the host.

use serde::{Deserialize, Serialize};

/// One audio file of a book. Immutable; owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub id: String,
    pub file_name: String,
    pub file_type: String,
}

impl PlaylistEntry {
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
        }
    }

    /// Lowercased extension taken from the file name, falling back to the id.
    pub fn extension(&self) -> Option<String> {
        [self.file_name.as_str(), self.id.as_str()]
            .iter()
            .find_map(|name| {
                let (_, ext) = name.rsplit_once('.')?;
                if ext.is_empty() || ext.contains('/') {
                    None
                } else {
                    Some(ext.to_ascii_lowercase())
                }
            })
    }
}

/// Metadata published to the now-playing surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
}

/// Caller-supplied starting point, used when neither remote nor offline state
/// names a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeHints {
    pub file_id: Option<String>,
    pub start_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub playlist: Vec<PlaylistEntry>,
    #[serde(default)]
    pub book: BookInfo,
    #[serde(default)]
    pub hints: InitializeHints,
    /// Start playing as soon as the first file can play.
    #[serde(default)]
    pub autoplay: bool,
}

impl InitializeRequest {
    pub fn new(playlist: Vec<PlaylistEntry>) -> Self {
        Self {
            playlist,
            book: BookInfo::default(),
            hints: InitializeHints::default(),
            autoplay: false,
        }
    }

    pub fn with_book(mut self, book: BookInfo) -> Self {
        self.book = book;
        self
    }

    pub fn with_hints(mut self, hints: InitializeHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }
}
