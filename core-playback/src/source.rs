//! # Audio Source Resolution
//!
//! Turns a playlist entry into something a media element can play, in order of
//! preference:
//!
//! 1. an unexpired [`PreloadCache`] entry, whose object URL moves to the session
//! 2. an authenticated download read fully into memory and exposed as an
//!    object URL
//! 3. the plain file URL with the access token as a `token` query parameter,
//!    for hosts that cannot attach headers to streaming elements
//!
//! The third path puts a credential in a URL. It is only taken after the
//! download failed, and the URL is redacted before it reaches any log.

use async_trait::async_trait;
use bridge_traits::{CredentialProvider, HttpClient, HttpRequest, MediaHost, RetryPolicy};
use bytes::Bytes;
use core_runtime::config::CoreConfig;
use core_runtime::logging::redact_url;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::preload::PreloadCache;
use crate::types::PlaylistEntry;

const GENERIC_CONTENT_TYPES: [&str; 3] = [
    "application/octet-stream",
    "binary/octet-stream",
    "application/binary",
];

/// Downloaded audio bytes.
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub data: Bytes,
    pub mime_type: String,
}

#[async_trait]
pub trait AudioFetch: Send + Sync {
    async fn fetch(&self, entry: &PlaylistEntry) -> Result<FetchedAudio>;
}

/// MIME type for an audio file extension. Unknown extensions play as MP3,
/// which is what the server stores most often.
pub fn mime_from_extension(extension: Option<&str>) -> &'static str {
    match extension {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("m4b") | Some("mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        _ => "audio/mpeg",
    }
}

/// Picks the server's content type unless it is missing or generic.
pub fn resolve_mime_type(content_type: Option<&str>, entry: &PlaylistEntry) -> String {
    match content_type {
        Some(ct) if !ct.is_empty() && !GENERIC_CONTENT_TYPES.contains(&ct) => ct.to_string(),
        _ => mime_from_extension(entry.extension().as_deref()).to_string(),
    }
}

pub(crate) async fn access_token(
    credentials: &Option<Arc<dyn CredentialProvider>>,
) -> Option<String> {
    let provider = credentials.as_ref()?;
    match provider.access_token().await {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(error = %e, "Credential provider failed; continuing unauthenticated");
            None
        }
    }
}

// ============================================================================
// HTTP Fetcher
// ============================================================================

/// Downloads audio files from `GET {base}/{collection}/{fileId}`.
pub struct HttpAudioFetcher {
    config: Arc<CoreConfig>,
    retry: RetryPolicy,
}

impl HttpAudioFetcher {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        Self {
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn http(&self) -> &Arc<dyn HttpClient> {
        &self.config.http_client
    }
}

#[async_trait]
impl AudioFetch for HttpAudioFetcher {
    #[instrument(skip(self, entry), fields(file_id = %entry.id))]
    async fn fetch(&self, entry: &PlaylistEntry) -> Result<FetchedAudio> {
        let mut request = HttpRequest::get(self.config.file_url(&entry.id));
        if let Some(token) = access_token(&self.config.credentials).await {
            request = request.bearer_token(token);
        }

        let response = self
            .http()
            .execute_with_retry(request, self.retry.clone())
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PlaybackError::SourceUnavailable(format!("{}: {}", entry.id, e)))?;

        let mime_type = resolve_mime_type(response.content_type().as_deref(), entry);
        debug!(bytes = response.body.len(), mime_type = %mime_type, "Audio downloaded");

        Ok(FetchedAudio {
            data: response.body,
            mime_type,
        })
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Cached,
    Fetched,
    TokenFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub url: String,
    pub kind: SourceKind,
}

impl ResolvedSource {
    /// Object URLs must be revoked by whoever ends up holding them.
    pub fn owns_object_url(&self) -> bool {
        matches!(self.kind, SourceKind::Cached | SourceKind::Fetched)
    }
}

pub struct SourceResolver {
    config: Arc<CoreConfig>,
    fetcher: Arc<dyn AudioFetch>,
    cache: Option<Arc<PreloadCache>>,
}

impl SourceResolver {
    pub fn new(
        config: Arc<CoreConfig>,
        fetcher: Arc<dyn AudioFetch>,
        cache: Option<Arc<PreloadCache>>,
    ) -> Self {
        Self {
            config,
            fetcher,
            cache,
        }
    }

    fn host(&self) -> &Arc<dyn MediaHost> {
        &self.config.media_host
    }

    #[instrument(skip(self, entry), fields(file_id = %entry.id))]
    pub async fn resolve(&self, entry: &PlaylistEntry) -> ResolvedSource {
        if let Some(cache) = &self.cache {
            cache.set_current(Some(&entry.id));
        }
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.take(&entry.id)) {
            debug!("Using preloaded audio");
            return ResolvedSource {
                url: cached.blob_url,
                kind: SourceKind::Cached,
            };
        }

        match self.fetcher.fetch(entry).await {
            Ok(audio) => match self.host().create_object_url(audio.data, &audio.mime_type) {
                Ok(url) => {
                    return ResolvedSource {
                        url,
                        kind: SourceKind::Fetched,
                    }
                }
                Err(e) => warn!(error = %e, "Could not create object URL"),
            },
            Err(e) => warn!(error = %e, "Authenticated fetch failed"),
        }

        let url = self.fallback_url(&entry.id).await;
        warn!(url = %redact_url(&url), "Falling back to direct streaming URL");
        ResolvedSource {
            url,
            kind: SourceKind::TokenFallback,
        }
    }

    async fn fallback_url(&self, file_id: &str) -> String {
        let base = self.config.file_url(file_id);
        match access_token(&self.config.credentials).await {
            Some(token) => format!("{}?token={}", base, urlencoding::encode(&token)),
            None => base,
        }
    }
}
