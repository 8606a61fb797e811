//! Wire behaviour of the HTTP-backed audio fetcher and progress API.

mod support;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{CredentialProvider, HttpMethod, HttpResponse, RetryPolicy};
use core_playback::progress::{HttpProgressApi, ProgressApi, ProgressUpdate};
use core_playback::source::{AudioFetch, HttpAudioFetcher, SourceKind, SourceResolver};
use core_playback::PlaybackError;
use core_runtime::config::CoreConfig;
use std::sync::Arc;
use support::*;

struct StaticToken(&'static str);

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> BridgeResult<Option<String>> {
        Ok(Some(self.0.to_string()))
    }
}

fn config(http: Arc<ScriptedHttpClient>, token: Option<&'static str>) -> Arc<CoreConfig> {
    let mut builder = CoreConfig::builder()
        .base_url("https://books.example.com/api/audio")
        .collection("book 1")
        .media_host(Arc::new(MockMediaHost::default()))
        .http_client(http)
        .enable_offline_mirror(false);
    if let Some(token) = token {
        builder = builder.credentials(Arc::new(StaticToken(token)));
    }
    Arc::new(builder.build().unwrap())
}

#[tokio::test]
async fn test_fetcher_downloads_with_bearer_token() {
    let http = Arc::new(ScriptedHttpClient::default());
    http.push(Ok(HttpResponse::new(200, &b"OggS"[..])
        .with_header("Content-Type", "application/octet-stream")));
    let fetcher = HttpAudioFetcher::new(config(http.clone(), Some("tok")));

    let audio = fetcher
        .fetch(&core_playback::PlaylistEntry::new("ch 1", "Chapter 1.ogg", "ogg"))
        .await
        .unwrap();

    assert_eq!(&audio.data[..], b"OggS");
    assert_eq!(audio.mime_type, "audio/ogg");

    let requests = http.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(
        requests[0].url,
        "https://books.example.com/api/audio/book%201/ch%201"
    );
    assert_eq!(
        requests[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer tok")
    );
}

#[tokio::test]
async fn test_fetcher_maps_http_errors_to_unavailable_source() {
    let http = Arc::new(ScriptedHttpClient::default());
    http.push(Ok(HttpResponse::new(503, "busy")));
    let fetcher =
        HttpAudioFetcher::new(config(http, None)).with_retry_policy(RetryPolicy::none());

    let result = fetcher.fetch(&playlist(&["a"])[0]).await;
    assert!(matches!(result, Err(PlaybackError::SourceUnavailable(_))));
}

#[tokio::test]
async fn test_progress_fetch_and_missing_record() {
    let http = Arc::new(ScriptedHttpClient::default());
    http.push(Ok(HttpResponse::new(
        200,
        r#"{"file_id":"a","current_time":42.5,"duration":600.0,"progress":7.1,"is_new_file":false}"#,
    )));
    http.push(Ok(HttpResponse::new(404, "")));
    let api = HttpProgressApi::new(config(http.clone(), None));

    let record = api.fetch("a").await.unwrap().unwrap();
    assert_eq!(record.current_time, 42.5);
    assert_eq!(record.duration, Some(600.0));
    assert!(!record.is_complete());

    assert!(api.fetch("b").await.unwrap().is_none());

    let requests = http.requests.lock();
    assert_eq!(
        requests[0].url,
        "https://books.example.com/api/audio/book%201/progress?fileId=a"
    );
}

#[tokio::test]
async fn test_progress_save_posts_camel_case_body() {
    let http = Arc::new(ScriptedHttpClient::default());
    http.push(Ok(HttpResponse::new(204, "")));
    http.push(Ok(HttpResponse::new(500, "boom")));
    let api = HttpProgressApi::new(config(http.clone(), Some("tok")));

    api.save(ProgressUpdate::new("a", 42.0, 600.0)).await.unwrap();
    let failed = api.save(ProgressUpdate::new("a", 43.0, 600.0)).await;
    assert!(matches!(failed, Err(PlaybackError::ProgressApi(_))));

    let requests = http.requests.lock();
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert_eq!(
        requests[0].url,
        "https://books.example.com/api/audio/book%201/progress"
    );
    let body: serde_json::Value =
        serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"fileId": "a", "currentTime": 42.0, "duration": 600.0})
    );
}

#[tokio::test]
async fn test_resolver_falls_back_to_token_url() {
    let http = Arc::new(ScriptedHttpClient::default());
    let config = config(http, Some("a b"));
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.broken.lock().push("a".to_string());
    let fetcher: Arc<dyn AudioFetch> = fetcher;

    let resolver = SourceResolver::new(config, fetcher, None);
    let source = resolver.resolve(&playlist(&["a"])[0]).await;

    assert_eq!(source.kind, SourceKind::TokenFallback);
    assert!(!source.owns_object_url());
    assert_eq!(
        source.url,
        "https://books.example.com/api/audio/book%201/a?token=a%20b"
    );
}
