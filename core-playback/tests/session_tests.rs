//! Handle ownership across loads and across sessions sharing a registry.

mod support;

use bridge_traits::{MediaEvent, ReadyState};
use core_playback::progress::ProgressStore;
use core_playback::session::EventSink;
use core_playback::source::{AudioFetch, SourceResolver};
use core_playback::{AudioSession, HandleKey, HandleRegistry, LoadOptions, PlaybackError};
use core_runtime::config::CoreConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use support::*;

type Seen = Arc<Mutex<Vec<(u64, MediaEvent)>>>;

fn session(host: &Arc<MockMediaHost>, registry: &Arc<HandleRegistry>) -> (AudioSession, Seen) {
    let config = CoreConfig::builder()
        .base_url("https://books.example.com/api/audio")
        .collection("book-1")
        .media_host(host.clone())
        .http_client(Arc::new(ScriptedHttpClient::default()))
        .enable_offline_mirror(false)
        .build()
        .unwrap();
    let fetcher: Arc<dyn AudioFetch> = Arc::new(FakeFetcher::default());
    let resolver = Arc::new(SourceResolver::new(Arc::new(config), fetcher, None));
    let progress = Arc::new(ProgressStore::new(
        "book-1",
        None,
        None,
        Duration::from_secs(15),
    ));

    let seen: Seen = Arc::default();
    let sink_seen = Arc::clone(&seen);
    let sink: EventSink = Arc::new(move |generation, event| {
        sink_seen.lock().push((generation, event));
    });

    let session = AudioSession::new(
        "book-1",
        host.clone(),
        Arc::clone(registry),
        resolver,
        progress,
        sink,
    );
    (session, seen)
}

fn entry(id: &str) -> core_playback::PlaylistEntry {
    playlist(&[id]).remove(0)
}

#[tokio::test]
async fn test_only_one_handle_is_live_across_loads() {
    let host = Arc::new(MockMediaHost::default());
    let registry = Arc::new(HandleRegistry::new());
    let (session, _) = session(&host, &registry);

    for id in ["a", "b", "c", "a"] {
        session.load(&entry(id), LoadOptions::default()).await.unwrap();
        assert_eq!(host.live_count(), 1);
    }

    assert_eq!(host.elements().len(), 4);
    assert_eq!(host.revoked_urls().len(), 3);
    assert_eq!(session.current_file_id().as_deref(), Some("a"));
    assert_eq!(
        registry.current_key(),
        Some(HandleKey::new("book-1", "a"))
    );
}

#[tokio::test]
async fn test_same_file_reuses_handle() {
    let host = Arc::new(MockMediaHost::default());
    let registry = Arc::new(HandleRegistry::new());
    let (session, _) = session(&host, &registry);

    let first = session.load(&entry("a"), LoadOptions::at(12.0)).await.unwrap();
    assert!(!first.reused);
    assert_eq!(first.start_time, 12.0);

    let second = session.load(&entry("a"), LoadOptions::default()).await.unwrap();
    assert!(second.reused);
    assert_eq!(second.generation, first.generation);
    assert_eq!(host.elements().len(), 1);
    assert!(host.revoked_urls().is_empty());

    let reload = session
        .load(&entry("a"), LoadOptions::reload_at(12.0))
        .await
        .unwrap();
    assert!(!reload.reused);
    assert_eq!(host.elements().len(), 2);
    assert_eq!(host.live_count(), 1);
}

#[tokio::test]
async fn test_detached_handle_is_adopted_by_new_session() {
    let host = Arc::new(MockMediaHost::default());
    let registry = Arc::new(HandleRegistry::new());
    let key = HandleKey::new("book-1", "a");

    let (first, first_seen) = session(&host, &registry);
    first.load(&entry("a"), LoadOptions::default()).await.unwrap();
    first.play().await.unwrap();
    first.detach();
    assert_eq!(registry.current_owner(&key), None);

    let (second, second_seen) = session(&host, &registry);
    let outcome = second.load(&entry("a"), LoadOptions::default()).await.unwrap();

    assert!(outcome.reused);
    assert_eq!(host.elements().len(), 1);
    assert!(host.latest().is_live());
    assert!(second.is_playing());
    assert!(registry.is_owned_by(&key, second.id()));

    let before = first_seen.lock().len();
    host.latest().emit(MediaEvent::TimeUpdate);
    assert_eq!(first_seen.lock().len(), before);
    assert!(matches!(
        second_seen.lock().last(),
        Some((generation, MediaEvent::TimeUpdate)) if *generation == second.generation()
    ));

    // The old session no longer owns anything and must not stop playback.
    first.dispose();
    assert!(host.latest().is_live());
    assert!(host.revoked_urls().is_empty());
}

#[tokio::test]
async fn test_displaced_handle_is_torn_down_once() {
    let host = Arc::new(MockMediaHost::default());
    let registry = Arc::new(HandleRegistry::new());

    let (first, _) = session(&host, &registry);
    let (second, _) = session(&host, &registry);
    first.load(&entry("a"), LoadOptions::default()).await.unwrap();
    second.load(&entry("b"), LoadOptions::default()).await.unwrap();

    let elements = host.elements();
    assert!(!elements[0].is_live());
    assert!(elements[1].is_live());
    assert_eq!(host.revoked_urls().len(), 1);

    first.dispose();
    assert!(elements[1].is_live());
    assert_eq!(host.revoked_urls().len(), 1);
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let host = Arc::new(MockMediaHost::default());
    let registry = Arc::new(HandleRegistry::new());
    let (session, _) = session(&host, &registry);

    session.load(&entry("a"), LoadOptions::default()).await.unwrap();
    session.dispose();
    session.dispose();

    assert!(session.is_disposed());
    assert_eq!(host.live_count(), 0);
    assert_eq!(host.created_urls(), host.revoked_urls());
    assert_eq!(host.latest().listener_count(), 0);
    assert!(registry.current_key().is_none());

    let result = session.load(&entry("b"), LoadOptions::default()).await;
    assert!(matches!(result, Err(PlaybackError::Disposed)));
}

#[tokio::test]
async fn test_stale_generation_events_are_rejected() {
    let host = Arc::new(MockMediaHost::default());
    let registry = Arc::new(HandleRegistry::new());
    let (session, _) = session(&host, &registry);

    let a = session.load(&entry("a"), LoadOptions::default()).await.unwrap();
    let b = session.load(&entry("b"), LoadOptions::default()).await.unwrap();

    assert!(!session.handle_event(a.generation, &MediaEvent::Playing));
    assert!(!session.is_playing());
    assert!(session.handle_event(b.generation, &MediaEvent::Playing));
    assert!(session.is_playing());
}

#[tokio::test]
async fn test_seek_waits_for_metadata() {
    let host = Arc::new(MockMediaHost::default());
    host.set_initial_ready(ReadyState::HaveNothing);
    let registry = Arc::new(HandleRegistry::new());
    let (session, _) = session(&host, &registry);

    let outcome = session.load(&entry("a"), LoadOptions::at(30.0)).await.unwrap();
    assert!(session.is_loading());
    session.seek(50.0);
    assert_eq!(host.latest().time(), 0.0);

    host.latest().set_ready(ReadyState::HaveMetadata);
    session.handle_event(outcome.generation, &MediaEvent::LoadedMetadata);
    assert_eq!(host.latest().time(), 50.0);

    session.handle_event(outcome.generation, &MediaEvent::CanPlay);
    assert!(!session.is_loading());
}
