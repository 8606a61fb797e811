//! # Handle Registry
//!
//! Arbitrates ownership of the one reusable media handle per process. Two
//! sessions for the same `(collection, file)` must not both drive a decoder, so
//! the registry holds a single slot and hands it from session to session.
//!
//! Only [`AudioSession`](crate::session::AudioSession) writes to it. The
//! process-wide instance is [`HandleRegistry::global`]; tests build their own.

use bridge_traits::MediaElement;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleKey {
    pub collection: String,
    pub file_id: String,
}

impl HandleKey {
    pub fn new(collection: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            file_id: file_id.into(),
        }
    }
}

/// Identity of one session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
pub struct RegisteredHandle {
    pub key: HandleKey,
    /// `None` while the handle is detached and waiting to be adopted.
    pub owner: Option<SessionId>,
    pub element: Arc<dyn MediaElement>,
    /// Object URL the handle plays from, revoked by whoever tears it down.
    pub blob_url: Option<String>,
}

impl fmt::Debug for RegisteredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandle")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("blob_url", &self.blob_url)
            .finish()
    }
}

#[derive(Default)]
pub struct HandleRegistry {
    slot: Mutex<Option<RegisteredHandle>>,
}

static GLOBAL: Lazy<Arc<HandleRegistry>> = Lazy::new(|| Arc::new(HandleRegistry::new()));

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<HandleRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Claims the live handle for `key` if the slot holds one. Ownership moves
    /// to `owner` even if another session held it.
    pub fn try_acquire(&self, key: &HandleKey, owner: SessionId) -> Option<RegisteredHandle> {
        let mut slot = self.slot.lock();
        let entry = slot.as_mut().filter(|entry| &entry.key == key)?;
        entry.owner = Some(owner);
        Some(entry.clone())
    }

    /// Puts a freshly created handle in the slot, returning whatever it
    /// displaced.
    pub fn install(&self, handle: RegisteredHandle) -> Option<RegisteredHandle> {
        self.slot.lock().replace(handle)
    }

    /// Drops `owner`'s claim but leaves the handle in the slot for adoption.
    pub fn release(&self, key: &HandleKey, owner: SessionId) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(entry) if &entry.key == key && entry.owner == Some(owner) => {
                entry.owner = None;
                true
            }
            _ => false,
        }
    }

    /// Empties the slot if `owner` holds `key`.
    pub fn remove(&self, key: &HandleKey, owner: SessionId) -> Option<RegisteredHandle> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(entry) if &entry.key == key && entry.owner == Some(owner) => slot.take(),
            _ => None,
        }
    }

    pub fn current_owner(&self, key: &HandleKey) -> Option<SessionId> {
        self.slot
            .lock()
            .as_ref()
            .filter(|entry| &entry.key == key)
            .and_then(|entry| entry.owner)
    }

    pub fn is_owned_by(&self, key: &HandleKey, owner: SessionId) -> bool {
        self.current_owner(key) == Some(owner)
    }

    pub fn current_key(&self) -> Option<HandleKey> {
        self.slot.lock().as_ref().map(|entry| entry.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        ListenerId, MediaErrorCode, MediaListener, PlayRejection, ReadyState,
    };

    struct InertElement;

    #[async_trait]
    impl MediaElement for InertElement {
        fn set_source(&self, _url: &str) {}
        fn clear_source(&self) {}
        fn source(&self) -> Option<String> {
            None
        }
        fn load(&self) {}
        async fn play(&self) -> std::result::Result<(), PlayRejection> {
            Ok(())
        }
        fn pause(&self) {}
        fn is_paused(&self) -> bool {
            true
        }
        fn current_time(&self) -> f64 {
            0.0
        }
        fn set_current_time(&self, _seconds: f64) {}
        fn duration(&self) -> Option<f64> {
            None
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::HaveNothing
        }
        fn set_volume(&self, _volume: f64) {}
        fn set_playback_rate(&self, _rate: f64) {}
        fn error(&self) -> Option<MediaErrorCode> {
            None
        }
        fn add_listener(&self, _listener: MediaListener) -> ListenerId {
            ListenerId(0)
        }
        fn remove_listener(&self, _id: ListenerId) {}
    }

    fn handle(file: &str, owner: SessionId) -> RegisteredHandle {
        RegisteredHandle {
            key: HandleKey::new("book", file),
            owner: Some(owner),
            element: Arc::new(InertElement),
            blob_url: Some(format!("blob:{}", file)),
        }
    }

    #[test]
    fn test_acquire_matches_key_only() {
        let registry = HandleRegistry::new();
        let first = SessionId::new();
        let second = SessionId::new();

        assert!(registry.install(handle("a", first)).is_none());
        assert!(registry
            .try_acquire(&HandleKey::new("book", "b"), second)
            .is_none());
        assert!(registry
            .try_acquire(&HandleKey::new("other", "a"), second)
            .is_none());

        let adopted = registry
            .try_acquire(&HandleKey::new("book", "a"), second)
            .unwrap();
        assert_eq!(adopted.owner, Some(second));
        assert_eq!(
            registry.current_owner(&HandleKey::new("book", "a")),
            Some(second)
        );
    }

    #[test]
    fn test_install_returns_displaced_handle() {
        let registry = HandleRegistry::new();
        let owner = SessionId::new();
        registry.install(handle("a", owner));
        let displaced = registry.install(handle("b", owner)).unwrap();
        assert_eq!(displaced.key.file_id, "a");
        assert_eq!(registry.current_key().unwrap().file_id, "b");
    }

    #[test]
    fn test_release_keeps_handle_for_adoption() {
        let registry = HandleRegistry::new();
        let owner = SessionId::new();
        let key = HandleKey::new("book", "a");
        registry.install(handle("a", owner));

        assert!(!registry.release(&key, SessionId::new()));
        assert!(registry.release(&key, owner));
        assert_eq!(registry.current_owner(&key), None);
        assert_eq!(registry.current_key(), Some(key.clone()));

        // A detached handle cannot be removed by its former owner.
        assert!(registry.remove(&key, owner).is_none());
    }

    #[test]
    fn test_remove_requires_ownership() {
        let registry = HandleRegistry::new();
        let owner = SessionId::new();
        let key = HandleKey::new("book", "a");
        registry.install(handle("a", owner));

        assert!(registry.remove(&key, SessionId::new()).is_none());
        assert!(registry.remove(&key, owner).is_some());
        assert!(registry.current_key().is_none());
    }
}
