//! # Completion Watcher
//!
//! Decides when the current file has finished.
//!
//! The element's `ended` notification is the primary signal. Where it is
//! unreliable (backgrounded pages, installed apps, webviews) a poller compares
//! `duration - current_time` with the profile's near-end threshold; a hit is
//! confirmed by a second reading `confirm_delay` later, because reads close to
//! the boundary are noisy.
//!
//! Completion handling for a file is guarded: [`CompletionWatcher::begin`]
//! returns a guard that keeps the file in an in-flight set until dropped, so
//! a second signal for the same completion is ignored and an early return can
//! never leave the file marked.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::autoplay::PlaybackTarget;
use crate::platform::PlatformProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    RestartLoop,
    Advance,
    FinishPlaylist,
}

/// Removes its file from the in-flight set on drop.
pub struct CompletionGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    file_id: String,
}

impl CompletionGuard {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.file_id);
    }
}

pub struct CompletionWatcher {
    profile: PlatformProfile,
    in_flight: Arc<Mutex<HashSet<String>>>,
    confirm_pending: Mutex<Option<String>>,
}

impl CompletionWatcher {
    pub fn new(profile: PlatformProfile) -> Self {
        Self {
            profile,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            confirm_pending: Mutex::new(None),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.profile.background_poll_interval
    }

    pub fn confirm_delay(&self) -> Duration {
        self.profile.confirm_delay
    }

    pub fn should_poll(&self, foreground: bool) -> bool {
        self.profile.should_poll(foreground)
    }

    /// Claims completion handling for `file_id`. `None` if already running.
    pub fn begin(&self, file_id: &str) -> Option<CompletionGuard> {
        if !self.in_flight.lock().insert(file_id.to_string()) {
            debug!(file_id, "Completion already being handled");
            return None;
        }
        Some(CompletionGuard {
            in_flight: Arc::clone(&self.in_flight),
            file_id: file_id.to_string(),
        })
    }

    pub fn is_handling(&self, file_id: &str) -> bool {
        self.in_flight.lock().contains(file_id)
    }

    pub fn is_near_end(&self, current_time: f64, duration: Option<f64>) -> bool {
        match duration {
            Some(d) if d.is_finite() && d > 0.0 && current_time.is_finite() && current_time > 0.0 => {
                d - current_time <= self.profile.near_end_threshold_secs
            }
            _ => false,
        }
    }

    /// Records a near-end reading. Returns `true` when a confirmation check
    /// should be scheduled, `false` if one is already pending.
    pub fn note_near_end(&self, file_id: &str) -> bool {
        let mut pending = self.confirm_pending.lock();
        if pending.is_some() {
            return false;
        }
        *pending = Some(file_id.to_string());
        true
    }

    /// Consumes the pending confirmation. `true` if it was for `file_id`.
    pub fn take_confirmation(&self, file_id: &str) -> bool {
        self.confirm_pending.lock().take().as_deref() == Some(file_id)
    }

    pub fn reset(&self) {
        self.confirm_pending.lock().take();
    }

    pub fn action(looping: bool, is_last: bool) -> CompletionAction {
        if looping {
            CompletionAction::RestartLoop
        } else if is_last {
            CompletionAction::FinishPlaylist
        } else {
            CompletionAction::Advance
        }
    }
}

/// Seeks to the start and plays, retrying up to `attempts` times. This is a
/// resume after a natural end, separate from autoplay retries.
pub async fn restart_loop(target: &dyn PlaybackTarget, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts.max(1) {
        target.seek(0.0);
        match target.play().await {
            Ok(()) => return true,
            Err(rejection) => {
                warn!(attempt, %rejection, "Loop restart refused");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    false
}
