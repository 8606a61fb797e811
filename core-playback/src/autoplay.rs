//! # Autoplay Controller
//!
//! Bounded-retry state machine that starts playback within the host's
//! autoplay policy.
//!
//! ```text
//!           arm()                 play() ok
//!   Idle ─────────> Attempting ───────────────> Playing
//!                     │   ▲  │
//!          not ready /│   │  │ NotAllowed (policy says block)
//!          retryable  │   │  └──────────────────> Blocked
//!          rejection  ▼   │
//!                  RetryAfter   attempts == max ──> Exhausted
//! ```
//!
//! Every attempt counts against `max_autoplay_retries`, whether it failed on
//! readiness or on a rejected `play()`. A chained advance waits for
//! `canplaythrough` (or a fallback timer) before its first attempt. Only the
//! embedded webview profile may re-arm an exhausted controller, and each arm
//! cycle is bounded again.

use async_trait::async_trait;
use bridge_traits::{MediaEvent, PlayRejection, ReadyState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::platform::{PlatformProfile, RejectionPolicy};

/// What the controller drives. Implemented by the audio session.
#[async_trait]
pub trait PlaybackTarget: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    async fn play(&self) -> std::result::Result<(), PlayRejection>;

    fn pause(&self);

    fn seek(&self, position: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayState {
    Idle,
    Attempting,
    Playing,
    Blocked,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutoplayTrigger {
    /// The user pressed play.
    UserRequested,
    /// A stored resume position exists.
    Resume,
    /// The previous file finished or the user skipped while playing.
    ChainedAdvance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmDecision {
    AttemptNow,
    /// Wait for `canplaythrough`; the caller schedules a fallback attempt.
    WaitForPlayThrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Started,
    RetryAfter(Duration),
    Blocked,
    Exhausted { attempts: u32 },
    /// The controller was re-armed, cancelled or moved on meanwhile.
    Stale,
}

#[derive(Debug)]
struct Inner {
    state: AutoplayState,
    trigger: Option<AutoplayTrigger>,
    generation: u64,
    attempts: u32,
    awaiting_play_through: bool,
    chained: bool,
}

pub struct AutoplayController {
    profile: PlatformProfile,
    inner: Mutex<Inner>,
}

impl AutoplayController {
    pub fn new(profile: PlatformProfile) -> Self {
        Self {
            profile,
            inner: Mutex::new(Inner {
                state: AutoplayState::Idle,
                trigger: None,
                generation: 0,
                attempts: 0,
                awaiting_play_through: false,
                chained: false,
            }),
        }
    }

    pub fn state(&self) -> AutoplayState {
        self.inner.lock().state
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.profile.max_autoplay_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.profile.retry_delay
    }

    /// Chained auto-advance intent. Set before the playlist index moves.
    pub fn set_chained(&self, chained: bool) {
        self.inner.lock().chained = chained;
    }

    pub fn is_chained(&self) -> bool {
        self.inner.lock().chained
    }

    /// Starts a new attempt cycle for the load identified by `generation`.
    pub fn arm(&self, trigger: AutoplayTrigger, generation: u64, ready: ReadyState) -> ArmDecision {
        let mut inner = self.inner.lock();
        inner.state = AutoplayState::Attempting;
        inner.trigger = Some(trigger);
        inner.generation = generation;
        inner.attempts = 0;
        inner.awaiting_play_through =
            trigger == AutoplayTrigger::ChainedAdvance && ready < ReadyState::HaveEnoughData;
        debug!(?trigger, generation, "Autoplay armed");

        if inner.awaiting_play_through {
            ArmDecision::WaitForPlayThrough
        } else {
            ArmDecision::AttemptNow
        }
    }

    /// Whether `event` should trigger an immediate attempt.
    pub fn wants_attempt_on(&self, event: &MediaEvent) -> bool {
        let inner = self.inner.lock();
        inner.state == AutoplayState::Attempting
            && inner.awaiting_play_through
            && matches!(event, MediaEvent::CanPlayThrough)
    }

    /// Playback started by other means, e.g. the element's own controls.
    pub fn mark_playing(&self) {
        let mut inner = self.inner.lock();
        if inner.state != AutoplayState::Playing {
            inner.state = AutoplayState::Playing;
            inner.awaiting_play_through = false;
            inner.chained = false;
        }
    }

    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.state = AutoplayState::Idle;
        inner.trigger = None;
        inner.attempts = 0;
        inner.awaiting_play_through = false;
    }

    /// Opportunistic retry after exhaustion. Only profiles that allow it can
    /// re-arm, and the new cycle is bounded like any other.
    pub fn rearm(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if !self.profile.allow_rearm
            || inner.state != AutoplayState::Exhausted
            || inner.generation != generation
        {
            return false;
        }
        inner.state = AutoplayState::Attempting;
        inner.attempts = 0;
        inner.awaiting_play_through = false;
        if inner.chained {
            inner.trigger = Some(AutoplayTrigger::ChainedAdvance);
        }
        info!(generation, "Autoplay re-armed");
        true
    }

    fn exhaust(&self, inner: &mut Inner) -> AttemptOutcome {
        inner.state = AutoplayState::Exhausted;
        inner.awaiting_play_through = false;
        if !self.profile.preserve_chained_on_exhaust {
            inner.chained = false;
        }
        warn!(attempts = inner.attempts, platform = %self.profile.class, "Autoplay retries exhausted");
        AttemptOutcome::Exhausted {
            attempts: inner.attempts,
        }
    }

    fn after_failure(&self, generation: u64) -> AttemptOutcome {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != AutoplayState::Attempting {
            return AttemptOutcome::Stale;
        }
        if inner.attempts >= self.profile.max_autoplay_retries {
            self.exhaust(&mut inner)
        } else {
            AttemptOutcome::RetryAfter(self.profile.retry_delay)
        }
    }

    /// Runs one attempt against `target`.
    pub async fn attempt(&self, target: &dyn PlaybackTarget, generation: u64) -> AttemptOutcome {
        let (trigger, attempt) = {
            let mut inner = self.inner.lock();
            if inner.state != AutoplayState::Attempting || inner.generation != generation {
                return AttemptOutcome::Stale;
            }
            if inner.attempts >= self.profile.max_autoplay_retries {
                return self.exhaust(&mut inner);
            }
            inner.attempts += 1;
            inner.awaiting_play_through = false;
            (inner.trigger, inner.attempts)
        };

        let ready = target.ready_state();
        if !ready.can_play() {
            debug!(attempt, ?ready, "Not enough data buffered; retrying later");
            return self.after_failure(generation);
        }

        match target.play().await {
            Ok(()) => {
                if trigger == Some(AutoplayTrigger::ChainedAdvance) && self.profile.stagger_chained {
                    target.pause();
                    tokio::time::sleep(self.profile.stagger_delay).await;
                    if let Err(rejection) = target.play().await {
                        warn!(%rejection, "Staggered resume refused");
                        return self.on_rejection(generation, attempt, rejection);
                    }
                }

                let mut inner = self.inner.lock();
                if inner.generation != generation || inner.state != AutoplayState::Attempting {
                    return AttemptOutcome::Stale;
                }
                inner.state = AutoplayState::Playing;
                inner.chained = false;
                info!(attempt, ?trigger, "Autoplay started");
                AttemptOutcome::Started
            }
            Err(rejection) => self.on_rejection(generation, attempt, rejection),
        }
    }

    fn on_rejection(&self, generation: u64, attempt: u32, rejection: PlayRejection) -> AttemptOutcome {
        let policy = self.profile.on_rejection(&rejection);
        debug!(attempt, %rejection, ?policy, platform = %self.profile.class, "Play rejected");

        match policy {
            RejectionPolicy::Retry => self.after_failure(generation),
            RejectionPolicy::Block => {
                let mut inner = self.inner.lock();
                if inner.generation != generation || inner.state != AutoplayState::Attempting {
                    return AttemptOutcome::Stale;
                }
                inner.state = AutoplayState::Blocked;
                if !self.profile.preserve_chained_on_block {
                    inner.chained = false;
                }
                info!("Autoplay blocked; waiting for a user gesture");
                AttemptOutcome::Blocked
            }
            RejectionPolicy::Fail => {
                let mut inner = self.inner.lock();
                if inner.generation != generation || inner.state != AutoplayState::Attempting {
                    return AttemptOutcome::Stale;
                }
                self.exhaust(&mut inner)
            }
        }
    }
}
