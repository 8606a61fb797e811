//! # Playlist Navigator
//!
//! Sequential next/previous over the caller's playlist.
//!
//! A move flushes the current file's position first, then force-saves a zero
//! record for the target so "last file played" is updated before the target
//! has loaded. The target's stored position is read before that write and
//! returned in the outcome. If playback was running (or the move comes from a finished
//! file) the chained flag is raised before the index changes, so the autoplay
//! controller resumes on the target without a gesture.
//!
//! At either end nothing moves and nothing is written; a notice is shown and
//! a forward move also pauses.

use bridge_traits::{Notice, Notifier};
use core_runtime::events::Direction;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::autoplay::AutoplayController;
use crate::progress::ProgressStore;
use crate::types::PlaylistEntry;

/// Position source for the pre-move flush.
pub trait NavigationTarget: Send + Sync {
    fn current_time(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn is_playing(&self) -> bool;
    fn pause(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationCause {
    /// In-app buttons or remote controls.
    User,
    /// The current file finished or failed during a chained advance.
    Completion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationOutcome {
    Moved {
        from: String,
        to: PlaylistEntry,
        index: usize,
        chained: bool,
        /// Stored position of the target before the zero write.
        resume_at: f64,
    },
    Boundary(Direction),
    /// An automatic advance found nothing playable after the current file.
    /// No notice or write happened; the caller finishes the playlist.
    Exhausted,
}

pub struct NavigationContext<'a> {
    pub progress: &'a Arc<ProgressStore>,
    pub target: &'a dyn NavigationTarget,
    pub autoplay: &'a AutoplayController,
    pub notifier: Option<&'a dyn Notifier>,
    pub cause: NavigationCause,
}

struct NavState {
    index: usize,
    failed: HashSet<String>,
}

pub struct PlaylistNavigator {
    playlist: Vec<PlaylistEntry>,
    state: Mutex<NavState>,
}

impl PlaylistNavigator {
    pub fn new(playlist: Vec<PlaylistEntry>) -> Self {
        Self {
            playlist,
            state: Mutex::new(NavState {
                index: 0,
                failed: HashSet::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.is_empty()
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.playlist
    }

    pub fn index_of(&self, file_id: &str) -> Option<usize> {
        self.playlist.iter().position(|entry| entry.id == file_id)
    }

    pub fn entry(&self, index: usize) -> Option<&PlaylistEntry> {
        self.playlist.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.state.lock().index
    }

    pub fn current(&self) -> Option<&PlaylistEntry> {
        self.playlist.get(self.current_index())
    }

    pub fn is_last(&self) -> bool {
        self.current_index() + 1 >= self.playlist.len()
    }

    /// Moves the index without any progress bookkeeping.
    pub fn jump_to(&self, index: usize) -> Option<&PlaylistEntry> {
        let entry = self.playlist.get(index)?;
        self.state.lock().index = index;
        Some(entry)
    }

    pub fn mark_failed(&self, file_id: &str) {
        self.state.lock().failed.insert(file_id.to_string());
    }

    pub fn is_failed(&self, file_id: &str) -> bool {
        self.state.lock().failed.contains(file_id)
    }

    /// The next `count` entries after the current one, skipping failed files.
    pub fn upcoming(&self, count: usize) -> Vec<PlaylistEntry> {
        let state = self.state.lock();
        self.playlist
            .iter()
            .skip(state.index + 1)
            .filter(|entry| !state.failed.contains(&entry.id))
            .take(count)
            .cloned()
            .collect()
    }

    fn neighbour(&self, direction: Direction, skip_failed: bool) -> Option<usize> {
        let state = self.state.lock();
        let usable = |i: &usize| !skip_failed || !state.failed.contains(&self.playlist[*i].id);
        match direction {
            Direction::Next => (state.index + 1..self.playlist.len()).find(usable),
            Direction::Previous => (0..state.index).rev().find(usable),
        }
    }

    pub async fn advance(&self, ctx: &NavigationContext<'_>) -> NavigationOutcome {
        self.step(Direction::Next, ctx).await
    }

    pub async fn retreat(&self, ctx: &NavigationContext<'_>) -> NavigationOutcome {
        self.step(Direction::Previous, ctx).await
    }

    #[instrument(skip(self, ctx), fields(cause = ?ctx.cause))]
    async fn step(&self, direction: Direction, ctx: &NavigationContext<'_>) -> NavigationOutcome {
        let was_playing = ctx.target.is_playing();
        let chained = ctx.cause == NavigationCause::Completion || was_playing;
        let skip_failed = chained || ctx.autoplay.is_chained();

        let Some(target_index) = self.neighbour(direction, skip_failed) else {
            if direction == Direction::Next && ctx.cause == NavigationCause::Completion {
                debug!("No playable file left after the current one");
                return NavigationOutcome::Exhausted;
            }
            let message = match direction {
                Direction::Next => "You've reached the last file.",
                Direction::Previous => "You're already at the first file.",
            };
            if let Some(notifier) = ctx.notifier {
                notifier.notify(Notice::info(message));
            }
            if direction == Direction::Next {
                ctx.target.pause();
            }
            debug!(?direction, "Playlist boundary");
            return NavigationOutcome::Boundary(direction);
        };

        let from_index = self.current_index();
        let from = self.playlist[from_index].id.clone();
        let to = self.playlist[target_index].clone();

        let position = ctx.target.current_time();
        match ctx.target.duration() {
            Some(duration) => ctx.progress.save(&from, position, Some(duration)),
            None => {
                ctx.progress.force_save(&from, position, None).await;
            }
        }
        let resume_at = ctx.progress.resume_position(&to.id).await;
        ctx.progress.force_save(&to.id, 0.0, None).await;

        if chained {
            ctx.autoplay.set_chained(true);
        }
        self.state.lock().index = target_index;

        info!(from = %from, to = %to.id, chained, "Playlist moved");
        NavigationOutcome::Moved {
            from,
            to,
            index: target_index,
            chained,
            resume_at,
        }
    }
}
