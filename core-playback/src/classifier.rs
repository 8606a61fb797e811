//! # Error Classifier
//!
//! Maps media element error codes to a recovery action. Nothing here reaches
//! the host as an error: every code ends in a retry, a skipped file or a
//! paused player.
//!
//! | Kind                | Action                                     | Notice        |
//! |---------------------|--------------------------------------------|---------------|
//! | `Aborted`           | ignore                                     | none          |
//! | `Network`/`Unknown` | reload with backoff, then reset to paused  | warning/error |
//! | `Decode`            | mark file failed                           | error         |
//! | `UnsupportedSource` | mark file failed                           | error         |
//!
//! Notices are suppressed during a chained advance; the log keeps the record.

use bridge_traits::{MediaErrorCode, Notice};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::PlaybackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    Aborted,
    Network,
    Decode,
    UnsupportedSource,
    Unknown,
}

impl From<MediaErrorCode> for MediaErrorKind {
    fn from(code: MediaErrorCode) -> Self {
        match code {
            MediaErrorCode::ABORTED => MediaErrorKind::Aborted,
            MediaErrorCode::NETWORK => MediaErrorKind::Network,
            MediaErrorCode::DECODE => MediaErrorKind::Decode,
            MediaErrorCode::SRC_NOT_SUPPORTED => MediaErrorKind::UnsupportedSource,
            _ => MediaErrorKind::Unknown,
        }
    }
}

impl MediaErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaErrorKind::Aborted => "aborted",
            MediaErrorKind::Network => "network",
            MediaErrorKind::Decode => "decode",
            MediaErrorKind::UnsupportedSource => "unsupported_source",
            MediaErrorKind::Unknown => "unknown",
        }
    }

    /// The file itself is unplayable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaErrorKind::Decode | MediaErrorKind::UnsupportedSource)
    }
}

impl fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Ignore,
    /// Reload the current source at the last position after `delay`.
    Retry { delay: Duration, attempt: u32 },
    /// Remember the file as unplayable; a chained advance skips past it.
    MarkFailed,
    ResetToPaused,
}

impl RecoveryAction {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RecoveryAction::Ignore | RecoveryAction::Retry { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: MediaErrorKind,
    pub action: RecoveryAction,
    pub message: String,
    pub notice: Option<Notice>,
}

/// Tracks network retries for the current file.
#[derive(Debug)]
pub struct ErrorClassifier {
    base_delay: Duration,
    max_retries: u32,
    attempts: u32,
}

impl ErrorClassifier {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            base_delay: config.retry_delay(),
            max_retries: config.max_network_retries,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called once playback is healthy again, or a different file loads.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn classify(&mut self, code: MediaErrorCode, chained: bool) -> Classification {
        let kind = MediaErrorKind::from(code);

        let (action, message, notice) = match kind {
            MediaErrorKind::Aborted => (
                RecoveryAction::Ignore,
                "Loading was interrupted".to_string(),
                None,
            ),
            MediaErrorKind::Network | MediaErrorKind::Unknown => {
                if self.attempts < self.max_retries {
                    self.attempts += 1;
                    let factor = 2u32.saturating_pow(self.attempts - 1);
                    let delay = self.base_delay.saturating_mul(factor);
                    (
                        RecoveryAction::Retry {
                            delay,
                            attempt: self.attempts,
                        },
                        format!("Connection problem, retrying ({}/{})", self.attempts, self.max_retries),
                        Some(Notice::warning("Connection problem. Retrying…")),
                    )
                } else {
                    (
                        RecoveryAction::ResetToPaused,
                        "Playback stopped: the audio could not be loaded".to_string(),
                        Some(Notice::error(
                            "Playback stopped. Check your connection and press play to retry.",
                        )),
                    )
                }
            }
            MediaErrorKind::Decode => (
                RecoveryAction::MarkFailed,
                "The audio file is damaged and cannot be played".to_string(),
                Some(Notice::error("This file can't be played.")),
            ),
            MediaErrorKind::UnsupportedSource => (
                RecoveryAction::MarkFailed,
                "The audio format is not supported here".to_string(),
                Some(Notice::error("This audio format isn't supported on this device.")),
            ),
        };

        if action.is_recoverable() {
            info!(kind = %kind, code = code.0, chained, "Recoverable media error");
        } else {
            warn!(kind = %kind, code = code.0, chained, "Media error");
        }

        Classification {
            kind,
            action,
            message,
            notice: if chained { None } else { notice },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(&PlaybackConfig::default())
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(MediaErrorKind::from(MediaErrorCode(1)), MediaErrorKind::Aborted);
        assert_eq!(MediaErrorKind::from(MediaErrorCode(2)), MediaErrorKind::Network);
        assert_eq!(MediaErrorKind::from(MediaErrorCode(3)), MediaErrorKind::Decode);
        assert_eq!(
            MediaErrorKind::from(MediaErrorCode(4)),
            MediaErrorKind::UnsupportedSource
        );
        assert_eq!(MediaErrorKind::from(MediaErrorCode(99)), MediaErrorKind::Unknown);
    }

    #[test]
    fn test_aborted_is_silent() {
        let c = classifier().classify(MediaErrorCode::ABORTED, false);
        assert_eq!(c.action, RecoveryAction::Ignore);
        assert!(c.notice.is_none());
    }

    #[test]
    fn test_network_backoff_then_reset() {
        let mut classifier = classifier();
        let delays: Vec<Duration> = (0..3)
            .map(|_| match classifier.classify(MediaErrorCode::NETWORK, false).action {
                RecoveryAction::Retry { delay, .. } => delay,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );

        let last = classifier.classify(MediaErrorCode(42), false);
        assert_eq!(last.action, RecoveryAction::ResetToPaused);
        assert!(last.notice.is_some());

        classifier.reset();
        assert!(matches!(
            classifier.classify(MediaErrorCode::NETWORK, false).action,
            RecoveryAction::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_terminal_errors_mark_failed() {
        let decode = classifier().classify(MediaErrorCode::DECODE, false);
        assert_eq!(decode.action, RecoveryAction::MarkFailed);
        assert!(decode.kind.is_terminal());
        assert!(decode.notice.is_some());

        let unsupported = classifier().classify(MediaErrorCode::SRC_NOT_SUPPORTED, false);
        assert_eq!(unsupported.action, RecoveryAction::MarkFailed);
    }

    #[test]
    fn test_chained_advance_suppresses_notice() {
        let c = classifier().classify(MediaErrorCode::NETWORK, true);
        assert!(matches!(c.action, RecoveryAction::Retry { .. }));
        assert!(c.notice.is_none());
        assert!(!c.message.is_empty());
    }
}
