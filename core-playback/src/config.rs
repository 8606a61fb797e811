//! # Playback Configuration
//!
//! Tunables for preloading, autoplay retries, progress sync and completion
//! detection. Every field has a serde default so hosts can pass a partial
//! JSON object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Number of upcoming playlist entries to fetch ahead, one at a time.
    ///
    /// Default: 3.
    #[serde(default = "default_preload_count")]
    pub preload_count: usize,

    /// Play attempts per load before the autoplay controller gives up.
    ///
    /// Default: 5.
    #[serde(default = "default_max_autoplay_retries")]
    pub max_autoplay_retries: u32,

    /// Fixed delay between autoplay attempts.
    ///
    /// Default: 1000 ms.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Minimum spacing of debounced progress writes.
    ///
    /// Default: 15000 ms.
    #[serde(default = "default_progress_save_interval_ms")]
    pub progress_save_interval_ms: u64,

    /// Lifetime of a preloaded entry.
    ///
    /// Default: one hour.
    #[serde(default = "default_cache_expiration_ms")]
    pub cache_expiration_ms: u64,

    /// How often expired preload entries are swept.
    ///
    /// Default: ten minutes.
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,

    /// Reloads attempted after transient media errors before resetting to
    /// paused. Backoff doubles from `retry_delay_ms`.
    ///
    /// Default: 3.
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,

    /// Play attempts when loop mode restarts a finished file.
    ///
    /// Default: 3.
    #[serde(default = "default_loop_restart_attempts")]
    pub loop_restart_attempts: u32,

    /// Step used by the seek backward/forward transport actions.
    ///
    /// Default: 30 s.
    #[serde(default = "default_skip_interval_secs")]
    pub skip_interval_secs: f64,

    /// Pause before resuming during a staggered chained advance.
    ///
    /// Default: 150 ms.
    #[serde(default = "default_stagger_delay_ms")]
    pub stagger_delay_ms: u64,

    /// Completion polling knobs per platform class.
    #[serde(default)]
    pub completion: CompletionTuningSet,
}

/// Near-end detection knobs for one platform class.
///
/// The thresholds are empirically tuned heuristics, not derived limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionTuning {
    pub poll_interval_ms: u64,
    /// Remaining seconds at which a file counts as nearly finished.
    pub near_end_threshold_secs: f64,
    /// Delay before re-checking a near-end reading.
    pub confirm_delay_ms: u64,
}

impl CompletionTuning {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionTuningSet {
    #[serde(default = "default_browser_tuning")]
    pub browser: CompletionTuning,
    #[serde(default = "default_standalone_tuning")]
    pub standalone: CompletionTuning,
    #[serde(default = "default_embedded_tuning")]
    pub embedded: CompletionTuning,
}

impl Default for CompletionTuningSet {
    fn default() -> Self {
        Self {
            browser: default_browser_tuning(),
            standalone: default_standalone_tuning(),
            embedded: default_embedded_tuning(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            preload_count: default_preload_count(),
            max_autoplay_retries: default_max_autoplay_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            progress_save_interval_ms: default_progress_save_interval_ms(),
            cache_expiration_ms: default_cache_expiration_ms(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
            max_network_retries: default_max_network_retries(),
            loop_restart_attempts: default_loop_restart_attempts(),
            skip_interval_secs: default_skip_interval_secs(),
            stagger_delay_ms: default_stagger_delay_ms(),
            completion: CompletionTuningSet::default(),
        }
    }
}

impl PlaybackConfig {
    /// Low-memory devices: one file ahead, sparser progress writes, shorter
    /// cache lifetime.
    pub fn constrained_device() -> Self {
        Self {
            preload_count: 1,
            progress_save_interval_ms: 30_000,
            cache_expiration_ms: 20 * 60 * 1000,
            cache_sweep_interval_ms: 5 * 60 * 1000,
            ..Default::default()
        }
    }

    /// Generous preloading and tighter autoplay retries for desktop hosts.
    pub fn eager() -> Self {
        Self {
            preload_count: 5,
            retry_delay_ms: 500,
            max_autoplay_retries: 8,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_autoplay_retries == 0 {
            return Err("max_autoplay_retries must be > 0".to_string());
        }

        if self.retry_delay_ms == 0 {
            return Err("retry_delay_ms must be > 0".to_string());
        }

        if self.progress_save_interval_ms < 1000 {
            return Err("progress_save_interval_ms must be at least 1000".to_string());
        }

        if self.cache_expiration_ms == 0 || self.cache_sweep_interval_ms == 0 {
            return Err("cache expiration and sweep interval must be > 0".to_string());
        }

        if !(self.skip_interval_secs > 0.0) {
            return Err("skip_interval_secs must be > 0".to_string());
        }

        for (name, tuning) in [
            ("browser", &self.completion.browser),
            ("standalone", &self.completion.standalone),
            ("embedded", &self.completion.embedded),
        ] {
            if tuning.poll_interval_ms == 0 {
                return Err(format!("{} poll_interval_ms must be > 0", name));
            }
            if !(tuning.near_end_threshold_secs > 0.0) {
                return Err(format!("{} near_end_threshold_secs must be > 0", name));
            }
        }

        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn progress_save_interval(&self) -> Duration {
        Duration::from_millis(self.progress_save_interval_ms)
    }

    pub fn cache_expiration(&self) -> Duration {
        Duration::from_millis(self.cache_expiration_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_preload_count() -> usize {
    3
}

fn default_max_autoplay_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_progress_save_interval_ms() -> u64 {
    15_000
}

fn default_cache_expiration_ms() -> u64 {
    60 * 60 * 1000
}

fn default_cache_sweep_interval_ms() -> u64 {
    10 * 60 * 1000
}

fn default_max_network_retries() -> u32 {
    3
}

fn default_loop_restart_attempts() -> u32 {
    3
}

fn default_skip_interval_secs() -> f64 {
    30.0
}

fn default_stagger_delay_ms() -> u64 {
    150
}

fn default_browser_tuning() -> CompletionTuning {
    CompletionTuning {
        poll_interval_ms: 500,
        near_end_threshold_secs: 1.0,
        confirm_delay_ms: 600,
    }
}

fn default_standalone_tuning() -> CompletionTuning {
    CompletionTuning {
        poll_interval_ms: 500,
        near_end_threshold_secs: 2.0,
        confirm_delay_ms: 800,
    }
}

fn default_embedded_tuning() -> CompletionTuning {
    CompletionTuning {
        poll_interval_ms: 300,
        near_end_threshold_secs: 1.5,
        confirm_delay_ms: 700,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlaybackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preload_count, 3);
        assert_eq!(config.max_autoplay_retries, 5);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.cache_expiration(), Duration::from_secs(3600));
        assert_eq!(config.completion.embedded.poll_interval_ms, 300);
    }

    #[test]
    fn test_presets_validate() {
        let constrained = PlaybackConfig::constrained_device();
        assert!(constrained.validate().is_ok());
        assert!(constrained.preload_count < PlaybackConfig::default().preload_count);

        let eager = PlaybackConfig::eager();
        assert!(eager.validate().is_ok());
        assert!(eager.preload_count > PlaybackConfig::default().preload_count);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PlaybackConfig =
            serde_json::from_str(r#"{"preload_count": 1, "completion": {"embedded": {"poll_interval_ms": 250, "near_end_threshold_secs": 1.2, "confirm_delay_ms": 500}}}"#)
                .unwrap();
        assert_eq!(config.preload_count, 1);
        assert_eq!(config.max_autoplay_retries, 5);
        assert_eq!(config.completion.embedded.poll_interval_ms, 250);
        assert_eq!(config.completion.browser.near_end_threshold_secs, 1.0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PlaybackConfig::default();

        config.max_autoplay_retries = 0;
        assert!(config.validate().is_err());
        config.max_autoplay_retries = 5;

        config.progress_save_interval_ms = 10;
        assert!(config.validate().is_err());
        config.progress_save_interval_ms = 15_000;

        config.completion.standalone.near_end_threshold_secs = 0.0;
        assert!(config.validate().is_err());
        config.completion.standalone.near_end_threshold_secs = 2.0;

        config.skip_interval_secs = f64::NAN;
        assert!(config.validate().is_err());
    }
}
