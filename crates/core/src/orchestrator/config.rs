//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::ContentType;

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Concurrent adapter calls allowed per capability.
    #[serde(default)]
    pub slots: SlotConfig,

    /// Per-attempt time budget per capability.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry policy for transient generation errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Capacity of the notification channel.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_notification_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            slots: SlotConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

/// Slot pool sizes per capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotConfig {
    #[serde(default = "default_illustration_slots")]
    pub illustration: usize,
    #[serde(default = "default_audio_slots")]
    pub audio: usize,
    #[serde(default = "default_video_slots")]
    pub video: usize,
}

fn default_illustration_slots() -> usize {
    4
}

fn default_audio_slots() -> usize {
    4
}

fn default_video_slots() -> usize {
    2
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            illustration: default_illustration_slots(),
            audio: default_audio_slots(),
            video: default_video_slots(),
        }
    }
}

impl SlotConfig {
    /// Same limit for every capability.
    pub fn uniform(slots: usize) -> Self {
        Self {
            illustration: slots,
            audio: slots,
            video: slots,
        }
    }

    pub fn for_capability(&self, capability: ContentType) -> usize {
        match capability {
            ContentType::Illustration => self.illustration,
            ContentType::Audio => self.audio,
            ContentType::Video => self.video,
        }
    }
}

/// Attempt timeouts per capability (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_short_timeout")]
    pub illustration_ms: u64,
    #[serde(default = "default_short_timeout")]
    pub audio_ms: u64,
    #[serde(default = "default_video_timeout")]
    pub video_ms: u64,
}

fn default_short_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_video_timeout() -> u64 {
    120_000 // 2 minutes
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            illustration_ms: default_short_timeout(),
            audio_ms: default_short_timeout(),
            video_ms: default_video_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn for_capability(&self, capability: ContentType) -> Duration {
        let ms = match capability {
            ContentType::Illustration => self.illustration_ms,
            ContentType::Audio => self.audio_ms,
            ContentType::Video => self.video_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total adapter invocations allowed per job (first attempt included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Factor applied to the delay after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Backoff after `failed_attempt` (1-based) failed.
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(63) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.slots.for_capability(ContentType::Illustration), 4);
        assert_eq!(config.slots.for_capability(ContentType::Audio), 4);
        assert_eq!(config.slots.for_capability(ContentType::Video), 2);
        assert_eq!(
            config.timeouts.for_capability(ContentType::Audio),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.timeouts.for_capability(ContentType::Video),
            Duration::from_secs(120)
        );
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.notification_buffer, 256);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(retry.delay_for_attempt(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_partial_toml() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            [slots]
            video = 1

            [retry]
            initial_delay_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.slots.video, 1);
        assert_eq!(config.slots.audio, 4);
        assert_eq!(config.retry.initial_delay_ms, 50);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
