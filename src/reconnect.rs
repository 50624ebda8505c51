//! Reopen decisions for a camera that stopped delivering frames.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// What the capture worker should do about a lost device this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try to reopen the device now
    Attempt,
    /// Too early; the next attempt is due after the given duration
    Wait(Duration),
    /// Retry ceiling reached, settle in synthetic mode
    GiveUp,
}

/// Stateless reconnect rules
///
/// The caller owns every counter and timestamp and passes them in, so the
/// policy can be shared freely and tested without a clock.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_interval: Duration,
    max_open_retries: u32,
    read_failure_threshold: u32,
}

impl ReconnectPolicy {
    pub fn new(
        interval: Duration,
        max_interval: Duration,
        max_open_retries: u32,
        read_failure_threshold: u32,
    ) -> Self {
        Self {
            interval,
            max_interval: max_interval.max(interval),
            max_open_retries,
            read_failure_threshold,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.interval(),
            config.max_interval(),
            config.max_open_retries,
            config.read_failure_threshold,
        )
    }

    /// Spacing required after `failed_attempts` unsuccessful reopens
    ///
    /// Doubles with every failure, starting at the base interval and capped at
    /// the maximum interval.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let delay = self.interval.saturating_mul(2_u32.pow(exponent));
        delay.min(self.max_interval)
    }

    /// Decide whether a reopen may happen now
    ///
    /// `since_last_attempt` is `None` when no attempt was made during the
    /// current outage.
    pub fn decide(
        &self,
        failed_attempts: u32,
        since_last_attempt: Option<Duration>,
    ) -> ReconnectDecision {
        if self.has_exhausted(failed_attempts) {
            return ReconnectDecision::GiveUp;
        }

        match since_last_attempt {
            None => ReconnectDecision::Attempt,
            Some(elapsed) => {
                let required = self.delay_for(failed_attempts).max(self.interval);
                if elapsed >= required {
                    ReconnectDecision::Attempt
                } else {
                    ReconnectDecision::Wait(required - elapsed)
                }
            }
        }
    }

    /// Read failures beyond the threshold force a reconnect
    pub fn should_escalate(&self, consecutive_read_failures: u32) -> bool {
        consecutive_read_failures > self.read_failure_threshold
    }

    pub fn has_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_open_retries
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_open_retries(&self) -> u32 {
        self.max_open_retries
    }

    pub fn read_failure_threshold(&self) -> u32 {
        self.read_failure_threshold
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
