//! Reconnect backoff policy
//!
//! `delay(n) = min(max_delay, base_delay * 2^n)` for the n-th reconnect cycle
//! (0-based). After `max_attempts` cycles without a successful open the client
//! gives up and enters standalone mode.

use lumen_core::time::duration_ms;
use lumen_core::{LumenError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reconnect cycles allowed before entering standalone mode
    pub max_attempts: u32,
    /// Delay before the first reconnect cycle
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff delay for a 0-based attempt number
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay the policy will ever produce, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|n| self.delay(n)).collect()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(LumenError::config("base_delay must be greater than 0"));
        }
        if self.max_delay < self.base_delay {
            return Err(LumenError::config("max_delay must be at least base_delay"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_schedule_is_non_decreasing_and_bounded() {
        let policy = ReconnectPolicy {
            max_attempts: 12,
            ..Default::default()
        };
        let schedule = policy.schedule();
        assert_eq!(schedule.len(), 12);
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        assert!(schedule.iter().all(|d| *d <= Duration::from_secs(30)));
    }

    #[test]
    fn test_validation() {
        let mut policy = ReconnectPolicy::default();
        assert!(policy.validate().is_ok());
        policy.max_delay = Duration::from_millis(10);
        assert!(policy.validate().is_err());
    }
}
