//! Reconnect policy: capped exponential backoff with a bounded attempt count.

use std::time::Duration;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    /// Delay before the `attempt`-th reconnect (1-based), or `None` once the
    /// attempts are used up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// All delays the policy will wait through, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_retries).filter_map(move |attempt| self.delay_for(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(max_retries: u32) -> Backoff {
        Backoff {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_delays_double_then_cap() {
        let delays: Vec<u64> = backoff(6).schedule().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_no_delay_past_max_retries() {
        let policy = backoff(2);
        assert!(policy.delay_for(2).is_some());
        assert_eq!(policy.delay_for(3), None);
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn test_zero_retries_disables_reconnect() {
        assert_eq!(backoff(0).schedule().count(), 0);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = backoff(u32::MAX);
        assert_eq!(policy.delay_for(200), Some(Duration::from_secs(10)));
    }
}
