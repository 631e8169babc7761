//! Registration retry policy.
//!
//! Default: retry forever, immediately re-queued at the tail. With a bounded
//! policy the delay doubles per failed attempt up to `max_delay`, and a
//! request is dropped once `max_attempts` failures have been recorded.

use std::time::Duration;

use esub_config::RetrySettings;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn forever() -> Self {
        Self::default()
    }

    pub fn from_settings(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
        }
    }

    /// `true` once `failed_attempts` has used up the attempt budget.
    pub fn exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts
            .map(|max| failed_attempts >= max)
            .unwrap_or(false)
    }

    /// Delay before the next attempt after `failed_attempts` failures.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if self.base_delay.is_zero() || failed_attempts == 0 {
            return Duration::ZERO;
        }
        let shift = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_never_exhausts_and_never_delays() {
        let p = RetryPolicy::forever();
        assert!(!p.exhausted(u32::MAX));
        assert_eq!(p.delay_for(50), Duration::ZERO);
    }

    #[test]
    fn bounded_policy_doubles_up_to_ceiling() {
        let p = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: Some(4),
            base_delay_ms: 100,
            max_delay_ms: 350,
        });
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
        assert!(!p.exhausted(3));
        assert!(p.exhausted(4));
    }
}
