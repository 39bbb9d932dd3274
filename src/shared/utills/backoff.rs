//! Reconnect backoff policy
//!
//! Linear backoff: the n-th retry waits `base_delay * n`, capped at
//! `max_delay`. After `max_attempts` failed retries the policy yields no
//! further delay and the caller gives up.

use std::time::Duration;

/// Default number of reconnect attempts before a station is marked `error`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for reconnect behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of retries after a connection loss.
    pub max_attempts: u32,
    /// Delay before the first retry; multiplied by the attempt number.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let delay = self.base_delay.saturating_mul(attempt);
        Some(delay.min(self.max_delay))
    }

    /// The full schedule of delays this policy would produce.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(|attempt| self.delay_for(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let policy = ReconnectPolicy::new(Duration::from_millis(100), 5);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_millis(500)));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for(DEFAULT_MAX_ATTEMPTS).is_some());
        assert_eq!(policy.delay_for(DEFAULT_MAX_ATTEMPTS + 1), None);
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.schedule().count(), 5);
    }

    #[test]
    fn schedule_is_non_decreasing_and_capped() {
        let policy = ReconnectPolicy::new(Duration::from_secs(20), 5)
            .with_max_delay(Duration::from_secs(50));
        let delays: Vec<_> = policy.schedule().collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays.last(), Some(&Duration::from_secs(50)));
    }
}
