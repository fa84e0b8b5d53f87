//! Exponential backoff with jitter for task retries (§4.5 step 6).
//!
//! Ported from the teacher's `resilience::RetryPolicy`: same delay formula,
//! same defaults, but retrying here is driven by `task.retry` /
//! `on_failure: retry:N` rather than a retryable-error predicate — every
//! task failure is retryable up to the configured count (§4.5, §9 design
//! notes: "retries against unavailable substrate are useless" is the one
//! carve-out, handled by the Scheduler not retrying `Placement` failures).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before retry attempt `attempt` (0-indexed, counting only
    /// retries — the first attempt is never delayed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(jittered as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt() {
        let config = RetryConfig { jitter: 0.0, ..Default::default() };
        assert_eq!(config.delay_for(0), Duration::from_millis(200));
        assert_eq!(config.delay_for(1), Duration::from_millis(400));
        assert_eq!(config.delay_for(2), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let config = RetryConfig { jitter: 0.0, ..Default::default() };
        assert_eq!(config.delay_for(20), config.max_delay);
    }

    #[test]
    fn jitter_stays_within_declared_range() {
        let config = RetryConfig { jitter: 0.5, ..Default::default() };
        let base = config.initial_delay.as_millis() as f64;
        for _ in 0..50 {
            let d = config.delay_for(0).as_millis() as f64;
            assert!(d >= 0.0 && d <= base * 1.5 + 1.0);
        }
    }
}
