use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

// After this many doublings any realistic base delay has hit the cap
const MAX_DOUBLINGS: usize = 64;

/// Per-key retry delays, doubling from a base delay up to a cap.
///
/// Unlike a running [`Backoff`](backon::Backoff) this holds no iteration state, so a single
/// instance can serve every key in a queue: the caller tracks the failure count.
#[derive(Clone, Debug)]
pub struct RetryBackoff {
    builder: ExponentialBuilder,
    max_delay: Duration,
}

impl RetryBackoff {
    /// Creates a backoff starting at `base_delay` and never exceeding `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(base_delay);
        Self {
            builder: ExponentialBuilder::default()
                .with_min_delay(base_delay)
                .with_max_delay(max_delay)
                .with_factor(2.0)
                .with_max_times(MAX_DOUBLINGS),
            max_delay,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    ///
    /// Zero failures means no delay at all.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let nth = (failures as usize - 1).min(MAX_DOUBLINGS - 1);
        self.builder.build().nth(nth).unwrap_or(self.max_delay)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}
