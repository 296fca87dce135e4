//! Exponential retry delays with jitter for batch items whose every domain
//! came back unavailable.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    max: Duration,
    next: Duration,
    attempts: u32,
    jitter_ratio: f64,
}

impl RetryBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            next: base,
            attempts: 0,
            jitter_ratio: 0.2,
        }
    }

    /// Delay before the next retry. Doubles each call up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = add_jitter(self.next, self.jitter_ratio);
        self.next = self.next.saturating_mul(2).min(self.max);
        self.attempts += 1;
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.next = self.base;
        self.attempts = 0;
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) {
        return delay;
    }

    let jitter_ms_max = ((delay.as_millis() as f64) * ratio) as u128;
    if jitter_ms_max == 0 {
        return delay;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter_ms = (now_nanos as u128) % (jitter_ms_max + 1);
    delay + Duration::from_millis(jitter_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_base() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(120));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn doubles_then_saturates() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(10), Duration::from_millis(30));
        backoff.next_delay();
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(20) && second <= Duration::from_millis(24));
        let third = backoff.next_delay();
        assert!(third >= Duration::from_millis(30) && third <= Duration::from_millis(36));
        let fourth = backoff.next_delay();
        assert!(fourth <= Duration::from_millis(36));
    }

    #[test]
    fn reset_restores_base() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(50), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(60));
    }
}
