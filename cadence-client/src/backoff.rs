//! Exponential reconnect backoff.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Delay schedule for consecutive reconnect failures.
///
/// The k-th consecutive failure waits `min(initial * multiplier^(k-1), max)`
/// plus optional jitter, never more than `max`. [`Backoff::reset`] is called
/// the moment a connection opens.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial = Duration::from_millis(config.initial_ms);
        let max = Duration::from_millis(config.max_ms).max(initial);
        Self {
            initial,
            max,
            multiplier: config.multiplier.max(1.0),
            jitter: Duration::from_millis(config.jitter_ms),
            current: initial,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.failures = self.failures.saturating_add(1);
        self.current = Duration::try_from_secs_f64(base.as_secs_f64() * self.multiplier)
            .map_or(self.max, |next| next.min(self.max));
        (base + self.sample_jitter()).min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Base delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_backoff() -> Backoff {
        Backoff::new(&ReconnectConfig::default())
    }

    #[test]
    fn doubles_until_ceiling() {
        let mut backoff = default_backoff();
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );
        assert_eq!(backoff.failures(), 8);
    }

    #[test]
    fn reset_restarts_from_initial() {
        let mut backoff = default_backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2_000));
    }

    #[test]
    fn jitter_never_exceeds_ceiling() {
        let mut backoff = Backoff::new(&ReconnectConfig {
            initial_ms: 1_000,
            max_ms: 4_000,
            multiplier: 2.0,
            jitter_ms: 5_000,
        });
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(4_000));
        }
    }

    #[test]
    fn oversized_multiplier_saturates_at_ceiling() {
        for multiplier in [1e20, f64::INFINITY, f64::NAN] {
            let mut backoff = Backoff::new(&ReconnectConfig {
                initial_ms: 1_000,
                max_ms: 30_000,
                multiplier,
                jitter_ms: 0,
            });
            assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
            let second = backoff.next_delay();
            assert!(second <= Duration::from_millis(30_000), "{multiplier}: {second:?}");
            assert!(backoff.next_delay() <= Duration::from_millis(30_000));
        }
    }
}
