//! Reconnection Backoff
//!
//! Exponential backoff between consecutive failed connection attempts. The
//! delay starts at a floor, doubles per failure up to a ceiling, and drops
//! back to the floor once a handshake succeeds. Retries are unlimited by
//! default: the supervisor never gives up on its own.

use std::time::Duration;

use rand::Rng;

/// Smallest delay between attempts when none is configured.
pub const DEFAULT_FLOOR: Duration = Duration::from_secs(1);

/// Largest delay between attempts when none is configured.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(120);

/// Backoff tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry, and after every reset.
    pub floor: Duration,
    /// Upper bound on any delay.
    pub ceiling: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.1 = ±10%). Zero disables.
    pub jitter_factor: f64,
    /// Give up after this many consecutive failures (0 = never).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
            ceiling: DEFAULT_CEILING,
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Backoff with the given floor and ceiling and default growth.
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            ..Self::default()
        }
        .bounded()
    }

    /// A zero floor becomes [`DEFAULT_FLOOR`] and the ceiling is raised to
    /// at least the floor, so every retry waits.
    #[must_use]
    pub fn bounded(mut self) -> Self {
        if self.floor.is_zero() {
            self.floor = DEFAULT_FLOOR;
        }
        self.ceiling = self.ceiling.max(self.floor);
        self
    }
}

/// Consecutive-failure backoff state for one subscription.
///
/// ```rust
/// use firehose_stream::infrastructure::jetstream::reconnect::{Backoff, BackoffConfig};
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(BackoffConfig::default());
/// assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    failures: u32,
}

impl Backoff {
    /// Start at the floor with no failures recorded.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let config = config.bounded();
        let current = config.floor;
        Self {
            config,
            current,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    ///
    /// Returns `None` once `max_attempts` consecutive failures are reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.failures = self.failures.saturating_add(1);

        let delay = self.jittered(self.current);
        self.current = self.grown(self.current);
        Some(delay)
    }

    /// Return to the floor after a successful handshake.
    pub const fn reset(&mut self) {
        self.current = self.config.floor;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next failure will produce, before jitter.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.failures < self.config.max_attempts
    }

    fn grown(&self, delay: Duration) -> Duration {
        let multiplier = if self.config.multiplier.is_finite() && self.config.multiplier >= 1.0 {
            self.config.multiplier
        } else {
            1.0
        };
        // mul_f64 panics on overflow; the ceiling bounds the input well below it.
        delay
            .min(self.config.ceiling)
            .mul_f64(multiplier)
            .min(self.config.ceiling)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base = delay.as_millis() as f64;
        let spread = base * self.config.jitter_factor.min(1.0);
        let offset: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base + offset).max(1.0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn fixed(floor_ms: u64, ceiling_ms: u64) -> Backoff {
        Backoff::new(BackoffConfig::new(
            Duration::from_millis(floor_ms),
            Duration::from_millis(ceiling_ms),
        ))
    }

    #[test]
    fn defaults_match_public_jetstream_guidance() {
        let config = BackoffConfig::default();
        assert_eq!(config.floor, Duration::from_secs(1));
        assert_eq!(config.ceiling, Duration::from_secs(120));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn doubles_until_ceiling() {
        let mut backoff = fixed(1_000, 120_000);
        let delays: Vec<u64> = (0..9)
            .map(|_| u64::try_from(backoff.next_delay().unwrap().as_millis()).unwrap())
            .collect();

        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 120_000, 120_000]
        );
    }

    #[test]
    fn two_failures_then_success_resets_to_floor() {
        let mut backoff = fixed(1_000, 120_000);

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn max_attempts_stops_retrying() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_attempts: 2,
            ..BackoffConfig::default()
        });

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(!backoff.should_retry());
    }

    #[test]
    fn unlimited_by_default() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..10_000 {
            assert!(backoff.next_delay().is_some());
        }
        assert_eq!(backoff.current(), Duration::from_secs(120));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(BackoffConfig {
                floor: Duration::from_millis(1_000),
                jitter_factor: 0.1,
                ..BackoffConfig::default()
            });
            let millis = backoff.next_delay().unwrap().as_millis();
            assert!((900..=1_100).contains(&millis), "delay {millis}ms outside ±10%");
        }
    }

    #[test]
    fn ceiling_below_floor_is_raised() {
        let config = BackoffConfig::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(config.ceiling, Duration::from_secs(5));
    }

    #[test]
    fn zero_floor_never_retries_immediately() {
        let mut backoff = Backoff::new(BackoffConfig {
            floor: Duration::ZERO,
            ceiling: Duration::ZERO,
            ..BackoffConfig::default()
        });
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(delays, [DEFAULT_FLOOR; 3]);

        let config = BackoffConfig::new(Duration::ZERO, Duration::from_secs(30));
        assert_eq!(config.floor, DEFAULT_FLOOR);
        assert_eq!(config.ceiling, Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn delays_are_monotonic_and_bounded(
            floor_ms in 1u64..5_000,
            ceiling_ms in 1u64..600_000,
            failures in 1usize..64,
        ) {
            let ceiling_ms = ceiling_ms.max(floor_ms);
            let mut backoff = fixed(floor_ms, ceiling_ms);

            let mut previous = Duration::ZERO;
            for _ in 0..failures {
                let delay = backoff.next_delay().unwrap();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= Duration::from_millis(ceiling_ms));
                previous = delay;
            }

            backoff.reset();
            prop_assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(floor_ms));
        }
    }
}
