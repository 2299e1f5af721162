//! Retry backoff and request pacing.

use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff for a blocking operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomised in either direction, 0.0..=1.0.
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_pct: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry` (1-based), with jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter_pct == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter_pct..=self.jitter_pct);
        nominal.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the attempt budget is spent. `op` receives the 1-based attempt.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryError<E>> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(RetryError::Fatal(err)),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(_) => {
                    std::thread::sleep(self.delay(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(500), Duration::from_secs(8), 0.2)
    }
}

/// Outcome of a failed `RetryPolicy::run`.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not retryable; returned after the attempt that hit it.
    Fatal(E),
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
}

/// Random pause between consecutive downloads, to stay polite to the
/// remote repository.
#[derive(Debug, Clone, PartialEq)]
pub struct Throttle {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Throttle {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }

    pub fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::new(6, Duration::from_millis(500), Duration::from_secs(3), 0.0);
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(4), Duration::from_secs(3));
        assert_eq!(policy.delay(30), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000), Duration::from_secs(10), 0.25);
        for _ in 0..100 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0;
        let result: Result<u32, RetryError<&str>> = policy.run(
            |attempt| {
                calls += 1;
                if attempt < 3 {
                    Err("flaky")
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let policy = RetryPolicy::immediate(2);
        let mut calls = 0;
        let result: Result<(), _> = policy.run(
            |_| {
                calls += 1;
                Err("down")
            },
            |_| true,
        );
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 2, last: "down" })));
        assert_eq!(calls, 2);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0;
        let result: Result<(), _> = policy.run(
            |_| {
                calls += 1;
                Err("gone")
            },
            |_| false,
        );
        assert!(matches!(result, Err(RetryError::Fatal("gone"))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }

    #[test]
    fn throttle_range() {
        let t = Throttle::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..50 {
            let d = t.next_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(Throttle::disabled().next_delay(), Duration::ZERO);
    }
}
