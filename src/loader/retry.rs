//! Injectable retry policy for batch commits.
//!
//! Real runs sleep on a thread; tests inject a recording fake so backoff
//! behavior is checked without real delays.

use std::fmt;
use std::time::Duration;

/// Clock seam for retry backoff.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Exponential backoff policy for transient commit failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * factor)
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted, sleeping
    /// between attempts. The final error is returned to the caller, which
    /// decides whether it is fatal.
    pub fn run<T, E: fmt::Display>(
        &self,
        sleeper: &dyn Sleeper,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "commit attempt failed: {}; retrying in {:?}",
                        e,
                        delay
                    );
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for FakeSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_success_needs_no_sleep() {
        let sleeper = FakeSleeper::default();
        let result: Result<i32, String> = policy().run(&sleeper, || Ok(42));
        assert_eq!(result.unwrap(), 42);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let sleeper = FakeSleeper::default();
        let mut failures = 3;
        let result: Result<i32, String> = policy().run(&sleeper, || {
            if failures > 0 {
                failures -= 1;
                Err("connection reset".to_string())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        let slept = sleeper.slept.lock().unwrap();
        assert_eq!(
            *slept,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn test_attempts_are_bounded() {
        let sleeper = FakeSleeper::default();
        let mut calls = 0;
        let result: Result<(), String> = policy().run(&sleeper, || {
            calls += 1;
            Err("still down".to_string())
        });
        assert!(result.is_err());
        assert_eq!(calls, 4);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 3);
    }
}
