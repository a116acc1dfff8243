//! Bounded-retry predicate polling.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, trace};

/// Retry budget for one poll call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Worst-case time spent sleeping (no sleep after the last attempt).
    pub fn sleep_budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }
}

/// Call `probe` until it yields a value or the budget is spent.
///
/// Sleeps `interval` after each empty attempt except the last. Returns the
/// value together with the number of attempts made.
pub fn poll_value<T, F>(config: PollConfig, mut probe: F) -> (Option<T>, u32)
where
    F: FnMut() -> Option<T>,
{
    for attempt in 1..=config.max_attempts {
        if let Some(value) = probe() {
            debug!(attempt, "poll satisfied");
            return (Some(value), attempt);
        }
        trace!(attempt, max_attempts = config.max_attempts, "poll attempt empty");
        if attempt < config.max_attempts && !config.interval.is_zero() {
            thread::sleep(config.interval);
        }
    }
    debug!(max_attempts = config.max_attempts, "poll budget exhausted");
    (None, config.max_attempts)
}

/// Call `predicate` until it returns `true` or the budget is spent.
///
/// Predicate errors count as a failed attempt.
pub fn poll_until<F>(config: PollConfig, mut predicate: F) -> PollOutcome
where
    F: FnMut() -> Result<bool>,
{
    let (ready, attempts) = poll_value(config, || match predicate() {
        Ok(true) => Some(()),
        Ok(false) => None,
        Err(err) => {
            trace!(err = %format!("{err:#}"), "poll predicate errored");
            None
        }
    });
    match ready {
        Some(()) => PollOutcome::Ready { attempts },
        None => PollOutcome::TimedOut { attempts },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Instant;

    #[test]
    fn short_circuits_on_first_success() {
        let mut calls = 0;
        let outcome = poll_until(PollConfig::new(Duration::ZERO, 10), || {
            calls += 1;
            Ok(calls == 3)
        });
        assert_eq!(outcome, PollOutcome::Ready { attempts: 3 });
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_exactly_max_attempts() {
        let mut calls = 0;
        let outcome = poll_until(PollConfig::new(Duration::ZERO, 30), || {
            calls += 1;
            Ok(false)
        });
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 30 });
        assert_eq!(calls, 30);
    }

    #[test]
    fn errors_count_as_failed_attempts() {
        let mut calls = 0;
        let outcome = poll_until(PollConfig::new(Duration::ZERO, 4), || {
            calls += 1;
            if calls < 4 {
                Err(anyhow!("connection refused"))
            } else {
                Ok(true)
            }
        });
        assert_eq!(outcome, PollOutcome::Ready { attempts: 4 });
    }

    #[test]
    fn never_sleeps_before_first_or_after_last_attempt() {
        let interval = Duration::from_millis(200);

        let start = Instant::now();
        let outcome = poll_until(PollConfig::new(interval, 1), || Ok(false));
        assert!(!outcome.is_ready());
        assert!(start.elapsed() < interval);

        let start = Instant::now();
        let outcome = poll_until(PollConfig::new(interval, 5), || Ok(true));
        assert!(outcome.is_ready());
        assert!(start.elapsed() < interval);
    }

    #[test]
    fn sleeps_between_failed_attempts() {
        let interval = Duration::from_millis(20);
        let start = Instant::now();
        poll_until(PollConfig::new(interval, 3), || Ok(false));
        assert!(start.elapsed() >= interval * 2);
    }

    #[test]
    fn poll_value_returns_first_observation() {
        let mut heights = vec![None, None, Some(7u64), Some(8)].into_iter();
        let (value, attempts) =
            poll_value(PollConfig::new(Duration::ZERO, 5), || heights.next().flatten());
        assert_eq!(value, Some(7));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn sleep_budget_excludes_trailing_sleep() {
        let config = PollConfig::new(Duration::from_secs(1), 30);
        assert_eq!(config.sleep_budget(), Duration::from_secs(29));
    }
}
