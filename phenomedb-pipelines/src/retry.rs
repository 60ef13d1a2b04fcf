//! Scheduler admission polling.
//!
//! A freshly written artifact is not schedulable until the scheduler's own
//! directory scan picks it up, and nothing notifies us when that happens. The
//! manager therefore polls the registration check on a fixed schedule.

use std::future::Future;
use std::time::Duration;

/// Bounded polling schedule for scheduler registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRetry {
    /// Wait before the first check, applied only after a fresh artifact write.
    pub initial_wait: Duration,
    /// Gaps between successive checks.
    pub delays: Vec<Duration>,
}

impl AdmissionRetry {
    pub fn new(initial_wait: Duration, delays: Vec<Duration>) -> Self {
        Self {
            initial_wait,
            delays,
        }
    }

    /// A schedule with the given number of checks and no waiting at all.
    pub fn immediate(attempts: usize) -> Self {
        Self {
            initial_wait: Duration::ZERO,
            delays: vec![Duration::ZERO; attempts.saturating_sub(1)],
        }
    }

    /// Total number of checks performed before giving up.
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Runs `check` until it reports `true` or the schedule is exhausted.
    ///
    /// Returns `Ok(false)` on exhaustion. Errors from `check` abort the loop.
    pub async fn poll<F, Fut, E>(&self, mut check: F) -> Result<bool, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let mut attempt = 1;

        loop {
            if check(attempt).await? {
                if attempt > 1 {
                    tracing::info!("Registration confirmed after {} check(s)", attempt);
                }
                return Ok(true);
            }

            let Some(delay) = self.delays.get(attempt - 1) else {
                tracing::warn!("Registration not confirmed after {} check(s)", attempt);
                return Ok(false);
            };

            tracing::debug!("Check {} negative, next in {:?}", attempt, delay);
            tokio::time::sleep(*delay).await;
            attempt += 1;
        }
    }
}

impl Default for AdmissionRetry {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(100),
            vec![
                Duration::from_secs(100),
                Duration::from_secs(100),
                Duration::from_secs(300),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_default_schedule() {
        let retry = AdmissionRetry::default();
        assert_eq!(retry.attempts(), 4);
        assert_eq!(retry.initial_wait, Duration::from_secs(100));
        let total: Duration = retry.delays.iter().sum();
        assert_eq!(total + retry.initial_wait, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_poll_stops_on_success() {
        let calls = Cell::new(0);
        let retry = AdmissionRetry::immediate(4);

        let result: Result<bool, ()> = retry
            .poll(|attempt| {
                calls.set(calls.get() + 1);
                async move { Ok(attempt == 2) }
            })
            .await;

        assert_eq!(result, Ok(true));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_poll_exhausts_schedule() {
        let calls = Cell::new(0);
        let retry = AdmissionRetry::immediate(4);

        let result: Result<bool, ()> = retry
            .poll(|_| {
                calls.set(calls.get() + 1);
                async { Ok(false) }
            })
            .await;

        assert_eq!(result, Ok(false));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn test_poll_propagates_errors() {
        let retry = AdmissionRetry::immediate(4);
        let result: Result<bool, &str> = retry.poll(|_| async { Err("listing failed") }).await;
        assert_eq!(result, Err("listing failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_waits_between_checks() {
        let retry = AdmissionRetry::new(
            Duration::ZERO,
            vec![Duration::from_secs(100), Duration::from_secs(300)],
        );
        let start = tokio::time::Instant::now();

        let result: Result<bool, ()> = retry.poll(|_| async { Ok(false) }).await;

        assert_eq!(result, Ok(false));
        assert!(start.elapsed() >= Duration::from_secs(400));
    }
}
