//! Retry schedule for transient failures.

use crate::error::{PulseError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Fixed sequence of waits taken after each failed attempt.
///
/// One attempt is made per entry, so the default `[1s, 3s, 5s, 0s]` allows four attempts
/// in total. The trailing zero delay means the last failure is returned without waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
            Duration::ZERO,
        ])
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Maximum number of attempts.
    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or attempts run out.
    ///
    /// Cancellation during a wait returns [`PulseError::Cancelled`] immediately.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = PulseError::Cancelled;
        for (attempt, delay) in self.delays.iter().enumerate() {
            if token.is_cancelled() {
                return Err(PulseError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Attempt failed");
                    last_error = e;
                }
            }

            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = token.cancelled() => return Err(PulseError::Cancelled),
                _ = tokio::time::sleep(*delay) => {}
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_makes_four_attempts() {
        let schedule = RetrySchedule::default();
        let token = CancellationToken::new();
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let started = Instant::now();

        let recorded = attempts.clone();
        let result: Result<()> = schedule
            .run(&token, || {
                recorded.lock().unwrap().push(started.elapsed());
                async { Err(PulseError::Transport("connection refused".into())) }
            })
            .await;

        assert!(matches!(result, Err(PulseError::Transport(_))));
        let attempts = attempts.lock().unwrap();
        assert_eq!(
            *attempts,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(4),
                Duration::from_secs(9),
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let schedule = RetrySchedule::default();
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let value = schedule
            .run(&token, || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(PulseError::Rejected { status: 503 })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_is_not_retried() {
        let schedule = RetrySchedule::default();
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<()> = schedule
            .run(&token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PulseError::Rejected { status: 400 }) }
            })
            .await;

        assert!(matches!(result, Err(PulseError::Rejected { status: 400 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_wait() {
        let schedule = RetrySchedule::default();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        let counted = calls.clone();
        let started = Instant::now();
        let result: Result<()> = schedule
            .run(&token, || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Err(PulseError::Transport("timeout".into())) }
            })
            .await;

        assert!(matches!(result, Err(PulseError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_default_schedule() {
        assert_eq!(RetrySchedule::default().attempts(), 4);
    }
}
