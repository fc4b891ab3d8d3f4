//! Deadline-bounded polling
//!
//! Every wait in a verification run is measured against one shared
//! [`Deadline`]. Time is read through `tokio::time`, so tests can drive the
//! loops with a paused clock instead of real sleeps.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::Error;

/// A start instant plus a budget. Cheap to copy and pass to every stage.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// The total budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time since the deadline was created
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    /// Whether the budget is used up
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// A deadline starting now with `budget`, never ending later than `self`
    pub fn capped(&self, budget: Duration) -> Self {
        Self::after(budget.min(self.remaining()))
    }

    /// Sleep for `interval`, but never past the deadline
    pub async fn sleep(&self, interval: Duration) {
        tokio::time::sleep(interval.min(self.remaining())).await;
    }

    /// Drive `fut` until it finishes or the deadline passes.
    ///
    /// Returns `None` if the deadline cut the future off.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout(self.remaining(), fut).await.ok()
    }
}

/// Outcome of one polling attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Condition met
    Ready(T),
    /// Condition not met yet, with a human-readable reason
    Pending(String),
}

impl<T> Attempt<T> {
    /// Convert a fallible call into an attempt; errors are treated as transient
    pub fn from_result<E: std::fmt::Display>(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Attempt::Ready(value),
            Err(e) => Attempt::Pending(e.to_string()),
        }
    }
}

/// Poll `check_fn` every `interval` until it is ready or `deadline` expires.
///
/// The check always runs at least once. A final attempt is made at the
/// deadline itself since sleeps are clamped to the remaining budget, so a
/// timeout is reported exactly when the budget is used up.
pub async fn poll_until_deadline<T, F, Fut>(
    deadline: &Deadline,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    loop {
        let last_status = match check_fn().await {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Pending(reason) => reason,
        };

        if deadline.is_expired() {
            return Err(Error::Timeout {
                description: description.to_string(),
                elapsed: deadline.elapsed(),
                last_status,
            });
        }

        debug!(reason = %last_status, "Waiting for {}...", description);
        deadline.sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_ready() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let result = poll_until_deadline(&deadline, Duration::from_secs(3), "op", || async {
            Attempt::Ready(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(deadline.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_at_fixed_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let deadline = Deadline::after(Duration::from_secs(60));

        let result = poll_until_deadline(&deadline, Duration::from_secs(3), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Attempt::Pending("not yet".to_string())
                } else {
                    Attempt::Ready(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(deadline.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_exactly_at_deadline() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let result: Result<(), Error> =
            poll_until_deadline(&deadline, Duration::from_secs(3), "never", || async {
                Attempt::Pending("connection refused".to_string())
            })
            .await;

        match result {
            Err(Error::Timeout {
                elapsed,
                last_status,
                ..
            }) => {
                assert_eq!(elapsed, Duration::from_secs(10));
                assert_eq!(last_status, "connection refused");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn capped_deadline_never_outlives_parent() {
        let parent = Deadline::after(Duration::from_secs(100));
        tokio::time::sleep(Duration::from_secs(90)).await;

        let child = parent.capped(Duration::from_secs(60));
        assert_eq!(child.timeout(), Duration::from_secs(10));

        let roomy = Deadline::after(Duration::from_secs(1000)).capped(Duration::from_secs(60));
        assert_eq!(roomy.timeout(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn run_is_cut_off_at_deadline() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let fast = deadline.run(async { 7 }).await;
        assert_eq!(fast, Some(7));

        let slow = deadline
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(slow.is_none());
        assert_eq!(deadline.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn attempt_from_result_treats_errors_as_pending() {
        let ok: Attempt<u8> = Attempt::from_result::<&str>(Ok(1));
        assert_eq!(ok, Attempt::Ready(1));
        let err: Attempt<u8> = Attempt::from_result(Err("refused"));
        assert_eq!(err, Attempt::Pending("refused".to_string()));
    }
}
